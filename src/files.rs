//! Listing of the document directory for `GET /files`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::loader::relative_name;
use crate::models::FileInfo;

/// Every regular file under `dir`, sorted by relative name. A missing
/// directory lists as empty.
pub fn list_files(dir: &Path) -> Result<Vec<FileInfo>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry.metadata()?;
        let modified = meta.modified()?;
        // Not every filesystem records birth time.
        let created = meta.created().unwrap_or(modified);

        files.push(FileInfo {
            filename: relative_name(dir, entry.path()),
            size: meta.len(),
            creation_date: rfc3339(created),
            last_modified_date: rfc3339(modified),
        });
    }

    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}

fn rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_lists_files_sorted() {
        let tmp = tempfile::TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("annex")).unwrap();
        fs::write(root.join("z.pdf"), b"12345").unwrap();
        fs::write(root.join("annex/a.pdf"), b"12").unwrap();

        let files = list_files(root).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["annex/a.pdf", "z.pdf"]);
        assert_eq!(files[1].size, 5);
        assert!(DateTime::parse_from_rfc3339(&files[0].creation_date).is_ok());
        assert!(DateTime::parse_from_rfc3339(&files[0].last_modified_date).is_ok());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(list_files(&tmp.path().join("nope")).unwrap().is_empty());
    }
}
