//! Document directory loader.
//!
//! Walks `documents.dir`, keeps files matching the include globs and not the
//! exclude globs, and extracts one [`Document`] per non-blank page. Files that
//! fail extraction are logged and skipped so one bad PDF never blocks an index
//! build.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use walkdir::WalkDir;

use crate::config::DocumentsConfig;
use crate::extract::extract_pages;
use crate::models::Document;

/// Load every matching file under the document directory, ordered by
/// relative path then page. A missing directory yields no documents.
pub fn load_documents(config: &DocumentsConfig) -> Result<Vec<Document>> {
    let root = &config.dir;
    if !root.exists() {
        tracing::warn!(dir = %root.display(), "document directory does not exist");
        return Ok(Vec::new());
    }

    let include_set = build_globset(&config.include_globs)?;
    let exclude_set = build_globset(&config.exclude_globs)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let rel_str = relative_name(root, path);

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push((rel_str, path.to_path_buf()));
    }

    // Sort for deterministic ordering
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut documents = Vec::new();
    for (rel_str, path) in files {
        match load_file(&path, &rel_str) {
            Ok(docs) => documents.extend(docs),
            Err(e) => tracing::warn!(file = %rel_str, error = %e, "skipping unreadable document"),
        }
    }

    Ok(documents)
}

fn load_file(path: &Path, relative_path: &str) -> Result<Vec<Document>> {
    let bytes = std::fs::read(path)?;
    let pages = extract_pages(&bytes, path)?;

    Ok(pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| Document {
            source: relative_path.to_string(),
            page: i as u32 + 1,
            text,
        })
        .collect())
}

/// Path of `path` relative to `root`, with `/` separators.
pub fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config(dir: &Path, include: &[&str], exclude: &[&str]) -> DocumentsConfig {
        DocumentsConfig {
            dir: dir.to_path_buf(),
            include_globs: include.iter().map(|s| s.to_string()).collect(),
            exclude_globs: exclude.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        let cfg = config(&tmp.path().join("absent"), &["**/*.txt"], &[]);
        assert!(load_documents(&cfg).unwrap().is_empty());
    }

    #[test]
    fn test_globs_and_ordering() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("annex")).unwrap();
        fs::write(root.join("b.txt"), "Beta text").unwrap();
        fs::write(root.join("annex/a.txt"), "Annex text").unwrap();
        fs::write(root.join("draft.txt"), "Draft").unwrap();
        fs::write(root.join("image.png"), [0u8, 1, 2]).unwrap();
        fs::write(root.join("blank.txt"), "   \n").unwrap();

        let cfg = config(root, &["**/*.txt"], &["draft.txt"]);
        let docs = load_documents(&cfg).unwrap();

        let sources: Vec<&str> = docs.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["annex/a.txt", "b.txt"]);
        assert!(docs.iter().all(|d| d.page == 1));
    }

    #[test]
    fn test_broken_pdf_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("broken.pdf"), b"%PDF-1.4 truncated").unwrap();
        fs::write(root.join("ok.txt"), "still indexed").unwrap();

        let cfg = config(root, &["**/*.pdf", "**/*.txt"], &[]);
        let docs = load_documents(&cfg).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source, "ok.txt");
    }
}
