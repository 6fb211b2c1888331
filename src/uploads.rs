//! Attachment storage for uploaded project files.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Write `bytes` under `dir` as `<uuid>-<sanitised name>` and return the
/// stored path. The directory is created on demand.
pub async fn save_attachment(dir: &Path, original_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating upload directory {}", dir.display()))?;

    let stored = dir.join(format!(
        "{}-{}",
        uuid::Uuid::new_v4(),
        sanitize_filename(original_name)
    ));
    tokio::fs::write(&stored, bytes)
        .await
        .with_context(|| format!("writing {}", stored.display()))?;

    tracing::debug!(path = %stored.display(), size = bytes.len(), "attachment saved");
    Ok(stored)
}

/// Remove a saved attachment after a failed request. Failures are logged.
pub async fn discard_attachment(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "could not remove attachment");
    }
}

/// Reduce a client-supplied name to a safe single path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}
