use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::DbConfig;

pub async fn connect(config: &DbConfig) -> Result<SqlitePool> {
    let url = &config.url;

    // Ensure parent directory exists for file-backed databases
    if let Some(path) = database_path(url) {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
    }

    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("invalid database url: {}", url))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    // Every connection to `:memory:` opens its own empty database, so an
    // in-memory pool is a single connection that is never recycled.
    let pool_options = if database_path(url).is_some() {
        SqlitePoolOptions::new().max_connections(5)
    } else {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    };

    let pool = pool_options
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", url))?;

    Ok(pool)
}

/// File path inside a `sqlite:` url, or `None` for in-memory databases.
fn database_path(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path == ":memory:" {
        None
    } else {
        Some(path)
    }
}
