use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    println!("Database initialized successfully.");
    Ok(())
}

/// Create the schema on an open pool. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            market TEXT NOT NULL,
            created_date TEXT NOT NULL,
            eu_risk TEXT CHECK (eu_risk IN ('Unacceptable', 'High', 'Limited', 'Minimal')),
            eu_risk_reason TEXT,
            attachment TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_project_name ON project(name)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbConfig;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = DbConfig {
            url: format!("sqlite://{}", tmp.path().join("m.sqlite").display()),
        };
        let pool = db::connect(&config).await.unwrap();
        migrate_pool(&pool).await.unwrap();
        migrate_pool(&pool).await.unwrap();

        let tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='project'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(tables, 1);
    }

    #[tokio::test]
    async fn test_unknown_risk_level_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = DbConfig {
            url: format!("sqlite://{}", tmp.path().join("m.sqlite").display()),
        };
        let pool = db::connect(&config).await.unwrap();
        migrate_pool(&pool).await.unwrap();

        let result = sqlx::query(
            "INSERT INTO project (name, description, market, created_date, eu_risk) VALUES ('a', 'b', 'EU', '2024-01-01T00:00:00Z', 'Medium')",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }
}
