//! Project store.
//!
//! CRUD over the `project` table. Each operation runs in its own transaction;
//! an early return drops the transaction, which rolls it back.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use crate::models::{NewProject, Project, ProjectUpdate, RiskLevel};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("project {0} not found")]
    NotFound(i64),
    #[error("{0}")]
    Persistence(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

#[derive(Clone)]
pub struct ProjectStore {
    pool: SqlitePool,
}

impl ProjectStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a project and return its id.
    pub async fn create(&self, project: NewProject) -> Result<i64, StoreError> {
        let name = required(project.name, "name")?;
        let description = required(project.description, "description")?;
        let market = required(project.market, "market")?;
        let created = Utc::now().to_rfc3339();

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO project (name, description, market, created_date, eu_risk, eu_risk_reason, attachment)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&name)
        .bind(&description)
        .bind(&market)
        .bind(&created)
        .bind(project.eu_risk.map(|r| r.as_str()))
        .bind(&project.eu_risk_reason)
        .bind(&project.attachment)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        let id = result.last_insert_rowid();
        tracing::info!(id, name = %name, "project created");
        Ok(id)
    }

    /// All projects ordered by id.
    pub async fn list(&self) -> Result<Vec<Project>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT * FROM project ORDER BY id")
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        rows.iter().map(project_from_row).collect()
    }

    pub async fn get(&self, id: i64) -> Result<Project, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT * FROM project WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;

        match row {
            Some(row) => project_from_row(&row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    /// Apply the fields present in `update`; absent fields are unchanged.
    pub async fn update(&self, id: i64, update: ProjectUpdate) -> Result<(), StoreError> {
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(StoreError::Validation("Project name cannot be empty.".into()));
            }
        }

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE project
             SET name = COALESCE(?, name), attachment = COALESCE(?, attachment)
             WHERE id = ?",
        )
        .bind(update.name.as_deref().map(str::trim))
        .bind(&update.attachment)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        tx.commit().await?;

        tracing::info!(id, "project updated");
        Ok(())
    }

    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM project WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        tx.commit().await?;

        tracing::info!(id, "project deleted");
        Ok(())
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, StoreError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(StoreError::Validation(format!(
            "Missing required field: {}",
            field
        ))),
    }
}

fn project_from_row(row: &SqliteRow) -> Result<Project, StoreError> {
    let created: String = row.try_get("created_date")?;
    let created_date = DateTime::parse_from_rfc3339(&created)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Persistence(format!("bad created_date '{}': {}", created, e)))?;

    let eu_risk = row
        .try_get::<Option<String>, _>("eu_risk")?
        .map(|s| s.parse::<RiskLevel>())
        .transpose()
        .map_err(StoreError::Persistence)?;

    Ok(Project {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        market: row.try_get("market")?,
        created_date,
        eu_risk,
        eu_risk_reason: row.try_get("eu_risk_reason")?,
        attachment: row.try_get("attachment")?,
    })
}
