//! Core data models.
//!
//! These types represent the documents, chunks and projects that flow through
//! the retrieval pipeline and the project store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Text extracted from one page of a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Path relative to the document directory.
    pub source: String,
    /// 1-based page number.
    pub page: u32,
    pub text: String,
}

/// A window of a document page's text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub source: String,
    pub page: u32,
    pub chunk_index: usize,
    /// Offset of the first character, counted in chars rather than bytes.
    pub start: usize,
    pub text: String,
    /// SHA-256 hex of `text`.
    pub hash: String,
}

/// A chunk returned from the vector index with its similarity score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

/// EU AI Act risk tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Unacceptable,
    High,
    Limited,
    Minimal,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Unacceptable,
        RiskLevel::High,
        RiskLevel::Limited,
        RiskLevel::Minimal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Unacceptable => "Unacceptable",
            RiskLevel::High => "High",
            RiskLevel::Limited => "Limited",
            RiskLevel::Minimal => "Minimal",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    /// Case-insensitive match on the tier name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        RiskLevel::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown risk level: {}", trimmed))
    }
}

/// A classification produced by the structured output parser.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub risk: RiskLevel,
    pub reason: String,
}

/// A registered AI system project.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Comma-separated market tags.
    pub market: String,
    pub created_date: DateTime<Utc>,
    pub eu_risk: Option<RiskLevel>,
    pub eu_risk_reason: Option<String>,
    pub attachment: Option<String>,
}

/// Input for [`ProjectStore::create`](crate::projects::ProjectStore::create).
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: Option<String>,
    pub description: Option<String>,
    pub market: Option<String>,
    pub eu_risk: Option<RiskLevel>,
    pub eu_risk_reason: Option<String>,
    pub attachment: Option<String>,
}

/// Partial update applied by `PATCH /project/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProjectUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attachment: Option<String>,
}

/// Wire shape of a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectJson {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub market: String,
    pub created_date: String,
    pub eu_risk: Option<RiskLevel>,
    pub eu_risk_reason: Option<String>,
    pub attachment: Option<String>,
}

impl From<&Project> for ProjectJson {
    fn from(p: &Project) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            description: p.description.clone(),
            market: p.market.clone(),
            created_date: p.created_date.to_rfc3339(),
            eu_risk: p.eu_risk,
            eu_risk_reason: p.eu_risk_reason.clone(),
            attachment: p.attachment.clone(),
        }
    }
}

/// Metadata for one file in the document directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileInfo {
    pub filename: String,
    pub size: u64,
    pub creation_date: String,
    pub last_modified_date: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_parse_case_insensitive() {
        assert_eq!("high".parse::<RiskLevel>().unwrap(), RiskLevel::High);
        assert_eq!(" MINIMAL ".parse::<RiskLevel>().unwrap(), RiskLevel::Minimal);
        assert!("medium".parse::<RiskLevel>().is_err());
    }

    #[test]
    fn test_project_json_uses_camel_case() {
        let project = Project {
            id: 7,
            name: "Facial ID".to_string(),
            description: "d".to_string(),
            market: "France,Spain".to_string(),
            created_date: Utc::now(),
            eu_risk: Some(RiskLevel::High),
            eu_risk_reason: Some("biometric".to_string()),
            attachment: None,
        };
        let json = serde_json::to_value(ProjectJson::from(&project)).unwrap();
        assert_eq!(json["euRisk"], "High");
        assert_eq!(json["euRiskReason"], "biometric");
        assert!(json["createdDate"].is_string());
        assert!(json["attachment"].is_null());
    }
}
