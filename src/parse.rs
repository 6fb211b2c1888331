//! Structured output parser for risk classifications.
//!
//! Extracts the `risk` and `reason` fields from generated text. Two shapes are
//! accepted:
//!
//! ```text
//! risk: High
//! reason: Biometric identification is listed in Annex III.
//! ```
//!
//! or a JSON object `{"risk": "High", "reason": "..."}`, optionally inside a
//! fenced ```` ```json ```` block. Keys are case-insensitive and may carry list
//! markers or markdown emphasis. Anything else is a [`ParseError`]; the parser
//! never falls back to a default level.

use thiserror::Error;

use crate::models::{RiskAssessment, RiskLevel};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("model output is missing the '{0}' field")]
    MissingField(&'static str),
    #[error("model output has an unknown risk level: '{0}'")]
    InvalidRisk(String),
}

pub fn parse_risk_assessment(text: &str) -> Result<RiskAssessment, ParseError> {
    if let Some(parsed) = parse_json(text) {
        return parsed;
    }
    parse_lines(text)
}

fn parse_json(text: &str) -> Option<Result<RiskAssessment, ParseError>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(&text[start..=end]).ok()?;
    let obj = value.as_object()?;
    // Braces quoted inside a plain-text reason are not an answer object.
    if !obj
        .keys()
        .any(|k| k.eq_ignore_ascii_case("risk") || k.eq_ignore_ascii_case("reason"))
    {
        return None;
    }

    let field = |name: &str| {
        obj.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_str())
            .map(str::trim)
    };

    Some((|| {
        let risk = field("risk").ok_or(ParseError::MissingField("risk"))?;
        let reason = field("reason")
            .filter(|r| !r.is_empty())
            .ok_or(ParseError::MissingField("reason"))?;
        Ok(RiskAssessment {
            risk: parse_level(risk)?,
            reason: reason.to_string(),
        })
    })())
}

#[derive(Clone, Copy, PartialEq)]
enum Key {
    Risk,
    Reason,
}

fn parse_lines(text: &str) -> Result<RiskAssessment, ParseError> {
    let mut risk: Option<String> = None;
    let mut reason: Option<Vec<String>> = None;
    let mut in_reason = false;

    for line in text.lines() {
        match split_key(line) {
            Some((Key::Risk, value)) => {
                in_reason = false;
                if risk.is_none() {
                    risk = Some(value);
                }
            }
            Some((Key::Reason, value)) => {
                if reason.is_none() {
                    reason = Some(vec![value]);
                    in_reason = true;
                }
            }
            None => {
                if in_reason {
                    if let Some(lines) = reason.as_mut() {
                        lines.push(line.trim().to_string());
                    }
                }
            }
        }
    }

    let risk = risk.ok_or(ParseError::MissingField("risk"))?;
    let reason = reason
        .map(|lines| lines.join("\n").trim().to_string())
        .filter(|r| !r.is_empty())
        .ok_or(ParseError::MissingField("reason"))?;

    Ok(RiskAssessment {
        risk: parse_level(&risk)?,
        reason,
    })
}

/// Recognise `key: value` lines, tolerating `- `, `* `, `**key**:` and
/// similar decoration.
fn split_key(line: &str) -> Option<(Key, String)> {
    let trimmed = line.trim().trim_start_matches(['-', '*', '#', '>', ' ']);
    let colon = trimmed.find(':')?;
    let key: String = trimmed[..colon]
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '`' | '"'))
        .collect::<String>()
        .trim()
        .to_ascii_lowercase();
    let value = trimmed[colon + 1..]
        .trim()
        .trim_matches(|c| matches!(c, '*' | '_' | '`'))
        .trim()
        .to_string();

    match key.as_str() {
        "risk" | "risk level" | "eu risk" => Some((Key::Risk, value)),
        "reason" => Some((Key::Reason, value)),
        _ => None,
    }
}

/// Accept `High`, `"high"`, `High risk`, `High-risk.` and similar.
fn parse_level(raw: &str) -> Result<RiskLevel, ParseError> {
    let cleaned = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c.is_whitespace());
    let lower = cleaned.to_ascii_lowercase();
    let word = lower
        .strip_suffix("-risk")
        .or_else(|| lower.strip_suffix(" risk"))
        .unwrap_or(&lower)
        .trim();

    word.parse::<RiskLevel>()
        .map_err(|_| ParseError::InvalidRisk(cleaned.to_string()))
}
