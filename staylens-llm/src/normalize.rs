//! Response normalization
//!
//! Models answer in loosely structured JSON. Everything here turns that
//! into an [`Analysis`]: fenced blocks are unwrapped, the rating is parsed
//! case-insensitively, and issues of any shape become `{title, details}`.

use serde_json::{Map, Value};
use staylens_core::{Analysis, AnalysisError, Issue, QualityRating};
use std::collections::HashSet;

const TITLE_KEYS: [&str; 3] = ["title", "issue", "name"];
const DETAIL_KEYS: [&str; 3] = ["details", "description", "detail"];

/// Strip a Markdown code fence (```json ... ```) if the reply has one,
/// otherwise fall back to the outermost `{ ... }` span.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body = match after.find('\n') {
            Some(nl) if !after[..nl].trim().contains('{') => &after[nl + 1..],
            _ => after,
        };
        let body = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
        return body.trim();
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(open), Some(close)) if open < close => &trimmed[open..=close],
        _ => trimmed,
    }
}

/// Parse a model reply into an [`Analysis`].
///
/// Fails only when the payload is not a JSON object at all; missing or
/// oddly shaped fields degrade to empty values, and a missing or
/// unrecognized rating becomes `Fair`.
pub fn parse_analysis(provider: &str, text: &str) -> Result<Analysis, AnalysisError> {
    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body).map_err(|e| AnalysisError::MalformedResponse {
        provider: provider.to_string(),
        reason: format!("invalid JSON: {}", e),
    })?;

    match value {
        Value::Object(map) => Ok(normalize_object(&map)),
        other => Err(AnalysisError::MalformedResponse {
            provider: provider.to_string(),
            reason: format!("expected a JSON object, got {}", json_type(&other)),
        }),
    }
}

/// Normalize an already-decoded object.
pub fn normalize_object(map: &Map<String, Value>) -> Analysis {
    Analysis {
        quality_rating: map
            .get("quality_rating")
            .and_then(Value::as_str)
            .and_then(QualityRating::parse_lenient)
            .or(Some(QualityRating::Fair)),
        issues: map.get("issues").map(normalize_issues).unwrap_or_default(),
        action_items: map
            .get("action_items")
            .map(normalize_action_items)
            .unwrap_or_default(),
    }
}

fn normalize_issues(value: &Value) -> Vec<Issue> {
    match value {
        Value::Array(entries) => entries.iter().filter_map(normalize_issue).collect(),
        Value::Null => Vec::new(),
        single => normalize_issue(single).into_iter().collect(),
    }
}

/// One issue entry. Bare strings become a title with empty details.
pub fn normalize_issue(value: &Value) -> Option<Issue> {
    let issue = match value {
        Value::Null => return None,
        Value::String(s) => Issue::new(s.trim(), ""),
        Value::Object(map) => {
            let title = first_text(map, &TITLE_KEYS);
            let details = first_text(map, &DETAIL_KEYS).unwrap_or_default();
            match title {
                Some(title) => Issue::new(title, details),
                None => Issue::new(value.to_string(), details),
            }
        }
        other => Issue::new(other.to_string(), ""),
    };
    (!issue.title.is_empty()).then_some(issue)
}

fn normalize_action_items(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value {
        Value::Array(entries) => entries.iter().filter_map(value_text).collect(),
        other => value_text(other).into_iter().collect(),
    };
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter(|item| !item.is_empty() && seen.insert(item.clone()))
        .collect()
}

fn first_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| map.get(*key))
        .find_map(value_text)
        .filter(|text| !text.is_empty())
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
