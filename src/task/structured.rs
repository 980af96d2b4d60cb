//! Parsing structured (JSON) answers from the reasoning collaborator.
//!
//! Models occasionally wrap JSON in markdown fences or surround it with prose.
//! [`parse_structured`] strips fences, tries the whole text, then the outermost
//! `{ ... }` span. Anything else is a [`MalformedOutput`]; callers decide how
//! to degrade.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Malformed structured output: {reason}")]
pub struct MalformedOutput {
    pub reason: String,
    pub raw: String,
}

pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, MalformedOutput> {
    let trimmed = strip_code_fence(text.trim());

    let first_error = match serde_json::from_str::<T>(trimmed) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<T>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(MalformedOutput {
        reason: first_error.to_string(),
        raw: text.to_string(),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") up to the first newline.
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Accepts a string, a list of strings, or a list of arbitrary values
/// (non-strings are rendered as compact JSON).
pub(crate) fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s],
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    })
}

/// Accepts a string or a number.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
