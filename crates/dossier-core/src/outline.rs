//! Outline extraction from free-form model output.
//!
//! Models tend to wrap the JSON payload in prose or code fences, so the
//! parser takes the span from the first `{` to the last `}` and decodes that.

use crate::error::OutlineError;
use crate::types::{Outline, SectionDescriptor};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

static PAYLOAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

#[derive(Debug, Deserialize)]
struct RawOutline {
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
    #[serde(default)]
    sections: Option<Vec<RawSection>>,
}

#[derive(Debug, Deserialize)]
struct RawSection {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Parse an outline out of raw generated text.
///
/// Sections without an id get their 1-based position as id; numeric ids are
/// kept as their decimal text.
///
/// # Errors
/// - `OutlineError::MissingPayload` when no `{...}` span exists
/// - `OutlineError::Malformed` when the span is not an outline object
/// - `OutlineError::NoSections` when the section list is absent or empty
/// - `OutlineError::DuplicateSectionId` when two sections share an id
pub fn parse_outline(text: &str) -> Result<Outline, OutlineError> {
    let payload = PAYLOAD
        .find(text)
        .ok_or(OutlineError::MissingPayload)?
        .as_str();

    let raw: RawOutline =
        serde_json::from_str(payload).map_err(|e| OutlineError::Malformed(e.to_string()))?;

    let raw_sections = raw.sections.unwrap_or_default();
    if raw_sections.is_empty() {
        return Err(OutlineError::NoSections);
    }

    let mut seen = HashSet::with_capacity(raw_sections.len());
    let mut sections = Vec::with_capacity(raw_sections.len());
    for (index, raw_section) in raw_sections.into_iter().enumerate() {
        let id = section_id(raw_section.id, index)?;
        if !seen.insert(id.clone()) {
            return Err(OutlineError::DuplicateSectionId(id));
        }
        sections.push(SectionDescriptor {
            id,
            title: raw_section.title.unwrap_or_default(),
            description: raw_section.description.unwrap_or_default(),
        });
    }

    Ok(Outline {
        title: raw.title.unwrap_or_default(),
        abstract_text: raw.abstract_text.unwrap_or_default(),
        sections,
    })
}

fn section_id(raw: Option<Value>, index: usize) -> Result<String, OutlineError> {
    match raw {
        None | Some(Value::Null) => Ok((index + 1).to_string()),
        Some(Value::String(s)) if s.trim().is_empty() => Ok((index + 1).to_string()),
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(other) => Err(OutlineError::Malformed(format!(
            "section {} has a non-scalar id: {other}",
            index + 1
        ))),
    }
}
