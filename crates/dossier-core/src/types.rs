//! Core types for Dossier
//!
//! Defines the report record and its parts:
//! - Report identifiers and lifecycle status
//! - Outline and section descriptors
//! - Section results (generated or degraded)
//! - Derived summary statistics

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Unique report identifier (random v4 UUID, never reused within a process)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(pub Uuid);

impl ReportId {
    /// Generate new report ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReportId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle status of a report
///
/// `Completed` and `Error` are terminal. See [`crate::lifecycle`] for the
/// permitted transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Waiting on the outline call
    GeneratingOutline,
    /// Outline attached, sections being produced one at a time
    GeneratingSections,
    /// All sections processed, about to be promoted
    Finalizing,
    /// Moved to the completed pool
    Completed,
    /// Failed or timed out; stays in the active pool until swept
    Error,
}

impl ReportStatus {
    /// Wire name of the status
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::GeneratingOutline => "generating_outline",
            ReportStatus::GeneratingSections => "generating_sections",
            ReportStatus::Finalizing => "finalizing",
            ReportStatus::Completed => "completed",
            ReportStatus::Error => "error",
        }
    }

    /// Check if no further transitions are possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Completed | ReportStatus::Error)
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the outline's ordered section list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionDescriptor {
    /// Section identifier, unique within the outline
    pub id: String,
    /// Section title
    pub title: String,
    /// What the section should cover
    #[serde(default)]
    pub description: String,
}

impl SectionDescriptor {
    /// Create new section descriptor
    #[inline]
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
        }
    }
}

/// Structured result of the outline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    /// Report title
    #[serde(default)]
    pub title: String,
    /// Report abstract
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    /// Sections in declared order
    pub sections: Vec<SectionDescriptor>,
}

impl Outline {
    /// Number of declared sections
    #[inline]
    #[must_use]
    pub fn section_count(&self) -> usize {
        self.sections.len()
    }
}

/// Result for a single section, generated or degraded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    /// Section title
    pub title: String,
    /// Generated content, or placeholder text when degraded
    pub content: String,
    /// When the entry was recorded
    pub generated_at: DateTime<Utc>,
    /// Set when generation failed and `content` is a placeholder
    #[serde(default)]
    pub failed: bool,
}

impl SectionRecord {
    /// Successfully generated section
    #[must_use]
    pub fn generated(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            generated_at: Utc::now(),
            failed: false,
        }
    }

    /// Degraded section carrying placeholder text that names the section
    #[must_use]
    pub fn degraded(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            content: degraded_placeholder(&title),
            title,
            generated_at: Utc::now(),
            failed: true,
        }
    }
}

/// Placeholder text recorded for a section whose generation failed
#[must_use]
pub fn degraded_placeholder(title: &str) -> String {
    format!(
        "This section could not be generated because of a technical problem. \
         Please add the content for \"{title}\" manually."
    )
}

/// Statistics derived once, at completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Character count of the abstract plus all section contents
    pub total_words: usize,
    /// Number of recorded sections
    pub total_sections: usize,
    /// `completed_at - created_at` in seconds
    pub generation_duration_secs: Option<f64>,
    /// Same duration as `H:MM:SS`
    pub generation_duration_formatted: Option<String>,
}

/// Full state of one report-generation job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    /// Immutable identifier
    pub id: ReportId,
    /// Requested topic
    pub topic: String,
    /// Free-form requirements
    pub requirements: String,
    /// Lifecycle status
    pub status: ReportStatus,
    /// Outline, once generated
    pub outline: Option<Outline>,
    /// Section results keyed by section id, in insertion order
    pub sections: IndexMap<String, SectionRecord>,
    /// Percent complete, non-decreasing while active
    pub progress: u8,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Set exactly when `status == Completed`
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure message when `status == Error`
    pub error: Option<String>,
    /// Number of artifact fetches
    pub download_count: u64,
    /// Derived statistics, computed once at completion
    pub summary: Option<ReportSummary>,
    /// Rendered artifact files by format
    #[serde(default)]
    pub artifacts: BTreeMap<String, PathBuf>,
}

impl ReportRecord {
    /// Create a fresh record stamped with the current time
    #[inline]
    #[must_use]
    pub fn new(topic: impl Into<String>, requirements: impl Into<String>) -> Self {
        Self::new_at(topic, requirements, Utc::now())
    }

    /// Create a fresh record with an explicit creation time
    #[must_use]
    pub fn new_at(
        topic: impl Into<String>,
        requirements: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReportId::new(),
            topic: topic.into(),
            requirements: requirements.into(),
            status: ReportStatus::GeneratingOutline,
            outline: None,
            sections: IndexMap::new(),
            progress: 0,
            created_at,
            completed_at: None,
            error: None,
            download_count: 0,
            summary: None,
            artifacts: BTreeMap::new(),
        }
    }

    /// Number of recorded sections (generated or degraded)
    #[inline]
    #[must_use]
    pub fn sections_completed(&self) -> usize {
        self.sections.len()
    }

    /// Number of sections declared by the outline, 0 before it exists
    #[inline]
    #[must_use]
    pub fn total_sections(&self) -> usize {
        self.outline.as_ref().map_or(0, Outline::section_count)
    }

    /// Number of degraded sections
    #[must_use]
    pub fn failed_sections(&self) -> usize {
        self.sections.values().filter(|s| s.failed).count()
    }

    /// Only completed reports can be rendered
    #[inline]
    #[must_use]
    pub fn is_downloadable(&self) -> bool {
        self.status == ReportStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_id_round_trips_through_display() {
        let id = ReportId::new();
        let parsed: ReportId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<ReportId>().is_err());
    }

    #[test]
    fn report_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| ReportId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ReportStatus::GeneratingSections).unwrap();
        assert_eq!(json, "\"generating_sections\"");
        assert_eq!(ReportStatus::Finalizing.to_string(), "finalizing");
    }

    #[test]
    fn terminal_statuses() {
        assert!(ReportStatus::Completed.is_terminal());
        assert!(ReportStatus::Error.is_terminal());
        assert!(!ReportStatus::GeneratingOutline.is_terminal());
        assert!(!ReportStatus::Finalizing.is_terminal());
    }

    #[test]
    fn new_record_defaults() {
        let record = ReportRecord::new("T", "");
        assert_eq!(record.status, ReportStatus::GeneratingOutline);
        assert_eq!(record.progress, 0);
        assert!(record.outline.is_none());
        assert!(record.completed_at.is_none());
        assert_eq!(record.total_sections(), 0);
        assert!(!record.is_downloadable());
    }

    #[test]
    fn degraded_section_names_its_title() {
        let section = SectionRecord::degraded("Market Outlook");
        assert!(section.failed);
        assert!(section.content.contains("\"Market Outlook\""));
    }

    #[test]
    fn outline_abstract_uses_wire_name() {
        let outline = Outline {
            title: "t".into(),
            abstract_text: "a".into(),
            sections: vec![SectionDescriptor::new("1", "s", "d")],
        };
        let value = serde_json::to_value(&outline).unwrap();
        assert_eq!(value["abstract"], "a");
        assert_eq!(outline.section_count(), 1);
    }
}
