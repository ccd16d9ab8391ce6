//! Document export
//!
//! Renders a completed report into a downloadable document. Markdown is the
//! built-in format; other formats plug in through [`DocumentExporter`].

use crate::error::ExportError;
use crate::types::ReportRecord;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;

const MAX_STEM_CHARS: usize = 30;
const MISSING_SECTION_TEXT: &str = "This section is still being written.";

/// Renders report records into one document format
pub trait DocumentExporter: Send + Sync {
    /// Format key, used to register the artifact on the record
    fn format(&self) -> &str;

    /// File extension without the dot
    fn extension(&self) -> &str;

    /// Media type served with the document
    fn media_type(&self) -> &str;

    /// Render the record
    ///
    /// # Errors
    /// - `ExportError::MissingOutline` when the record has no outline
    /// - `ExportError::Render` for format-specific failures
    fn render(&self, record: &ReportRecord) -> Result<Vec<u8>, ExportError>;
}

/// Markdown document with title block, abstract, contents and sections
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownExporter;

impl MarkdownExporter {
    /// Render to a string
    ///
    /// # Errors
    /// - `ExportError::MissingOutline` when the record has no outline
    pub fn render_string(&self, record: &ReportRecord) -> Result<String, ExportError> {
        let outline = record.outline.as_ref().ok_or(ExportError::MissingOutline)?;
        let generated = record.completed_at.unwrap_or(record.created_at);
        let mut doc = String::new();

        // Writing into a String cannot fail.
        if !outline.title.is_empty() {
            let _ = writeln!(doc, "# {}\n", outline.title);
        }
        let _ = writeln!(doc, "**Generated**: {}\n", generated.format("%Y-%m-%d %H:%M"));
        let topic = if record.topic.is_empty() {
            "unspecified"
        } else {
            record.topic.as_str()
        };
        let _ = writeln!(doc, "**Topic**: {topic}\n");

        if !outline.abstract_text.is_empty() {
            let _ = writeln!(doc, "## Abstract\n\n{}\n", outline.abstract_text);
        }

        if !outline.sections.is_empty() {
            doc.push_str("## Contents\n\n");
            for section in &outline.sections {
                let _ = writeln!(doc, "- {}. {}", section.id, section.title);
            }
            doc.push_str("\n---\n\n");

            for section in &outline.sections {
                if !section.title.is_empty() {
                    let _ = writeln!(doc, "## {}. {}\n", section.id, section.title);
                }
                match record.sections.get(&section.id) {
                    Some(generated) if !generated.content.is_empty() => {
                        let _ = writeln!(doc, "{}\n", generated.content);
                    }
                    _ => {
                        let _ = writeln!(doc, "{MISSING_SECTION_TEXT}\n");
                    }
                }
            }
        }

        doc.push_str("---\n\n## Generation details\n\n");
        let _ = writeln!(doc, "- **Generated**: {}", generated.format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(doc, "- **Report ID**: {}", record.id);
        if let Some(summary) = &record.summary {
            let _ = writeln!(doc, "- **Length**: {} characters", summary.total_words);
            if let Some(duration) = &summary.generation_duration_formatted {
                let _ = writeln!(doc, "- **Generation time**: {duration}");
            }
        }

        Ok(doc)
    }
}

impl DocumentExporter for MarkdownExporter {
    fn format(&self) -> &str {
        "markdown"
    }

    fn extension(&self) -> &str {
        "md"
    }

    fn media_type(&self) -> &str {
        "text/markdown; charset=utf-8"
    }

    fn render(&self, record: &ReportRecord) -> Result<Vec<u8>, ExportError> {
        self.render_string(record).map(String::into_bytes)
    }
}

/// Reduce a topic to characters safe in a file name
///
/// Keeps alphanumerics (any script), spaces, `-` and `_`; trims trailing
/// whitespace and caps the result at 30 characters.
#[must_use]
pub fn safe_file_stem(topic: &str) -> String {
    let kept: String = topic
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    kept.trim_end().chars().take(MAX_STEM_CHARS).collect()
}

/// Download name: `report_{stem}_{YYYYmmdd_HHMMSS}.{ext}`
#[must_use]
pub fn artifact_file_name(topic: &str, at: DateTime<Utc>, extension: &str) -> String {
    format!(
        "report_{}_{}.{extension}",
        safe_file_stem(topic),
        at.format("%Y%m%d_%H%M%S")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::compute_summary;
    use crate::types::{Outline, ReportStatus, SectionDescriptor, SectionRecord};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn completed_record() -> ReportRecord {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut record = ReportRecord::new_at("Inflation", "", created);
        record.outline = Some(Outline {
            title: "Inflation outlook".into(),
            abstract_text: "Prices keep rising.".into(),
            sections: vec![
                SectionDescriptor::new("1", "Drivers", ""),
                SectionDescriptor::new("2", "Policy", ""),
            ],
        });
        record
            .sections
            .insert("1".into(), SectionRecord::generated("Drivers", "Energy and wages."));
        record.status = ReportStatus::Completed;
        record.completed_at = Some(created + chrono::Duration::seconds(95));
        record.summary = Some(compute_summary(&record));
        record
    }

    #[test]
    fn markdown_layout() {
        let doc = MarkdownExporter.render_string(&completed_record()).unwrap();

        assert!(doc.starts_with("# Inflation outlook\n"));
        assert!(doc.contains("**Generated**: 2024-03-01 09:01"));
        assert!(doc.contains("**Topic**: Inflation"));
        assert!(doc.contains("## Abstract\n\nPrices keep rising."));
        assert!(doc.contains("- 1. Drivers\n- 2. Policy\n"));
        assert!(doc.contains("## 1. Drivers\n\nEnergy and wages."));
        assert!(doc.contains(&format!("## 2. Policy\n\n{MISSING_SECTION_TEXT}")));
        assert!(doc.contains("- **Generation time**: 0:01:35"));

        let contents = doc.find("## Contents").unwrap();
        let first = doc.find("## 1. Drivers").unwrap();
        let second = doc.find("## 2. Policy").unwrap();
        assert!(contents < first && first < second);
    }

    #[test]
    fn render_requires_outline() {
        let record = ReportRecord::new("t", "");
        assert!(matches!(
            MarkdownExporter.render(&record),
            Err(ExportError::MissingOutline)
        ));
    }

    #[test]
    fn exporter_metadata() {
        let exporter = MarkdownExporter;
        assert_eq!(exporter.format(), "markdown");
        assert_eq!(exporter.extension(), "md");
        assert!(exporter.media_type().starts_with("text/markdown"));
    }

    #[test]
    fn file_stem_sanitized() {
        assert_eq!(safe_file_stem("GDP / CPI: 2024?"), "GDP  CPI 2024");
        assert_eq!(safe_file_stem("中国经济 展望 "), "中国经济 展望");
        assert_eq!(safe_file_stem(&"x".repeat(50)).chars().count(), 30);
        assert_eq!(safe_file_stem("///"), "");
    }

    #[test]
    fn file_name_has_stem_and_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 1, 35).unwrap();
        assert_eq!(
            artifact_file_name("Inflation outlook", at, "md"),
            "report_Inflation outlook_20240301_090135.md"
        );
    }
}
