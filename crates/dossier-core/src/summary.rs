//! Summary statistics derived from a completed record.
//!
//! "Words" are counted as characters: report text is predominantly CJK,
//! where one character is the natural unit.

use crate::types::{ReportRecord, ReportSummary};
use chrono::Duration;

/// Compute the summary for a record whose `completed_at` has been stamped.
#[must_use]
pub fn compute_summary(record: &ReportRecord) -> ReportSummary {
    let abstract_chars = record
        .outline
        .as_ref()
        .map_or(0, |o| o.abstract_text.chars().count());
    let section_chars: usize = record
        .sections
        .values()
        .map(|s| s.content.chars().count())
        .sum();

    let duration = record
        .completed_at
        .map(|done| done.signed_duration_since(record.created_at));

    ReportSummary {
        total_words: abstract_chars + section_chars,
        total_sections: record.sections.len(),
        generation_duration_secs: duration.map(duration_secs),
        generation_duration_formatted: duration.map(format_duration),
    }
}

#[allow(clippy::cast_precision_loss)]
fn duration_secs(duration: Duration) -> f64 {
    duration
        .num_microseconds()
        .map_or(duration.num_seconds() as f64, |us| us as f64 / 1_000_000.0)
}

/// Format as `H:MM:SS`, prefixed with `N day(s), ` past 24 hours.
/// Fractional seconds are dropped; negative durations clamp to zero.
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let clock = format!("{hours}:{minutes:02}:{seconds:02}");
    match days {
        0 => clock,
        1 => format!("1 day, {clock}"),
        n => format!("{n} days, {clock}"),
    }
}
