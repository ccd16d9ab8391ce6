//! Report lifecycle state machine
//!
//! `generating_outline -> generating_sections -> finalizing -> completed`,
//! with `error` reachable from every non-terminal state. Staying in the same
//! non-terminal state is allowed so progress can advance within a stage.

use crate::error::ReportError;
use crate::types::ReportStatus;

/// Validates a status transition.
///
/// # Errors
/// `ReportError::InvalidTransition` if the table forbids `from -> to`.
pub fn validate_transition(from: ReportStatus, to: ReportStatus) -> Result<(), ReportError> {
    if allowed(from, to) {
        Ok(())
    } else {
        Err(ReportError::InvalidTransition { from, to })
    }
}

/// Statuses reachable in one step from `from`, excluding itself.
#[must_use]
pub fn allowed_transitions(from: ReportStatus) -> Vec<ReportStatus> {
    match from {
        ReportStatus::GeneratingOutline => vec![ReportStatus::GeneratingSections, ReportStatus::Error],
        ReportStatus::GeneratingSections => vec![ReportStatus::Finalizing, ReportStatus::Error],
        ReportStatus::Finalizing => vec![ReportStatus::Completed, ReportStatus::Error],
        ReportStatus::Completed | ReportStatus::Error => vec![],
    }
}

fn allowed(from: ReportStatus, to: ReportStatus) -> bool {
    (from == to && !from.is_terminal()) || allowed_transitions(from).contains(&to)
}
