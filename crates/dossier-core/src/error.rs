//! Error types for Dossier Core
//!
//! Provides error handling for:
//! - Capacity and lookup failures surfaced to callers
//! - Outline failures that are fatal to a report
//! - Generation Service failures
//! - Rendering and artifact I/O failures

use crate::types::{ReportId, ReportStatus};

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Active pool at configured maximum
    #[error("active report limit reached (max: {max})")]
    CapacityExceeded {
        /// Configured maximum
        max: usize,
    },

    /// Outline call failed, was unparseable, or had no sections
    #[error("outline generation failed: {0}")]
    OutlineGenerationFailed(#[from] OutlineError),

    /// A single section failed; recovered locally by the worker
    #[error("section {section} generation failed: {source}")]
    SectionGenerationFailed {
        /// Section id
        section: String,
        /// Underlying failure
        #[source]
        source: GenerationError,
    },

    /// Unknown report id
    #[error("report not found: {0}")]
    NotFound(ReportId),

    /// Report exists but has not reached `completed`
    #[error("report {id} is not completed (status: {status})")]
    NotCompleted {
        /// Report id
        id: ReportId,
        /// Current status
        status: ReportStatus,
    },

    /// Sweeper found the report stuck past the active timeout
    #[error("generation timed out")]
    GenerationTimedOut,

    /// Lifecycle table forbids the transition
    #[error("illegal status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: ReportStatus,
        /// Requested status
        to: ReportStatus,
    },

    /// Caller input rejected
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generation Service not ready to accept work
    #[error("generation service unavailable: {0}")]
    GeneratorUnavailable(String),

    /// Generation Service failure outside report processing (chat)
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// Document rendering failed
    #[error("export failed: {0}")]
    Export(#[from] ExportError),

    /// Artifact file I/O failed
    #[error("artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl ReportError {
    /// Check if the error is a lookup miss
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if the error moves a report to `error` status
    #[inline]
    #[must_use]
    pub fn is_fatal_to_report(&self) -> bool {
        matches!(
            self,
            Self::OutlineGenerationFailed(_) | Self::GenerationTimedOut
        )
    }

    /// Check if the error was caused by the caller's request
    #[inline]
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. }
                | Self::NotFound(_)
                | Self::NotCompleted { .. }
                | Self::InvalidInput(_)
        )
    }
}

/// Reasons an outline is rejected
#[derive(Debug, thiserror::Error)]
pub enum OutlineError {
    /// Generation Service call failed
    #[error("generation call failed: {0}")]
    Generation(#[from] GenerationError),

    /// No embedded JSON object in the response
    #[error("could not parse outline: no structured payload in response")]
    MissingPayload,

    /// Embedded JSON did not match the outline shape
    #[error("could not parse outline: {0}")]
    Malformed(String),

    /// Outline declared zero sections
    #[error("outline contains no sections")]
    NoSections,

    /// Two sections share an id
    #[error("outline declares section id {0:?} more than once")]
    DuplicateSectionId(String),
}

impl OutlineError {
    /// Fixed message recorded on the report
    #[inline]
    #[must_use]
    pub fn report_message(&self) -> &'static str {
        match self {
            Self::Generation(_) => "outline generation failed",
            Self::MissingPayload | Self::Malformed(_) | Self::DuplicateSectionId(_) => {
                "outline parse failed"
            }
            Self::NoSections => "outline contains no sections",
        }
    }
}

/// Generation Service failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    /// Service not ready (still loading, misconfigured)
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Network or protocol failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Service answered with a non-success status
    #[error("request rejected with status {status}: {message}")]
    Rejected {
        /// Status code
        status: u16,
        /// Response body or reason
        message: String,
    },

    /// Service returned no text
    #[error("empty response")]
    EmptyResponse,

    /// Call exceeded its deadline
    #[error("timed out after {secs}s")]
    Timeout {
        /// Deadline in seconds
        secs: u64,
    },
}

impl GenerationError {
    /// Check if a retry could succeed
    ///
    /// Transport failures and server errors are retried. A timed-out call
    /// already used its whole deadline and is not.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            Self::Timeout { .. } | Self::Unavailable(_) | Self::EmptyResponse => false,
        }
    }
}

/// Document rendering failures
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Record has no outline to render
    #[error("report outline is missing")]
    MissingOutline,

    /// Renderer-specific failure
    #[error("render failed: {0}")]
    Render(String),
}
