//! Dossier Core - asynchronous report generation
//!
//! Turns a topic into a multi-section report in the background:
//! - Admits requests into a bounded pool of active reports
//! - Drives each report through outline and section generation
//! - Promotes finished reports to a completed pool for polling and download
//! - Reclaims stale and timed-out reports on a schedule
//!
//! # Example
//!
//! ```rust,ignore
//! use dossier_core::{EngineConfig, ReportEngine};
//! use std::sync::Arc;
//!
//! # async fn example(generator: Arc<dyn dossier_core::GenerationService>) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = ReportEngine::new(EngineConfig::default(), generator)?;
//! let _sweeper = engine.start_sweeper();
//!
//! let created = engine.create_report("Inflation outlook", "")?;
//! let status = engine.status(created.report_id)?;
//! println!("{}: {}%", status.status, status.progress);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod generation;
pub mod lifecycle;
pub mod outline;
pub mod store;
pub mod summary;
pub mod sweeper;
pub mod types;
pub mod worker;

// Re-exports for convenience
pub use config::{EngineConfig, GenerationLimits, GenerationSettings, InputLimits};
pub use engine::{
    ChatOptions, ChatReply, RenderedArtifact, ReportCreated, ReportEngine, ServiceStatus,
    StatusView, SummaryView,
};
pub use error::{ExportError, GenerationError, OutlineError, ReportError};
pub use export::{artifact_file_name, safe_file_stem, DocumentExporter, MarkdownExporter};
pub use generation::{
    GenerationKind, GenerationOutput, GenerationParams, GenerationRequest, GenerationService,
    DELIBERATION_END_MARKER,
};
pub use lifecycle::{allowed_transitions, validate_transition};
pub use outline::parse_outline;
pub use store::{
    ImportSummary, ReportUpdate, SessionStore, StoreSnapshot, StoreStatistics,
};
pub use summary::{compute_summary, format_duration};
pub use sweeper::{ReclamationSweeper, SweepReport};
pub use types::{
    degraded_placeholder, Outline, ReportId, ReportRecord, ReportStatus, ReportSummary,
    SectionDescriptor, SectionRecord,
};
pub use worker::{section_progress, ReportJob, ReportWorker, WorkerOutcome};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Dossier Core
    pub use crate::{
        ChatOptions, EngineConfig, GenerationOutput, GenerationRequest, GenerationService,
        ReportEngine, ReportError, ReportId, ReportStatus, SessionStore,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
