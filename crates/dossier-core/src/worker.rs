//! Orchestration worker
//!
//! One worker per report drives it from outline to completion:
//!
//! 1. Outline call; any failure is fatal and recorded with a fixed message
//! 2. `generating_sections` at progress 20 with the outline attached
//! 3. One call per section, strictly in outline order; a failed call
//!    degrades that section to placeholder text and generation continues
//! 4. `finalizing` at progress 90, then promotion to the completed pool
//!
//! Workers stop quietly once the store reports their record is no longer
//! active (reaped by the sweeper or deleted).

use crate::config::GenerationSettings;
use crate::error::{OutlineError, ReportError};
use crate::generation::{GenerationRequest, GenerationService};
use crate::outline::parse_outline;
use crate::store::{ReportUpdate, SessionStore};
use crate::types::{Outline, ReportId, ReportStatus, SectionRecord};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Progress once the outline is attached
pub const OUTLINE_PROGRESS: u8 = 20;
/// Progress when finalizing starts
pub const FINALIZING_PROGRESS: u8 = 90;
const SECTION_PROGRESS_SPAN: usize = 60;

/// Work item for one report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportJob {
    /// Report id, already present in the store
    pub id: ReportId,
    /// Subject
    pub topic: String,
    /// Extra instructions
    pub requirements: String,
}

impl ReportJob {
    /// Create new job
    #[inline]
    #[must_use]
    pub fn new(id: ReportId, topic: impl Into<String>, requirements: impl Into<String>) -> Self {
        Self {
            id,
            topic: topic.into(),
            requirements: requirements.into(),
        }
    }
}

/// How a worker run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Record promoted to the completed pool
    Completed,
    /// Record moved to `error` with this message
    Failed(String),
    /// Record left the active pool underneath the worker
    Abandoned,
}

/// Progress reported before generating section `index` of `total`
#[inline]
#[must_use]
pub fn section_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return OUTLINE_PROGRESS;
    }
    let step = SECTION_PROGRESS_SPAN * index.min(total) / total;
    OUTLINE_PROGRESS.saturating_add(u8::try_from(step).unwrap_or(u8::MAX))
}

/// Drives reports through the Generation Service
#[derive(Clone)]
pub struct ReportWorker {
    store: Arc<SessionStore>,
    generator: Arc<dyn GenerationService>,
    settings: GenerationSettings,
}

impl std::fmt::Debug for ReportWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportWorker")
            .field("generator", &self.generator.name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ReportWorker {
    /// Create new worker
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        generator: Arc<dyn GenerationService>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            store,
            generator,
            settings,
        }
    }

    /// Run the job on a background task
    pub fn spawn(self, job: ReportJob) -> JoinHandle<WorkerOutcome> {
        let span = tracing::info_span!("report_worker", report_id = %job.id);
        tokio::spawn(async move { self.run(job).await }.instrument(span))
    }

    /// Run the job to the end on the current task
    pub async fn run(&self, job: ReportJob) -> WorkerOutcome {
        match self.drive(&job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = match &e {
                    ReportError::OutlineGenerationFailed(outline) => {
                        outline.report_message().to_string()
                    }
                    other => other.to_string(),
                };
                if e.is_fatal_to_report() {
                    tracing::error!(report_id = %job.id, error = %e, "report failed");
                } else {
                    tracing::warn!(report_id = %job.id, error = %e, "report worker stopped");
                }
                if self.store.mark_error(job.id, message.clone()) {
                    WorkerOutcome::Failed(message)
                } else {
                    WorkerOutcome::Abandoned
                }
            }
        }
    }

    async fn drive(&self, job: &ReportJob) -> Result<WorkerOutcome, ReportError> {
        let outline = self.generate_outline(job).await?;
        let total = outline.section_count();
        tracing::info!(report_id = %job.id, sections = total, "outline ready");

        let attached = self.store.update(
            job.id,
            ReportUpdate::status(ReportStatus::GeneratingSections)
                .with_progress(OUTLINE_PROGRESS)
                .with_outline(outline.clone()),
        )?;
        if !attached {
            return Ok(WorkerOutcome::Abandoned);
        }

        for (index, section) in outline.sections.iter().enumerate() {
            let progressed = self.store.update(
                job.id,
                ReportUpdate::new().with_progress(section_progress(index, total)),
            )?;
            if !progressed {
                return Ok(WorkerOutcome::Abandoned);
            }

            let request = GenerationRequest::section(
                section,
                &job.topic,
                &job.requirements,
                self.settings.section.clamped(&self.settings.limits),
            );
            let record = match self.generator.generate(request).await {
                Ok(output) => SectionRecord::generated(section.title.clone(), output.text),
                Err(source) => {
                    let e = ReportError::SectionGenerationFailed {
                        section: section.id.clone(),
                        source,
                    };
                    tracing::warn!(report_id = %job.id, error = %e, "section degraded to placeholder");
                    SectionRecord::degraded(section.title.clone())
                }
            };

            if !self.store.add_section(job.id, section.id.clone(), record) {
                return Ok(WorkerOutcome::Abandoned);
            }
        }

        let finalizing = self.store.update(
            job.id,
            ReportUpdate::status(ReportStatus::Finalizing).with_progress(FINALIZING_PROGRESS),
        )?;
        if !finalizing {
            return Ok(WorkerOutcome::Abandoned);
        }

        if self.store.complete(job.id) {
            Ok(WorkerOutcome::Completed)
        } else {
            Ok(WorkerOutcome::Abandoned)
        }
    }

    async fn generate_outline(&self, job: &ReportJob) -> Result<Outline, OutlineError> {
        let request = GenerationRequest::outline(
            &job.topic,
            &job.requirements,
            self.settings.outline.clamped(&self.settings.limits),
        );
        let output = self.generator.generate(request).await?;
        parse_outline(&output.text)
    }
}
