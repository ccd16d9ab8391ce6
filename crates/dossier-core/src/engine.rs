//! Report engine
//!
//! The facade callers use. It owns the shared store and:
//! - validates and admits report requests, spawning one worker each
//! - answers status, summary and listing queries
//! - renders completed reports through the configured exporter
//! - serves free-form chat against the same Generation Service
//! - starts the reclamation sweeper

use crate::config::EngineConfig;
use crate::error::ReportError;
use crate::export::{artifact_file_name, DocumentExporter, MarkdownExporter};
use crate::generation::{GenerationParams, GenerationRequest, GenerationService};
use crate::store::{ImportSummary, SessionStore, StoreSnapshot, StoreStatistics};
use crate::sweeper::ReclamationSweeper;
use crate::types::{Outline, ReportId, ReportRecord, ReportStatus, ReportSummary};
use crate::worker::{ReportJob, ReportWorker, WorkerOutcome};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

// Script and event-handler fragments refused in any user-supplied text.
static DISALLOWED_CONTENT: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?is)<script\b.*?</script>",
        r"(?i)javascript:",
        r"(?i)vbscript:",
        r"(?i)onload\s*=",
        r"(?i)onerror\s*=",
        r"(?i)eval\s*\(",
    ])
    .unwrap()
});

/// Reply to an accepted report request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCreated {
    /// Id to poll with
    pub report_id: ReportId,
    /// Always `"generating"`
    pub status: String,
}

/// Progress view of one report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    /// Lifecycle status
    pub status: ReportStatus,
    /// 0..=100
    pub progress: u8,
    /// Outline once generated
    pub outline: Option<Outline>,
    /// Failure message
    pub error: Option<String>,
    /// Sections recorded so far
    pub sections_completed: usize,
    /// Sections declared by the outline
    pub total_sections: usize,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl From<&ReportRecord> for StatusView {
    fn from(record: &ReportRecord) -> Self {
        Self {
            status: record.status,
            progress: record.progress,
            outline: record.outline.clone(),
            error: record.error.clone(),
            sections_completed: record.sections_completed(),
            total_sections: record.total_sections(),
            created_at: record.created_at,
        }
    }
}

/// Summary view of one report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryView {
    /// Subject
    pub topic: String,
    /// Lifecycle status
    pub status: ReportStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
    /// Successful fetches
    pub download_count: u64,
    /// Derived statistics, present once completed
    pub summary: Option<ReportSummary>,
}

impl From<&ReportRecord> for SummaryView {
    fn from(record: &ReportRecord) -> Self {
        Self {
            topic: record.topic.clone(),
            status: record.status,
            created_at: record.created_at,
            completed_at: record.completed_at,
            download_count: record.download_count,
            summary: record.summary.clone(),
        }
    }
}

/// A rendered document, also written to the artifact directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    /// Source report
    pub report_id: ReportId,
    /// Suggested download name
    pub file_name: String,
    /// Media type
    pub media_type: String,
    /// Where the file was written
    pub path: PathBuf,
    /// Document bytes
    pub bytes: Vec<u8>,
    /// Download count after this fetch
    pub download_count: u64,
}

/// Per-call overrides for chat
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Output size; clamped to the configured limit
    pub max_tokens: Option<u32>,
    /// Temperature; clamped into the configured range
    pub temperature: Option<f32>,
    /// Allow deliberation
    pub deliberation: Option<bool>,
}

/// Chat answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    /// Answer text
    pub message: String,
    /// Deliberation text, when present
    pub thinking: Option<String>,
    /// Reply time
    pub timestamp: DateTime<Utc>,
}

/// Health of the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Generation Service ready for work
    pub ready: bool,
    /// Generation Service name
    pub generator: String,
    /// Active pool size
    pub active_reports: usize,
    /// Completed pool size
    pub completed_reports: usize,
    /// Configured capacity
    pub max_active_reports: usize,
}

/// Report generation engine
pub struct ReportEngine {
    config: EngineConfig,
    store: Arc<SessionStore>,
    generator: Arc<dyn GenerationService>,
    exporter: Arc<dyn DocumentExporter>,
}

impl std::fmt::Debug for ReportEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportEngine")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("generator", &self.generator.name())
            .field("exporter", &self.exporter.format())
            .finish()
    }
}

impl ReportEngine {
    /// Create new engine with the Markdown exporter
    ///
    /// # Errors
    /// `ReportError::Config` if `config` fails [`EngineConfig::validate`].
    pub fn new(
        config: EngineConfig,
        generator: Arc<dyn GenerationService>,
    ) -> Result<Self, ReportError> {
        config.validate()?;
        let store = Arc::new(SessionStore::new(config.max_active_reports));
        Ok(Self {
            config,
            store,
            generator,
            exporter: Arc::new(MarkdownExporter),
        })
    }

    /// Use a different document exporter
    #[must_use]
    pub fn with_exporter(mut self, exporter: Arc<dyn DocumentExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    /// Get configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared session store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Accept a report request and start generating it in the background
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    /// - `ReportError::InvalidInput` for an empty or oversized topic, or
    ///   oversized requirements
    /// - `ReportError::GeneratorUnavailable` if the service is not ready
    /// - `ReportError::CapacityExceeded` if the active pool is full
    pub fn create_report(
        &self,
        topic: &str,
        requirements: &str,
    ) -> Result<ReportCreated, ReportError> {
        self.submit(topic, requirements).map(|(created, _)| created)
    }

    /// Like [`Self::create_report`], also returning the worker handle
    ///
    /// # Errors
    /// Same as [`Self::create_report`].
    pub fn submit(
        &self,
        topic: &str,
        requirements: &str,
    ) -> Result<(ReportCreated, JoinHandle<WorkerOutcome>), ReportError> {
        let (topic, requirements) = self.validate_request(topic, requirements)?;
        self.ensure_ready()?;

        let id = self.store.create(topic, requirements)?;
        let worker = ReportWorker::new(
            self.store.clone(),
            self.generator.clone(),
            self.config.generation.clone(),
        );
        let handle = worker.spawn(ReportJob::new(id, topic, requirements));

        Ok((
            ReportCreated {
                report_id: id,
                status: "generating".to_string(),
            },
            handle,
        ))
    }

    /// Current progress of a report
    ///
    /// # Errors
    /// - `ReportError::NotFound` if the id is in neither pool
    pub fn status(&self, id: ReportId) -> Result<StatusView, ReportError> {
        self.store
            .inspect(id, |record| StatusView::from(record))
            .ok_or(ReportError::NotFound(id))
    }

    /// Summary of a report
    ///
    /// # Errors
    /// - `ReportError::NotFound` if the id is in neither pool
    pub fn summary(&self, id: ReportId) -> Result<SummaryView, ReportError> {
        self.store
            .inspect(id, |record| SummaryView::from(record))
            .ok_or(ReportError::NotFound(id))
    }

    /// Render a completed report and write it to the artifact directory
    ///
    /// Counts as a download once the file is written and registered. A
    /// previous file in the same format is replaced.
    ///
    /// # Errors
    /// - `ReportError::NotFound` if the id is in neither pool
    /// - `ReportError::NotCompleted` if the report has not completed
    /// - `ReportError::Export` if rendering fails
    /// - `ReportError::Io` if the file cannot be written
    pub fn download(&self, id: ReportId) -> Result<RenderedArtifact, ReportError> {
        let record = self.store.get(id).ok_or(ReportError::NotFound(id))?;
        if !record.is_downloadable() {
            return Err(ReportError::NotCompleted {
                id,
                status: record.status,
            });
        }

        let bytes = self.exporter.render(&record)?;

        let file_name = artifact_file_name(&record.topic, Utc::now(), self.exporter.extension());
        let dir = self.config.artifact_dir.join(id.to_string());
        let path = dir.join(&file_name);
        if let Err(e) = std::fs::create_dir_all(&dir).and_then(|()| std::fs::write(&path, &bytes)) {
            discard_artifact(&path);
            return Err(e.into());
        }

        match self
            .store
            .attach_artifact(id, self.exporter.format(), path.clone())
        {
            Ok(Some(previous)) if previous != path => remove_file_quietly(&previous),
            Ok(_) => {}
            Err(e) => {
                discard_artifact(&path);
                return Err(e);
            }
        }

        // A delete racing this call has already removed the attached file.
        let download_count = self
            .store
            .increment_downloads(id)
            .ok_or(ReportError::NotFound(id))?;

        tracing::info!(
            report_id = %id,
            format = self.exporter.format(),
            path = %path.display(),
            "report rendered"
        );

        Ok(RenderedArtifact {
            report_id: id,
            file_name,
            media_type: self.exporter.media_type().to_string(),
            path,
            bytes,
            download_count,
        })
    }

    /// All reports, newest first
    #[must_use]
    pub fn list(&self) -> Vec<ReportRecord> {
        let mut records = self.store.list_all();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Delete a report and its artifact files
    ///
    /// # Errors
    /// - `ReportError::NotFound` if the id is in neither pool
    pub fn delete(&self, id: ReportId) -> Result<(), ReportError> {
        if self.store.delete(id) {
            Ok(())
        } else {
            Err(ReportError::NotFound(id))
        }
    }

    /// Aggregate counters
    #[must_use]
    pub fn statistics(&self) -> StoreStatistics {
        self.store.statistics()
    }

    /// Readiness and pool sizes
    #[must_use]
    pub fn service_status(&self) -> ServiceStatus {
        ServiceStatus {
            ready: self.generator.is_ready(),
            generator: self.generator.name().to_string(),
            active_reports: self.store.count_active(),
            completed_reports: self.store.count_completed(),
            max_active_reports: self.store.max_active(),
        }
    }

    /// Free-form question to the Generation Service
    ///
    /// # Errors
    /// - `ReportError::InvalidInput` for an empty or oversized message
    /// - `ReportError::GeneratorUnavailable` if the service is not ready
    /// - `ReportError::Generation` if the call fails
    pub async fn chat(&self, message: &str, options: ChatOptions) -> Result<ChatReply, ReportError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ReportError::InvalidInput("message must not be empty".into()));
        }
        let max = self.config.input.max_message_chars;
        if message.chars().count() > max {
            return Err(ReportError::InvalidInput(format!(
                "message exceeds {max} characters"
            )));
        }
        reject_disallowed("message", message)?;
        self.ensure_ready()?;

        let defaults = self.config.generation.chat;
        let params = GenerationParams::new(
            options.max_tokens.unwrap_or(defaults.max_tokens),
            options.temperature.unwrap_or(defaults.temperature),
            options.deliberation.unwrap_or(defaults.deliberation),
        )
        .clamped(&self.config.generation.limits);

        tracing::debug!(
            max_tokens = params.max_tokens,
            temperature = params.temperature,
            deliberation = params.deliberation,
            "chat request"
        );
        let output = self
            .generator
            .generate(GenerationRequest::chat(message, params))
            .await?;

        Ok(ChatReply {
            message: output.text,
            thinking: output.thinking,
            timestamp: Utc::now(),
        })
    }

    /// Sweeper over this engine's store with the configured policy
    #[must_use]
    pub fn sweeper(&self) -> ReclamationSweeper {
        ReclamationSweeper::new(
            self.store.clone(),
            self.config.retention(),
            self.config.report_timeout(),
            self.config.sweep_interval(),
        )
    }

    /// Start the recurring sweep; runs until the handle is aborted
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        self.sweeper().spawn()
    }

    /// Copy of both pools
    #[must_use]
    pub fn export_snapshot(&self) -> StoreSnapshot {
        self.store.export_snapshot()
    }

    /// Merge a snapshot into the store
    pub fn import_snapshot(&self, snapshot: StoreSnapshot) -> ImportSummary {
        self.store.import_snapshot(snapshot)
    }

    fn validate_request<'a>(
        &self,
        topic: &'a str,
        requirements: &'a str,
    ) -> Result<(&'a str, &'a str), ReportError> {
        let limits = &self.config.input;
        let topic = topic.trim();
        let requirements = requirements.trim();

        if topic.is_empty() {
            return Err(ReportError::InvalidInput("topic must not be empty".into()));
        }
        if topic.chars().count() > limits.max_topic_chars {
            return Err(ReportError::InvalidInput(format!(
                "topic exceeds {} characters",
                limits.max_topic_chars
            )));
        }
        if requirements.chars().count() > limits.max_requirements_chars {
            return Err(ReportError::InvalidInput(format!(
                "requirements exceed {} characters",
                limits.max_requirements_chars
            )));
        }
        reject_disallowed("topic", topic)?;
        reject_disallowed("requirements", requirements)?;
        Ok((topic, requirements))
    }

    fn ensure_ready(&self) -> Result<(), ReportError> {
        if self.generator.is_ready() {
            Ok(())
        } else {
            Err(ReportError::GeneratorUnavailable(format!(
                "{} is not ready",
                self.generator.name()
            )))
        }
    }
}

fn reject_disallowed(field: &str, text: &str) -> Result<(), ReportError> {
    if DISALLOWED_CONTENT.is_match(text) {
        Err(ReportError::InvalidInput(format!(
            "{field} contains disallowed content"
        )))
    } else {
        Ok(())
    }
}

// Remove a file that was never registered, and its report directory if empty.
fn discard_artifact(path: &Path) {
    remove_file_quietly(path);
    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir(dir);
    }
}

fn remove_file_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove replaced artifact");
        }
    }
}
