//! Testing utilities for the Dossier workspace
//!
//! Generation Service doubles, outline fixtures, and polling helpers.

#![allow(missing_docs)]

use async_trait::async_trait;
use dossier_core::{
    EngineConfig, GenerationError, GenerationKind, GenerationOutput, GenerationRequest,
    GenerationService, ReportEngine, ReportId, ReportStatus, StatusView,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

pub const THREE_SECTION_OUTLINE: &str = r#"Sure, here is the outline.
```json
{
  "title": "The State of the Economy",
  "abstract": "An overview of growth, prices and policy.",
  "sections": [
    {"id": "1", "title": "Growth", "description": "Output and employment"},
    {"id": "2", "title": "Prices", "description": "Inflation dynamics"},
    {"id": "3", "title": "Policy", "description": "Monetary and fiscal stance"}
  ]
}
```"#;

pub const TWO_SECTION_OUTLINE: &str = r#"{
  "title": "Trade",
  "abstract": "Exports and imports.",
  "sections": [
    {"id": "1", "title": "Exports", "description": "Goods leaving"},
    {"id": "2", "title": "Imports", "description": "Goods arriving"}
  ]
}"#;

pub const EMPTY_OUTLINE: &str = r#"{"title": "Nothing", "abstract": "", "sections": []}"#;

pub const MALFORMED_OUTLINE: &str = "I would rather write an essay than an outline.";

/// Outline JSON with `n` sections titled `Section 1..=n`
pub fn outline_json(n: usize) -> String {
    let sections: Vec<String> = (1..=n)
        .map(|i| format!(r#"{{"id": "{i}", "title": "Section {i}", "description": "Part {i}"}}"#))
        .collect();
    format!(
        r#"{{"title": "Generated", "abstract": "Abstract.", "sections": [{}]}}"#,
        sections.join(", ")
    )
}

/// Text a [`ScriptedGenerator`] returns for a section without a scripted reply
pub fn default_section_text(section_id: &str) -> String {
    format!("Content for section {section_id}.")
}

/// Generation Service answering from a script and recording every request
#[derive(Debug)]
pub struct ScriptedGenerator {
    outlines: Mutex<VecDeque<Result<String, GenerationError>>>,
    default_outline: Result<String, GenerationError>,
    sections: Mutex<HashMap<String, Result<String, GenerationError>>>,
    chat: Mutex<Result<String, GenerationError>>,
    calls: Mutex<Vec<GenerationRequest>>,
    ready: AtomicBool,
}

impl ScriptedGenerator {
    /// Three-section outline, every section succeeds
    pub fn new() -> Self {
        Self {
            outlines: Mutex::new(VecDeque::new()),
            default_outline: Ok(THREE_SECTION_OUTLINE.to_string()),
            sections: Mutex::new(HashMap::new()),
            chat: Mutex::new(Ok("Hello.".to_string())),
            calls: Mutex::new(Vec::new()),
            ready: AtomicBool::new(true),
        }
    }

    /// Outline returned when no queued reply is left
    pub fn with_outline(mut self, text: impl Into<String>) -> Self {
        self.default_outline = Ok(text.into());
        self
    }

    /// Queue a reply for the next outline call
    pub fn push_outline(&self, reply: Result<String, GenerationError>) {
        self.outlines.lock().push_back(reply);
    }

    /// Outline calls fail with `error` when no queued reply is left
    pub fn with_outline_failure(mut self, error: GenerationError) -> Self {
        self.default_outline = Err(error);
        self
    }

    /// Fixed reply for one section id
    pub fn with_section_text(self, section_id: &str, text: impl Into<String>) -> Self {
        self.sections
            .lock()
            .insert(section_id.to_string(), Ok(text.into()));
        self
    }

    /// Calls for one section id fail
    pub fn with_section_failure(self, section_id: &str) -> Self {
        self.sections.lock().insert(
            section_id.to_string(),
            Err(GenerationError::Rejected {
                status: 500,
                message: "internal error".into(),
            }),
        );
        self
    }

    /// Raw chat reply, split on the deliberation marker per request
    pub fn with_chat_reply(self, raw: impl Into<String>) -> Self {
        *self.chat.lock() = Ok(raw.into());
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Requests seen so far, in call order
    pub fn calls(&self) -> Vec<GenerationRequest> {
        self.calls.lock().clone()
    }

    /// Section ids requested so far, in call order
    pub fn section_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|r| match &r.kind {
                GenerationKind::Section { section_id } => Some(section_id.clone()),
                _ => None,
            })
            .collect()
    }

    fn reply(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        match &request.kind {
            GenerationKind::Outline => self
                .outlines
                .lock()
                .pop_front()
                .unwrap_or_else(|| self.default_outline.clone()),
            GenerationKind::Section { section_id } => self
                .sections
                .lock()
                .get(section_id)
                .cloned()
                .unwrap_or_else(|| Ok(default_section_text(section_id))),
            GenerationKind::Chat => self.chat.lock().clone(),
        }
    }
}

impl Default for ScriptedGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationService for ScriptedGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        self.calls.lock().push(request.clone());
        let raw = self.reply(&request)?;
        Ok(GenerationOutput::from_raw(&raw, request.params.deliberation))
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Wraps a generator so every call waits for a permit
///
/// Lets tests hold a report at a known stage while they act on the store.
#[derive(Debug)]
pub struct GatedGenerator {
    inner: Arc<ScriptedGenerator>,
    gate: Semaphore,
    waiting: AtomicUsize,
    arrived: Notify,
}

impl GatedGenerator {
    /// Gate closed: no call proceeds until [`Self::release`]
    pub fn new(inner: Arc<ScriptedGenerator>) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
            waiting: AtomicUsize::new(0),
            arrived: Notify::new(),
        }
    }

    /// Let `n` more calls through
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    /// Let every call through from now on; call at most once
    pub fn open(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    /// Calls that have reached the gate so far
    pub fn arrivals(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Wait until `n` calls have reached the gate
    pub async fn wait_for_arrivals(&self, n: usize) {
        loop {
            let notified = self.arrived.notified();
            if self.arrivals() >= n {
                return;
            }
            notified.await;
        }
    }

    pub fn inner(&self) -> &ScriptedGenerator {
        &self.inner
    }
}

#[async_trait]
impl GenerationService for GatedGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        self.arrived.notify_waiters();
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| GenerationError::Unavailable("gate closed".into()))?;
        permit.forget();
        self.inner.generate(request).await
    }

    fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    fn name(&self) -> &str {
        "gated"
    }
}

/// Config with small capacity, artifacts under `dir`
pub fn test_config(dir: &Path) -> EngineConfig {
    EngineConfig::default()
        .with_max_active_reports(3)
        .with_artifact_dir(dir.join("artifacts"))
}

/// Engine over a fresh temp directory
pub fn setup_engine(generator: Arc<dyn GenerationService>) -> (ReportEngine, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let engine = ReportEngine::new(test_config(dir.path()), generator).unwrap();
    (engine, dir)
}

/// Poll until `done` accepts the status; panics after five seconds
pub async fn wait_for<F>(engine: &ReportEngine, id: ReportId, done: F) -> StatusView
where
    F: Fn(&StatusView) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = engine
            .status(id)
            .unwrap_or_else(|e| panic!("report {id} vanished while waiting: {e}"));
        if done(&status) {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "report {id} stuck at {} ({}%)",
            status.status,
            status.progress
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until the report reaches `completed` or `error`
pub async fn wait_until_terminal(engine: &ReportEngine, id: ReportId) -> StatusView {
    wait_for(engine, id, |s| s.status.is_terminal()).await
}

/// Poll until the report reaches `status`
pub async fn wait_for_status(
    engine: &ReportEngine,
    id: ReportId,
    status: ReportStatus,
) -> StatusView {
    wait_for(engine, id, |s| s.status == status).await
}
