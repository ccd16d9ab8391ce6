//! OpenAI-compatible chat-completions backend
//!
//! Every Generation Service request becomes one single-turn chat completion.
//! The deliberation toggle is forwarded as
//! `chat_template_kwargs.enable_thinking`, which template-aware servers use
//! to switch the model's reasoning mode.

use crate::client::HttpClient;
use crate::settings::{BackendSettings, SettingsError};
use async_trait::async_trait;
use dossier_core::{GenerationError, GenerationOutput, GenerationRequest, GenerationService};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Generation Service backed by an OpenAI-compatible HTTP endpoint
#[derive(Debug)]
pub struct OpenAiCompatibleGenerator {
    client: HttpClient,
    settings: BackendSettings,
    ready: AtomicBool,
}

impl OpenAiCompatibleGenerator {
    /// Create new generator
    ///
    /// # Errors
    /// `SettingsError` if the settings are invalid or the client cannot be built.
    pub fn new(settings: BackendSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        let client = HttpClient::new(&settings)?;
        Ok(Self {
            client,
            settings,
            ready: AtomicBool::new(true),
        })
    }

    /// Create from `DOSSIER_LLM_*` environment variables
    ///
    /// # Errors
    /// `SettingsError` if a variable is invalid or the client cannot be built.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::new(BackendSettings::from_env()?)
    }

    /// Settings in use
    #[inline]
    #[must_use]
    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    /// Query the model listing endpoint and record whether the server answered
    pub async fn probe(&self) -> bool {
        let mut request = self
            .client
            .inner()
            .get(self.settings.models_url())
            .timeout(self.settings.timeout());
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let ready = match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(error = %crate::client::redact(&e.to_string()), "readiness probe failed");
                false
            }
        };
        self.ready.store(ready, Ordering::SeqCst);
        tracing::info!(ready, base_url = %self.settings.base_url, "generation backend probed");
        ready
    }

    fn request_body(&self, request: &GenerationRequest) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.params.max_tokens,
            temperature: request.params.temperature,
            stream: false,
            chat_template_kwargs: TemplateKwargs {
                enable_thinking: request.params.deliberation,
            },
        }
    }
}

#[async_trait]
impl GenerationService for OpenAiCompatibleGenerator {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        tracing::debug!(
            kind = ?request.kind,
            model = %self.settings.model,
            max_tokens = request.params.max_tokens,
            temperature = request.params.temperature,
            deliberation = request.params.deliberation,
            "invoking generation backend"
        );

        let body = self.request_body(&request);
        let mut builder = self
            .client
            .inner()
            .post(self.settings.completions_url())
            .json(&body);
        if let Some(key) = &self.settings.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = self.client.execute_with_retry(builder).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Transport(format!("unreadable completion: {e}")))?;

        let output = parsed.into_output(request.params.deliberation)?;
        tracing::debug!(
            chars = output.text.chars().count(),
            thinking = output.thinking.is_some(),
            "generation backend answered"
        );
        Ok(output)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        &self.settings.model
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct TemplateKwargs {
    enable_thinking: bool,
}

#[derive(Debug, Clone, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    chat_template_kwargs: TemplateKwargs,
}

#[derive(Debug, Clone, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

impl CompletionResponse {
    fn into_output(self, deliberation: bool) -> Result<GenerationOutput, GenerationError> {
        let message = self
            .choices
            .into_iter()
            .next()
            .ok_or(GenerationError::EmptyResponse)?
            .message;
        let content = message.content.unwrap_or_default();

        let mut output = GenerationOutput::from_raw(&content, deliberation);
        if output.text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        // Some servers return reasoning in a separate field instead of inline.
        if deliberation && output.thinking.is_none() {
            output.thinking = message
                .reasoning_content
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty());
        }
        Ok(output)
    }
}
