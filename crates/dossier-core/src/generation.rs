//! Generation Service contract
//!
//! The engine talks to the text-generation backend only through
//! [`GenerationService`]. Requests carry the prompt, the sampling
//! parameters, and the kind of call so backends and test doubles can log or
//! route on it.

use crate::config::GenerationLimits;
use crate::error::GenerationError;
use crate::types::SectionDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Marker separating deliberation from the answer in raw model output
pub const DELIBERATION_END_MARKER: &str = "</think>";

/// Sampling parameters for one call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Maximum output size in tokens
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Whether the model may deliberate before answering
    pub deliberation: bool,
}

impl GenerationParams {
    /// Create new parameters
    #[inline]
    #[must_use]
    pub fn new(max_tokens: u32, temperature: f32, deliberation: bool) -> Self {
        Self {
            max_tokens,
            temperature,
            deliberation,
        }
    }

    /// Clamp into the configured bounds
    ///
    /// `limits` must come from a validated configuration. A NaN temperature
    /// becomes the lower bound.
    #[must_use]
    pub fn clamped(self, limits: &GenerationLimits) -> Self {
        let temperature = if self.temperature.is_nan() {
            limits.min_temperature
        } else {
            self.temperature
                .clamp(limits.min_temperature, limits.max_temperature)
        };
        Self {
            max_tokens: self.max_tokens.clamp(1, limits.max_tokens.max(1)),
            temperature,
            deliberation: self.deliberation,
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::new(1024, 0.7, true)
    }
}

/// What a request is for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GenerationKind {
    /// Free-form chat
    Chat,
    /// Report outline
    Outline,
    /// One report section
    Section {
        /// Section id
        section_id: String,
    },
}

/// Input to one Generation Service call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// What the call is for
    pub kind: GenerationKind,
    /// Full prompt text
    pub prompt: String,
    /// Sampling parameters
    pub params: GenerationParams,
}

impl GenerationRequest {
    /// Free-form chat request
    #[must_use]
    pub fn chat(message: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            kind: GenerationKind::Chat,
            prompt: message.into(),
            params,
        }
    }

    /// Outline request for a topic
    #[must_use]
    pub fn outline(topic: &str, requirements: &str, params: GenerationParams) -> Self {
        Self {
            kind: GenerationKind::Outline,
            prompt: outline_prompt(topic, requirements),
            params,
        }
    }

    /// Section request, with the report topic as context
    #[must_use]
    pub fn section(
        section: &SectionDescriptor,
        topic: &str,
        requirements: &str,
        params: GenerationParams,
    ) -> Self {
        Self {
            kind: GenerationKind::Section {
                section_id: section.id.clone(),
            },
            prompt: section_prompt(section, topic, requirements),
            params,
        }
    }
}

/// Generated text
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// Answer text
    pub text: String,
    /// Deliberation text, when enabled and present
    pub thinking: Option<String>,
}

impl GenerationOutput {
    /// Output with answer text only
    #[inline]
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            thinking: None,
        }
    }

    /// Split raw model output on the deliberation marker.
    ///
    /// With deliberation disabled, or no marker present, everything is answer
    /// text. Otherwise text up to the last marker is deliberation.
    #[must_use]
    pub fn from_raw(raw: &str, deliberation: bool) -> Self {
        if deliberation {
            if let Some(idx) = raw.rfind(DELIBERATION_END_MARKER) {
                let thinking = raw[..idx].replace("<think>", "");
                let text = &raw[idx + DELIBERATION_END_MARKER.len()..];
                return Self {
                    text: text.trim_matches('\n').to_string(),
                    thinking: Some(thinking.trim_matches('\n').to_string()),
                };
            }
        }
        Self::text(raw.trim_matches('\n'))
    }
}

/// Text-generation capability used by the worker and chat
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate text for a request
    async fn generate(&self, request: GenerationRequest)
        -> Result<GenerationOutput, GenerationError>;

    /// Whether the service can accept work now
    fn is_ready(&self) -> bool {
        true
    }

    /// Human-readable backend name
    fn name(&self) -> &str {
        "generation-service"
    }
}

fn outline_prompt(topic: &str, requirements: &str) -> String {
    format!(
        r#"As a subject-matter expert, produce a detailed outline for a report on the following topic.

Topic: {topic}
Requirements: {requirements}

Reply with the outline as JSON in exactly this shape. Keep the abstract plain text without markup:

{{
    "title": "Report title",
    "abstract": "Plain-text abstract, at most 150 words",
    "sections": [
        {{
            "id": "1",
            "title": "Section title",
            "description": "What the section covers"
        }}
    ]
}}

Guidelines:
1. The structure must be logical and clearly layered.
2. Every section needs a clear subject and goal.
3. Follow the conventions of an academic report.
4. Output must be valid JSON."#
    )
}

fn section_prompt(section: &SectionDescriptor, topic: &str, requirements: &str) -> String {
    format!(
        r"As a subject-matter expert, write the full content of one report section.

Section title: {title}
Section description: {description}
Report context:
Topic: {topic}
Requirements: {requirements}

Guidelines:
1. Be professional, accurate and substantive.
2. Keep the structure clear and the reasoning rigorous.
3. Include concrete data and cases where relevant.
4. Aim for 800 to 1500 words in an academic register.
5. Do not use Markdown symbols such as # or *.

Output only the section content as plain text.",
        title = section.title,
        description = section.description,
    )
}
