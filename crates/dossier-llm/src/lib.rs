//! Dossier LLM - HTTP Generation Service
//!
//! Implements [`dossier_core::GenerationService`] against any server that
//! speaks the OpenAI chat-completions protocol.

#![warn(unreachable_pub)]

mod backend;
mod client;
pub mod settings;

pub use backend::OpenAiCompatibleGenerator;
pub use settings::{BackendSettings, SettingsError, DEFAULT_BASE_URL};
