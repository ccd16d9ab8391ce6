//! Backend settings, loaded from `DOSSIER_LLM_*` environment variables

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default endpoint base (a local OpenAI-compatible server)
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/v1";

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Variable present but unparseable
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
    },

    /// Value parsed but unusable
    #[error("invalid backend settings: {0}")]
    Rejected(String),

    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Connection settings for an OpenAI-compatible endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Base URL up to and including the API version segment
    pub base_url: String,
    /// Bearer token; omitted from requests when unset
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Model name sent with every request
    pub model: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Retries after the first attempt for 5xx and transport failures
    pub max_retries: u32,
    /// First backoff; doubles per retry
    pub initial_backoff_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            model: "default".to_string(),
            timeout_secs: 300,
            max_retries: 2,
            initial_backoff_ms: 1000,
        }
    }
}

impl BackendSettings {
    /// Defaults overlaid with the process environment
    ///
    /// # Errors
    /// `SettingsError` if a variable does not parse or the result is unusable.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// Overlay values found through `lookup`
    ///
    /// # Errors
    /// `SettingsError` if a variable does not parse or the result is unusable.
    pub fn overlay_env<F>(mut self, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DOSSIER_LLM_BASE_URL") {
            self.base_url = url;
        }
        if let Some(key) = lookup("DOSSIER_LLM_API_KEY") {
            self.api_key = Some(key).filter(|k| !k.trim().is_empty());
        }
        if let Some(model) = lookup("DOSSIER_LLM_MODEL") {
            self.model = model;
        }
        if let Some(raw) = lookup("DOSSIER_LLM_TIMEOUT_SECS") {
            self.timeout_secs = raw.trim().parse().map_err(|_| SettingsError::Invalid {
                key: "DOSSIER_LLM_TIMEOUT_SECS",
                value: raw,
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject settings no request could succeed with
    ///
    /// # Errors
    /// `SettingsError::Rejected` describing the problem.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(SettingsError::Rejected(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.model.trim().is_empty() {
            return Err(SettingsError::Rejected("model must not be empty".into()));
        }
        if self.timeout_secs == 0 {
            return Err(SettingsError::Rejected("timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Chat-completions endpoint
    #[must_use]
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Model listing endpoint, used as a readiness probe
    #[must_use]
    pub fn models_url(&self) -> String {
        format!("{}/models", self.base_url.trim_end_matches('/'))
    }

    /// Request timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff before retry `attempt` (1-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |key| map.get(key).map(|v| (*v).to_string())
    }

    #[test]
    fn env_overlay() {
        let settings = BackendSettings::default()
            .overlay_env(lookup(&[
                ("DOSSIER_LLM_BASE_URL", "https://llm.internal/v1/"),
                ("DOSSIER_LLM_API_KEY", "sk-test"),
                ("DOSSIER_LLM_MODEL", "econ-8b"),
                ("DOSSIER_LLM_TIMEOUT_SECS", "45"),
            ]))
            .unwrap();
        assert_eq!(settings.completions_url(), "https://llm.internal/v1/chat/completions");
        assert_eq!(settings.models_url(), "https://llm.internal/v1/models");
        assert_eq!(settings.api_key.as_deref(), Some("sk-test"));
        assert_eq!(settings.model, "econ-8b");
        assert_eq!(settings.timeout(), Duration::from_secs(45));
    }

    #[test]
    fn blank_api_key_is_none() {
        let settings = BackendSettings::default()
            .overlay_env(lookup(&[("DOSSIER_LLM_API_KEY", "  ")]))
            .unwrap();
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn bad_values_rejected() {
        let err = BackendSettings::default()
            .overlay_env(lookup(&[("DOSSIER_LLM_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { key: "DOSSIER_LLM_TIMEOUT_SECS", .. }));

        let err = BackendSettings::default()
            .overlay_env(lookup(&[("DOSSIER_LLM_BASE_URL", "ftp://nope")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::Rejected(_)));
    }

    #[test]
    fn backoff_doubles() {
        let settings = BackendSettings::default();
        assert_eq!(settings.backoff(1), Duration::from_secs(1));
        assert_eq!(settings.backoff(2), Duration::from_secs(2));
        assert_eq!(settings.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn api_key_never_serialized() {
        let settings = BackendSettings {
            api_key: Some("sk-secret".into()),
            ..BackendSettings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("sk-secret"));
    }
}
