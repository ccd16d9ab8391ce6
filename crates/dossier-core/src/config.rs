//! Engine configuration
//!
//! Defaults mirror a small single-node deployment. Values can be overlaid
//! from `DOSSIER_*` environment variables or loaded from TOML.

use crate::error::ReportError;
use crate::generation::GenerationParams;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum reports in the active pool
    pub max_active_reports: usize,
    /// How long completed reports are retained
    pub retention_hours: u64,
    /// How long a report may stay active before it is reaped
    pub report_timeout_minutes: u64,
    /// Sweeper period
    pub sweep_interval_secs: u64,
    /// Status polling period used by clients
    pub polling_interval_secs: u64,
    /// Where rendered artifacts are written
    pub artifact_dir: PathBuf,
    /// Generation parameters per call kind
    pub generation: GenerationSettings,
    /// Input length limits
    pub input: InputLimits,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With max active reports
    #[inline]
    #[must_use]
    pub fn with_max_active_reports(mut self, max: usize) -> Self {
        self.max_active_reports = max;
        self
    }

    /// With retention window for completed reports
    #[inline]
    #[must_use]
    pub fn with_retention_hours(mut self, hours: u64) -> Self {
        self.retention_hours = hours;
        self
    }

    /// With active report timeout
    #[inline]
    #[must_use]
    pub fn with_report_timeout_minutes(mut self, minutes: u64) -> Self {
        self.report_timeout_minutes = minutes;
        self
    }

    /// With sweeper period
    #[inline]
    #[must_use]
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// With artifact directory
    #[inline]
    #[must_use]
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    /// Retention window as a duration
    #[inline]
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }

    /// Active timeout as a duration
    #[inline]
    #[must_use]
    pub fn report_timeout(&self) -> Duration {
        Duration::from_secs(self.report_timeout_minutes.saturating_mul(60))
    }

    /// Sweeper period as a duration
    #[inline]
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Polling period as a duration
    #[inline]
    #[must_use]
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    /// Parse TOML; missing keys take defaults.
    ///
    /// # Errors
    /// `ReportError::Config` on syntax errors or failed validation.
    pub fn from_toml_str(input: &str) -> Result<Self, ReportError> {
        let config: Self =
            toml::from_str(input).map_err(|e| ReportError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// `ReportError::Config` if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ReportError> {
        toml::to_string_pretty(self).map_err(|e| ReportError::Config(e.to_string()))
    }

    /// Defaults overlaid with `DOSSIER_*` environment variables
    ///
    /// # Errors
    /// `ReportError::Config` if a variable does not parse or validation fails.
    pub fn from_env() -> Result<Self, ReportError> {
        Self::default().overlay_env(|key| std::env::var(key).ok())
    }

    /// Overlay values found through `lookup` onto `self`
    ///
    /// # Errors
    /// `ReportError::Config` if a value does not parse or validation fails.
    pub fn overlay_env<F>(mut self, lookup: F) -> Result<Self, ReportError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        env.read("DOSSIER_MAX_ACTIVE_REPORTS", &mut self.max_active_reports)?;
        env.read("DOSSIER_REPORT_CLEANUP_HOURS", &mut self.retention_hours)?;
        env.read("DOSSIER_REPORT_TIMEOUT", &mut self.report_timeout_minutes)?;
        env.read("DOSSIER_SWEEP_INTERVAL_SECS", &mut self.sweep_interval_secs)?;
        env.read("DOSSIER_POLLING_INTERVAL", &mut self.polling_interval_secs)?;
        env.read("DOSSIER_ARTIFACT_DIR", &mut self.artifact_dir)?;
        env.read("DOSSIER_DEFAULT_MAX_TOKENS", &mut self.generation.chat.max_tokens)?;
        env.read("DOSSIER_DEFAULT_TEMPERATURE", &mut self.generation.chat.temperature)?;
        env.read_flag("DOSSIER_ENABLE_THINKING", &mut self.generation.chat.deliberation)?;
        env.read("DOSSIER_MAX_TOPIC_LENGTH", &mut self.input.max_topic_chars)?;
        env.read(
            "DOSSIER_MAX_REQUIREMENTS_LENGTH",
            &mut self.input.max_requirements_chars,
        )?;
        env.read("DOSSIER_MAX_MESSAGE_LENGTH", &mut self.input.max_message_chars)?;

        self.validate()?;
        Ok(self)
    }

    /// Reject configurations the engine cannot run with
    ///
    /// # Errors
    /// `ReportError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<(), ReportError> {
        if self.max_active_reports == 0 {
            return Err(ReportError::Config(
                "max_active_reports must be at least 1".into(),
            ));
        }
        if self.report_timeout_minutes == 0 {
            return Err(ReportError::Config(
                "report_timeout_minutes must be at least 1".into(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ReportError::Config(
                "sweep_interval_secs must be at least 1".into(),
            ));
        }
        let limits = &self.generation.limits;
        let (min, max) = (limits.min_temperature, limits.max_temperature);
        if !(min.is_finite() && max.is_finite() && min <= max) {
            return Err(ReportError::Config(format!(
                "temperature limits must be finite with min <= max, got [{min}, {max}]"
            )));
        }
        for (name, params) in [
            ("chat", &self.generation.chat),
            ("outline", &self.generation.outline),
            ("section", &self.generation.section),
        ] {
            if !params.temperature.is_finite() {
                return Err(ReportError::Config(format!(
                    "generation.{name}.temperature must be finite"
                )));
            }
        }
        if limits.max_tokens == 0 {
            return Err(ReportError::Config("max_tokens limit must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_active_reports: 10,
            retention_hours: 24,
            report_timeout_minutes: 30,
            sweep_interval_secs: 3600,
            polling_interval_secs: 2,
            artifact_dir: std::env::temp_dir().join("dossier-artifacts"),
            generation: GenerationSettings::default(),
            input: InputLimits::default(),
        }
    }
}

/// Generation parameters per call kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Free-form chat defaults
    pub chat: GenerationParams,
    /// Outline calls
    pub outline: GenerationParams,
    /// Section calls
    pub section: GenerationParams,
    /// Hard bounds applied to caller-supplied chat parameters
    pub limits: GenerationLimits,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            chat: GenerationParams::new(1024, 0.7, true),
            outline: GenerationParams::new(1500, 0.3, false),
            section: GenerationParams::new(2000, 0.4, false),
            limits: GenerationLimits::default(),
        }
    }
}

/// Bounds for caller-supplied generation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationLimits {
    /// Upper bound on output size
    pub max_tokens: u32,
    /// Lowest allowed temperature
    pub min_temperature: f32,
    /// Highest allowed temperature
    pub max_temperature: f32,
}

impl Default for GenerationLimits {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            min_temperature: 0.1,
            max_temperature: 2.0,
        }
    }
}

/// Input length limits, in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputLimits {
    /// Topic length
    pub max_topic_chars: usize,
    /// Requirements length
    pub max_requirements_chars: usize,
    /// Chat message length
    pub max_message_chars: usize,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self {
            max_topic_chars: 200,
            max_requirements_chars: 2000,
            max_message_chars: 4000,
        }
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn read<T>(&self, key: &str, slot: &mut T) -> Result<(), ReportError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = (self.lookup)(key) {
            *slot = raw
                .trim()
                .parse()
                .map_err(|e| ReportError::Config(format!("{key}={raw:?}: {e}")))?;
        }
        Ok(())
    }

    fn read_flag(&self, key: &str, slot: &mut bool) -> Result<(), ReportError> {
        if let Some(raw) = (self.lookup)(key) {
            *slot = match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => {
                    return Err(ReportError::Config(format!(
                        "{key}={raw:?}: expected a boolean"
                    )))
                }
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let config = EngineConfig::default();
        assert_eq!(config.max_active_reports, 10);
        assert_eq!(config.retention(), Duration::from_secs(24 * 3600));
        assert_eq!(config.report_timeout(), Duration::from_secs(30 * 60));
        assert_eq!(config.sweep_interval(), Duration::from_secs(3600));
        assert_eq!(config.generation.outline.max_tokens, 1500);
        assert!(!config.generation.section.deliberation);
        assert!(config.generation.chat.deliberation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overlay() {
        let config = EngineConfig::default()
            .overlay_env(lookup(&[
                ("DOSSIER_MAX_ACTIVE_REPORTS", "3"),
                ("DOSSIER_REPORT_TIMEOUT", "5"),
                ("DOSSIER_ENABLE_THINKING", "False"),
                ("DOSSIER_ARTIFACT_DIR", "/tmp/reports"),
            ]))
            .unwrap();
        assert_eq!(config.max_active_reports, 3);
        assert_eq!(config.report_timeout_minutes, 5);
        assert!(!config.generation.chat.deliberation);
        assert_eq!(config.artifact_dir, PathBuf::from("/tmp/reports"));
        assert_eq!(config.retention_hours, 24);
    }

    #[test]
    fn env_overlay_rejects_garbage() {
        let err = EngineConfig::default()
            .overlay_env(lookup(&[("DOSSIER_MAX_ACTIVE_REPORTS", "many")]))
            .unwrap_err();
        assert!(matches!(err, ReportError::Config(msg) if msg.contains("DOSSIER_MAX_ACTIVE_REPORTS")));

        let err = EngineConfig::default()
            .overlay_env(lookup(&[("DOSSIER_ENABLE_THINKING", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ReportError::Config(_)));
    }

    #[test]
    fn toml_partial_document_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            max_active_reports = 4

            [generation.section]
            max_tokens = 3000
            temperature = 0.5
            deliberation = false
            "#,
        )
        .unwrap();
        assert_eq!(config.max_active_reports, 4);
        assert_eq!(config.generation.section.max_tokens, 3000);
        assert_eq!(config.generation.outline.max_tokens, 1500);
        assert_eq!(config.input.max_topic_chars, 200);
    }

    #[test]
    fn toml_round_trip() {
        let config = EngineConfig::default().with_max_active_reports(7);
        let text = config.to_toml_string().unwrap();
        assert_eq!(EngineConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn non_finite_temperature_limits_rejected() {
        let err = EngineConfig::from_toml_str(
            "[generation.limits]\nmax_tokens = 4096\nmin_temperature = nan\nmax_temperature = 2.0\n",
        )
        .unwrap_err();
        assert!(matches!(err, ReportError::Config(msg) if msg.contains("temperature limits")));

        assert!(EngineConfig::from_toml_str(
            "[generation.limits]\nmax_tokens = 4096\nmin_temperature = 0.1\nmax_temperature = inf\n",
        )
        .is_err());
        assert!(EngineConfig::from_toml_str(
            "[generation.limits]\nmax_tokens = 4096\nmin_temperature = 1.5\nmax_temperature = 0.5\n",
        )
        .is_err());
        assert!(EngineConfig::from_toml_str(
            "[generation.chat]\nmax_tokens = 100\ntemperature = nan\ndeliberation = true\n",
        )
        .is_err());
    }

    #[test]
    fn huge_durations_saturate() {
        let mut config = EngineConfig::default();
        config.retention_hours = u64::MAX;
        config.report_timeout_minutes = u64::MAX;
        assert_eq!(config.retention(), Duration::from_secs(u64::MAX));
        assert_eq!(config.report_timeout(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn validation_rejects_zero_capacity() {
        let config = EngineConfig::default().with_max_active_reports(0);
        assert!(matches!(config.validate(), Err(ReportError::Config(_))));
        assert!(EngineConfig::from_toml_str("max_active_reports = 0").is_err());
        assert!(EngineConfig::default()
            .with_sweep_interval_secs(0)
            .validate()
            .is_err());
    }
}
