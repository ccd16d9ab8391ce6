//! Shared HTTP client with timeout and retry policy
//!
//! Whether a failure is retried is decided by
//! [`GenerationError::is_retryable`]:
//! - 4xx: returned immediately as `Rejected`
//! - 5xx and transport failures: retried with exponential backoff
//! - timeouts: returned immediately

use crate::settings::{BackendSettings, SettingsError};
use dossier_core::GenerationError;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

static URL_WITH_CREDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(https?://)[^:@\s]+:[^@\s]+@").unwrap());

static BEARER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9._\-]+").unwrap());

/// Strip credentials from text that may end up in logs
pub(crate) fn redact(message: &str) -> String {
    let message = URL_WITH_CREDS.replace_all(message, "${1}[REDACTED]@");
    BEARER.replace_all(&message, "Bearer [REDACTED]").into_owned()
}

#[derive(Debug, Clone)]
pub(crate) struct HttpClient {
    client: Client,
    timeout: Duration,
    max_retries: u32,
    settings: BackendSettings,
}

impl HttpClient {
    pub(crate) fn new(settings: &BackendSettings) -> Result<Self, SettingsError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .use_rustls_tls()
            .build()
            .map_err(|e| SettingsError::Client(e.to_string()))?;

        Ok(Self {
            client,
            timeout: settings.timeout(),
            max_retries: settings.max_retries,
            settings: settings.clone(),
        })
    }

    pub(crate) fn inner(&self) -> &Client {
        &self.client
    }

    pub(crate) async fn execute_with_retry(
        &self,
        request: RequestBuilder,
    ) -> Result<Response, GenerationError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let built = request
                .try_clone()
                .ok_or_else(|| GenerationError::Transport("request body not cloneable".into()))?
                .timeout(self.timeout)
                .build()
                .map_err(|e| GenerationError::Transport(redact(&e.to_string())))?;

            tracing::debug!(attempt, timeout_secs = self.timeout.as_secs(), "sending generation request");

            let error = match self.client.execute(built).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let body = response.text().await.unwrap_or_default();
                    GenerationError::Rejected {
                        status: status.as_u16(),
                        message: redact(body.trim()),
                    }
                }
                Err(e) => classify(&e, self.timeout),
            };

            if !error.is_retryable() || attempt > self.max_retries {
                return Err(error);
            }
            let backoff = self.settings.backoff(attempt);
            tracing::warn!(
                attempt,
                backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "generation request failed, will retry"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

fn classify(error: &reqwest::Error, timeout: Duration) -> GenerationError {
    if error.is_timeout() {
        GenerationError::Timeout {
            secs: timeout.as_secs(),
        }
    } else {
        GenerationError::Transport(redact(&error.to_string()))
    }
}
