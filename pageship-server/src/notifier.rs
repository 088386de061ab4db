//! Delivery of pipeline results to the caller's evaluation callback.
//!
//! Retry policy:
//! - 2xx: delivered
//! - 408, 425, 429, 5xx, transport errors: retried with exponential backoff
//! - any other 4xx: the callback rejected the payload itself, stop
//! - anything else left after redirects: retried

use std::time::Duration;

use serde::Serialize;

use crate::error::NotificationError;

/// Result payload posted to the evaluation callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationPayload {
    pub email: String,
    pub task: String,
    pub round: u8,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
    pub timestamp: String,
}

/// Outcome of a delivery. Logged, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResult {
    pub delivered: bool,
    pub attempts: u32,
    pub last_error: Option<NotificationError>,
}

#[derive(Debug, Clone)]
pub struct NotifierSettings {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub request_timeout: Duration,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl NotifierSettings {
    /// Delay before retry number `attempt` (1-based count of failures so far).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Status partition for callback responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Delivered,
    Retry,
    GiveUp,
}

pub fn classify(status: u16) -> Disposition {
    match status {
        200..=299 => Disposition::Delivered,
        408 | 425 | 429 => Disposition::Retry,
        400..=499 => Disposition::GiveUp,
        _ => Disposition::Retry,
    }
}

#[derive(Clone)]
pub struct Notifier {
    settings: NotifierSettings,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(settings: NotifierSettings) -> Self {
        Self {
            settings,
            http: reqwest::Client::new(),
        }
    }

    /// POST `payload` to `url` until delivered, rejected, or out of attempts.
    pub async fn notify(&self, url: &str, payload: &EvaluationPayload) -> NotificationResult {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let (disposition, error) = self.attempt(url, payload).await;
            match disposition {
                Disposition::Delivered => {
                    tracing::info!(
                        task = %payload.task,
                        url,
                        attempt,
                        "Evaluation callback delivered"
                    );
                    return NotificationResult {
                        delivered: true,
                        attempts: attempt,
                        last_error: None,
                    };
                }
                Disposition::GiveUp => {
                    tracing::error!(
                        task = %payload.task,
                        url,
                        attempt,
                        error = ?error,
                        "Evaluation callback rejected the payload, not retrying"
                    );
                    return NotificationResult {
                        delivered: false,
                        attempts: attempt,
                        last_error: error,
                    };
                }
                Disposition::Retry => {
                    last_error = error;
                    if attempt < max_attempts {
                        let delay = self.settings.backoff(attempt);
                        tracing::warn!(
                            task = %payload.task,
                            url,
                            attempt,
                            retry_in_ms = delay.as_millis() as u64,
                            error = ?last_error,
                            "Evaluation callback failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        tracing::error!(
            task = %payload.task,
            url,
            attempts = max_attempts,
            error = ?last_error,
            "Evaluation callback retries exhausted"
        );
        NotificationResult {
            delivered: false,
            attempts: max_attempts,
            last_error,
        }
    }

    async fn attempt(
        &self,
        url: &str,
        payload: &EvaluationPayload,
    ) -> (Disposition, Option<NotificationError>) {
        let resp = self
            .http
            .post(url)
            .timeout(self.settings.request_timeout)
            .json(payload)
            .send()
            .await;

        match resp {
            Ok(resp) => {
                let status = resp.status().as_u16();
                match classify(status) {
                    Disposition::Delivered => (Disposition::Delivered, None),
                    other => {
                        let body = resp.text().await.unwrap_or_default();
                        (other, Some(NotificationError::Status { status, body }))
                    }
                }
            }
            Err(e) => (
                Disposition::Retry,
                Some(NotificationError::Transport(e.to_string())),
            ),
        }
    }
}
