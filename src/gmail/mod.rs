//! Gmail API v1 client.
//!
//! Direct HTTP via reqwest. The `MailSource` trait is the seam the scan
//! controller and campaign scheduler talk through, so tests can substitute
//! an in-memory mailbox for the real API.

pub mod client;

pub use client::GmailClient;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GmailError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Mail source seam
// ============================================================================

/// Message metadata as the aggregator consumes it: raw headers plus the
/// server-side receive timestamp in epoch milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageMeta {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub to: String,
    pub cc: String,
    pub subject: String,
    pub snippet: String,
    pub internal_ms: i64,
}

/// What a successful send returns: the new message and the thread it
/// landed in.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
    pub thread_id: String,
}

/// The mailbox operations the pipeline needs.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// List message ids matching a Gmail search query, newest first, up to
    /// `cap` ids across pages.
    async fn list_message_ids(&self, query: &str, cap: usize) -> Result<Vec<String>, GmailError>;

    /// Fetch metadata for one message. `Ok(None)` means the message could
    /// not be fetched and should be skipped, not that the scan should stop.
    async fn fetch_metadata(&self, id: &str) -> Result<Option<MessageMeta>, GmailError>;

    /// Send a plain-text message, optionally into an existing thread.
    async fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        thread_id: Option<&str>,
    ) -> Result<SendReceipt, GmailError>;

    /// Whether any message from `address` arrived after the given epoch
    /// second.
    async fn has_reply_after(&self, address: &str, after_unix: i64) -> Result<bool, GmailError>;
}

// ============================================================================
// Retry
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

fn status_is_retryable(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if let Some(value) = retry_after.and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = value.parse::<u64>() {
            return Duration::from_secs(secs.min(30));
        }
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0))
        % 150;
    Duration::from_millis(base.saturating_add(jitter))
}

/// Send a request, retrying transport errors, 429s, and 5xx responses with
/// exponential backoff. Respects Retry-After when Gmail sends one.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, GmailError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(GmailError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                if status_is_retryable(status) && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "gmail retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable_transport = err.is_timeout() || err.is_connect();
                if retryable_transport && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "gmail retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(GmailError::Http(err));
            }
        }
    }

    Err(GmailError::RefreshFailed(
        "request exhausted retries".to_string(),
    ))
}
