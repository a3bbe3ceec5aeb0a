//! The real Gmail-backed `MailSource`.

use async_trait::async_trait;
use base64::Engine;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{send_with_retry, GmailError, MailSource, MessageMeta, RetryPolicy, SendReceipt};
use crate::config::AuthConfig;
use crate::store::GmailConnection;
use crate::util::{parse_iso, to_iso};

const BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageListResponse {
    #[serde(default)]
    messages: Vec<MessageStub>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDetail {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    internal_date: String,
    #[serde(default)]
    payload: Option<MessagePayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePayload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    thread_id: String,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

// ============================================================================
// Client
// ============================================================================

struct AuthState {
    access_token: String,
    expires_at: Option<String>,
}

pub struct GmailClient {
    http: reqwest::Client,
    auth: RwLock<AuthState>,
    refresh_token: Option<String>,
    client_id: String,
    client_secret: String,
    policy: RetryPolicy,
}

impl GmailClient {
    pub fn from_connection(conn: &GmailConnection, oauth: &AuthConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth: RwLock::new(AuthState {
                access_token: conn.access_token.clone(),
                expires_at: conn.expires_at.clone(),
            }),
            refresh_token: conn.refresh_token.clone(),
            client_id: oauth.client_id.clone(),
            client_secret: oauth.client_secret.clone(),
            policy: RetryPolicy::default(),
        }
    }

    /// Current token state, for persisting after a refresh.
    pub async fn token_snapshot(&self) -> (String, Option<String>) {
        let auth = self.auth.read().await;
        (auth.access_token.clone(), auth.expires_at.clone())
    }

    /// The bearer token to use for the next request, refreshing first when
    /// the stored one expires within the next minute.
    async fn bearer(&self) -> Result<String, GmailError> {
        {
            let auth = self.auth.read().await;
            let expiring = auth
                .expires_at
                .as_deref()
                .map(|at| parse_iso(at) <= Utc::now() + ChronoDuration::seconds(60))
                .unwrap_or(false);
            if !expiring || self.refresh_token.is_none() {
                return Ok(auth.access_token.clone());
            }
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<String, GmailError> {
        let Some(refresh_token) = self.refresh_token.as_deref() else {
            return Err(GmailError::AuthExpired);
        };

        let resp = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GmailError::RefreshFailed(format!("{}: {}", status, body)));
        }

        let refreshed: RefreshResponse = resp.json().await?;
        let expires_at = refreshed
            .expires_in
            .map(|secs| to_iso(Utc::now() + ChronoDuration::seconds(secs)));

        let mut auth = self.auth.write().await;
        auth.access_token = refreshed.access_token.clone();
        auth.expires_at = expires_at;
        log::info!("Refreshed Gmail access token");
        Ok(refreshed.access_token)
    }

    async fn list_page(
        &self,
        query: &str,
        max_results: usize,
        page_token: Option<&str>,
    ) -> Result<MessageListResponse, GmailError> {
        let token = self.bearer().await?;
        let mut params: Vec<(&str, String)> = vec![
            ("q", query.to_string()),
            ("maxResults", max_results.to_string()),
        ];
        if let Some(page) = page_token {
            params.push(("pageToken", page.to_string()));
        }

        let resp = send_with_retry(
            self.http
                .get(format!("{}/messages", BASE_URL))
                .bearer_auth(&token)
                .query(&params),
            &self.policy,
        )
        .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GmailError::AuthExpired);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GmailError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl MailSource for GmailClient {
    async fn list_message_ids(&self, query: &str, cap: usize) -> Result<Vec<String>, GmailError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        while ids.len() < cap {
            let remaining = (cap - ids.len()).min(100);
            let page = self
                .list_page(query, remaining, page_token.as_deref())
                .await?;
            ids.extend(page.messages.into_iter().map(|m| m.id));
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        ids.truncate(cap);
        Ok(ids)
    }

    async fn fetch_metadata(&self, id: &str) -> Result<Option<MessageMeta>, GmailError> {
        let token = self.bearer().await?;
        let resp = send_with_retry(
            self.http
                .get(format!("{}/messages/{}", BASE_URL, id))
                .bearer_auth(&token)
                .query(&[
                    ("format", "metadata"),
                    ("metadataHeaders", "From"),
                    ("metadataHeaders", "To"),
                    ("metadataHeaders", "Cc"),
                    ("metadataHeaders", "Subject"),
                ]),
            &self.policy,
        )
        .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GmailError::AuthExpired);
        }
        if !status.is_success() {
            log::debug!("Skipping message {}: status {}", id, status);
            return Ok(None);
        }

        let detail: MessageDetail = match resp.json().await {
            Ok(d) => d,
            Err(e) => {
                log::debug!("Skipping message {}: {}", id, e);
                return Ok(None);
            }
        };

        let headers = detail
            .payload
            .as_ref()
            .map(|p| &p.headers[..])
            .unwrap_or(&[]);
        let get_header = |name: &str| -> String {
            headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.clone())
                .unwrap_or_default()
        };

        Ok(Some(MessageMeta {
            id: detail.id,
            thread_id: detail.thread_id,
            from: get_header("From"),
            to: get_header("To"),
            cc: get_header("Cc"),
            subject: get_header("Subject"),
            snippet: detail.snippet,
            internal_ms: detail.internal_date.parse().unwrap_or(0),
        }))
    }

    async fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
        thread_id: Option<&str>,
    ) -> Result<SendReceipt, GmailError> {
        let rfc2822 = format!(
            "To: {}\r\nSubject: {}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{}",
            to, subject, body
        );
        let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(rfc2822.as_bytes());

        let mut payload = serde_json::json!({ "raw": raw });
        if let Some(tid) = thread_id {
            if !tid.is_empty() {
                payload["threadId"] = serde_json::Value::String(tid.to_string());
            }
        }

        let token = self.bearer().await?;
        let resp = send_with_retry(
            self.http
                .post(format!("{}/messages/send", BASE_URL))
                .bearer_auth(&token)
                .json(&payload),
            &self.policy,
        )
        .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GmailError::AuthExpired);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GmailError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let sent: SendResponse = resp.json().await?;
        log::info!("Sent message {} to {}", sent.id, to);
        Ok(SendReceipt {
            message_id: sent.id,
            thread_id: sent.thread_id,
        })
    }

    async fn has_reply_after(&self, address: &str, after_unix: i64) -> Result<bool, GmailError> {
        let query = format!("from:{} after:{}", address, after_unix);
        let page = self.list_page(&query, 1, None).await?;
        Ok(!page.messages.is_empty())
    }
}
