//! Shared type definitions for the store layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to store operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A row from `gmail_connections`: one connected mailbox per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailConnection {
    pub user_email: String,
    pub connected_email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<String>,
    pub updated_at: String,
}

impl GmailConnection {
    /// Domain the connected mailbox lives on ("" when malformed).
    pub fn own_domain(&self) -> String {
        crate::util::domain_of(&self.connected_email)
    }
}

/// A row from `crm_connections`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmConnection {
    pub user_email: String,
    pub domain: String,
    pub api_token: String,
    pub updated_at: String,
}

/// A scored organization row, keyed by (user, domain).
///
/// The nested detail (stakeholders, threads, topics, snippets) is an
/// explicit typed record serialized to `detail_json` at the store boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationRow {
    pub user_email: String,
    pub domain: String,
    pub name: String,
    pub primary_contact_email: String,
    pub primary_contact_name: String,
    pub last_message_at: String,
    pub threads_count: i64,
    pub message_count: i64,
    pub business_score: i64,
    pub followup_score: i64,
    pub auto_status: String,
    pub auto_reason: Option<String>,
    pub status: String,
    pub summary: String,
    pub detail: OrganizationDetail,
    pub updated_at: String,
}

/// Aggregated per-organization detail persisted as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrganizationDetail {
    pub topics: Vec<String>,
    pub stakeholders: Vec<StakeholderDetail>,
    pub threads: Vec<ThreadDetail>,
    pub snippets: Vec<String>,
    pub days_since_last: i64,
}

/// One stakeholder inside an organization's detail payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StakeholderDetail {
    pub email: String,
    pub name: String,
    pub touches: i64,
    pub last_message_at: String,
}

/// One thread inside an organization's detail payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThreadDetail {
    pub thread_id: String,
    pub subject: String,
    pub last_message_at: String,
    pub messages: i64,
    pub sample: String,
}

/// A row from `drafts`, keyed by (user, domain).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRow {
    pub user_email: String,
    pub domain: String,
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub body: String,
    pub status: String,
    pub updated_at: String,
}

/// A row from `campaigns`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRow {
    pub id: String,
    pub user_email: String,
    pub status: String,
    pub followup_count: i64,
    pub targets_total: i64,
    pub sent_count: i64,
    pub replied_count: i64,
    pub crm_created_count: i64,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub finished_at: Option<String>,
}

impl CampaignRow {
    pub fn is_terminal(&self) -> bool {
        self.status == "done" || self.status == "error"
    }
}

/// A row from `campaign_targets`, keyed by (campaign, domain, recipient).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRow {
    pub campaign_id: String,
    pub domain: String,
    pub to_email: String,
    pub token: String,
    pub subject: String,
    pub body: String,
    pub thread_id: String,
    pub sent_count: i64,
    pub max_sends: i64,
    pub last_sent_at: Option<String>,
    pub next_send_at: Option<String>,
    pub replied_at: Option<String>,
    pub crm_record_id: Option<String>,
    pub status: String,
    pub updated_at: String,
}
