//! CRM integration.
//!
//! The `Crm` trait is the seam the campaign scheduler uses when a target
//! replies; the Pipedrive client is the production implementation.

pub mod pipedrive;

pub use pipedrive::PipedriveClient;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrmError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("CRM API error: {0}")]
    Api(String),
}

/// Context for the record created when a campaign target replies.
#[derive(Debug, Clone)]
pub struct ReplyRecord {
    pub contact_email: String,
    pub contact_name: String,
    pub organization: String,
    pub replied_at: String,
}

#[async_trait]
pub trait Crm: Send + Sync {
    /// Create a record for a reply and return its id. Implementations must
    /// reuse an existing person for the same address rather than creating
    /// duplicates.
    async fn create_record(&self, reply: &ReplyRecord) -> Result<String, CrmError>;
}
