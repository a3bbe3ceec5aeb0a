//! Outreach campaigns.
//!
//! A campaign snapshots the user's campaign-ready drafts into immutable
//! targets; later edits to drafts or the review queue do not touch a
//! running campaign. One non-terminal campaign per user.

pub mod scheduler;

use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::config::CampaignConfig;
use crate::crm::CrmError;
use crate::gmail::GmailError;
use crate::store::{CampaignRow, DbError, Store, TargetRow};
use crate::util::now_iso;

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("Store: {0}")]
    Db(#[from] DbError),

    #[error("Gmail: {0}")]
    Gmail(#[from] GmailError),

    #[error("CRM: {0}")]
    Crm(#[from] CrmError),

    #[error("A campaign is already active for {0}")]
    AlreadyActive(String),

    #[error("No campaign-ready drafts for {0}")]
    NoReadyDrafts(String),
}

/// Create a campaign from the user's finalized drafts whose organizations
/// are still approved. Every target starts due immediately.
pub fn create_campaign(
    store: &Mutex<Store>,
    config: &CampaignConfig,
    user_email: &str,
) -> Result<CampaignRow, CampaignError> {
    let store = store.lock();

    if let Some(active) = store.find_active_campaign(user_email)? {
        log::warn!(
            "Refusing campaign for {}: {} is still {}",
            user_email,
            active.id,
            active.status
        );
        return Err(CampaignError::AlreadyActive(user_email.to_string()));
    }

    let ready = store.list_campaign_ready_drafts(user_email)?;
    if ready.is_empty() {
        return Err(CampaignError::NoReadyDrafts(user_email.to_string()));
    }

    let now = now_iso();
    let campaign = CampaignRow {
        id: Uuid::new_v4().to_string(),
        user_email: user_email.to_string(),
        status: "running".to_string(),
        followup_count: i64::from(config.followup_count),
        targets_total: ready.len() as i64,
        sent_count: 0,
        replied_count: 0,
        crm_created_count: 0,
        error: None,
        created_at: now.clone(),
        updated_at: now.clone(),
        finished_at: None,
    };
    store.insert_campaign(&campaign)?;

    for draft in &ready {
        store.insert_target(&TargetRow {
            campaign_id: campaign.id.clone(),
            domain: draft.domain.clone(),
            to_email: draft.to_email.clone(),
            token: Uuid::new_v4().to_string(),
            subject: draft.subject.clone(),
            body: draft.body.clone(),
            thread_id: String::new(),
            sent_count: 0,
            max_sends: 1 + i64::from(config.followup_count),
            last_sent_at: None,
            next_send_at: Some(now.clone()),
            replied_at: None,
            crm_record_id: None,
            status: "active".to_string(),
            updated_at: String::new(),
        })?;
    }

    log::info!(
        "Campaign {} created for {} with {} targets",
        campaign.id,
        user_email,
        ready.len()
    );
    Ok(campaign)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DraftRow, OrganizationDetail, OrganizationRow};

    fn seed_ready_draft(store: &Mutex<Store>, domain: &str) {
        let guard = store.lock();
        guard
            .save_organization_rows(&[OrganizationRow {
                user_email: "me@own.com".to_string(),
                domain: domain.to_string(),
                name: domain.to_string(),
                primary_contact_email: format!("jane@{}", domain),
                primary_contact_name: "Jane".to_string(),
                last_message_at: "2025-05-01T09:00:00+00:00".to_string(),
                threads_count: 1,
                message_count: 2,
                business_score: 60,
                followup_score: 61,
                auto_status: "pending".to_string(),
                auto_reason: None,
                status: String::new(),
                summary: String::new(),
                detail: OrganizationDetail::default(),
                updated_at: String::new(),
            }])
            .unwrap();
        guard
            .set_organization_status("me@own.com", domain, "approved")
            .unwrap();
        guard
            .upsert_draft(&DraftRow {
                user_email: "me@own.com".to_string(),
                domain: domain.to_string(),
                to_email: format!("jane@{}", domain),
                to_name: "Jane".to_string(),
                subject: "Quick reconnect".to_string(),
                body: "Hi Jane".to_string(),
                status: "final".to_string(),
                updated_at: String::new(),
            })
            .unwrap();
    }

    #[test]
    fn test_create_campaign_snapshots_targets() {
        let store = Mutex::new(Store::open_in_memory().unwrap());
        seed_ready_draft(&store, "acme.com");
        seed_ready_draft(&store, "beta.io");

        let config = CampaignConfig::default();
        let campaign = create_campaign(&store, &config, "me@own.com").unwrap();
        assert_eq!(campaign.targets_total, 2);
        assert_eq!(campaign.status, "running");

        let targets = store.lock().list_targets(&campaign.id).unwrap();
        assert_eq!(targets.len(), 2);
        let target = &targets[0];
        assert_eq!(target.max_sends, 4);
        assert_eq!(target.sent_count, 0);
        assert!(target.next_send_at.is_some());
        assert!(!target.token.is_empty());
        // tokens are unique per target
        assert_ne!(targets[0].token, targets[1].token);
    }

    #[test]
    fn test_one_campaign_per_user() {
        let store = Mutex::new(Store::open_in_memory().unwrap());
        seed_ready_draft(&store, "acme.com");

        let config = CampaignConfig::default();
        let first = create_campaign(&store, &config, "me@own.com").unwrap();
        assert!(matches!(
            create_campaign(&store, &config, "me@own.com"),
            Err(CampaignError::AlreadyActive(_))
        ));

        // a finished campaign frees the slot
        store.lock().set_campaign_status(&first.id, "done").unwrap();
        assert!(create_campaign(&store, &config, "me@own.com").is_ok());
    }

    #[test]
    fn test_no_ready_drafts_is_an_error() {
        let store = Mutex::new(Store::open_in_memory().unwrap());
        assert!(matches!(
            create_campaign(&store, &CampaignConfig::default(), "me@own.com"),
            Err(CampaignError::NoReadyDrafts(_))
        ));
    }
}
