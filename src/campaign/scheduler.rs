//! The campaign scheduler: a long-lived tick loop that advances every
//! running campaign.
//!
//! Each tick walks a campaign's active targets in order: detect replies
//! first, then retire exhausted targets, then send whatever is due. A send
//! failure leaves the target untouched so the next tick retries it, and a
//! failure in one campaign never blocks another.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use super::CampaignError;
use crate::config::Config;
use crate::crm::{Crm, PipedriveClient, ReplyRecord};
use crate::gmail::{GmailClient, MailSource};
use crate::store::{CampaignRow, GmailConnection, Store, TargetRow};
use crate::util::{now_iso, parse_iso, to_iso};

/// Entry point spawned at startup. Never returns.
pub async fn run_campaign_scheduler(store: Arc<Mutex<Store>>, config: Arc<Config>) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.campaign.tick_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    log::info!(
        "Campaign scheduler running (tick every {}s)",
        config.campaign.tick_secs
    );

    loop {
        interval.tick().await;
        if let Err(e) = tick(&store, &config).await {
            log::error!("Campaign tick failed: {}", e);
        }
    }
}

/// One scheduler pass over all running campaigns.
pub async fn tick(store: &Mutex<Store>, config: &Config) -> Result<(), CampaignError> {
    let campaigns = store.lock().list_running_campaigns()?;
    for campaign in campaigns {
        let connection = store.lock().get_gmail_connection(&campaign.user_email)?;
        let Some(connection) = connection else {
            log::error!(
                "Campaign {}: Gmail disconnected for {}",
                campaign.id,
                campaign.user_email
            );
            store
                .lock()
                .set_campaign_error(&campaign.id, "gmail_not_connected")?;
            continue;
        };
        let gmail = Arc::new(GmailClient::from_connection(&connection, &config.auth));
        let mail: Arc<dyn MailSource> = gmail.clone();

        let crm: Option<Arc<dyn Crm>> = store
            .lock()
            .get_crm_connection(&campaign.user_email)?
            .map(|c| Arc::new(PipedriveClient::new(&c.domain, &c.api_token)) as Arc<dyn Crm>);

        if let Err(e) =
            process_campaign(store, &campaign, mail.as_ref(), crm.as_deref(), config).await
        {
            // isolate the failure; other campaigns still get their tick
            log::error!("Campaign {} failed: {}", campaign.id, e);
            store.lock().set_campaign_error(&campaign.id, &e.to_string())?;
        }

        let (access_token, expires_at) = gmail.token_snapshot().await;
        persist_refreshed_tokens(store, &connection, &access_token, expires_at.as_deref())?;
    }
    Ok(())
}

/// Write a mid-tick token refresh back to the store so later ticks start
/// from the fresh token instead of re-refreshing.
fn persist_refreshed_tokens(
    store: &Mutex<Store>,
    connection: &GmailConnection,
    access_token: &str,
    expires_at: Option<&str>,
) -> Result<(), CampaignError> {
    if access_token == connection.access_token {
        return Ok(());
    }
    store
        .lock()
        .update_gmail_tokens(&connection.user_email, access_token, expires_at)?;
    log::debug!("Persisted refreshed Gmail token for {}", connection.user_email);
    Ok(())
}

/// Advance one campaign: process active targets, retry missing CRM records
/// for replied targets, and close the campaign once nothing is active.
pub async fn process_campaign(
    store: &Mutex<Store>,
    campaign: &CampaignRow,
    mail: &dyn MailSource,
    crm: Option<&dyn Crm>,
    config: &Config,
) -> Result<(), CampaignError> {
    let targets = store.lock().list_active_targets(&campaign.id)?;
    for target in targets {
        if let Err(e) = process_target(store, campaign, &target, mail, config).await {
            log::warn!(
                "Campaign {} target {}: {} (left for next tick)",
                campaign.id,
                target.to_email,
                e
            );
        }
    }

    if let Some(crm) = crm {
        let missing = store.lock().list_replied_targets_missing_crm(&campaign.id)?;
        for target in missing {
            if let Err(e) = create_crm_record(store, campaign, &target, crm).await {
                log::warn!(
                    "Campaign {} CRM record for {} failed: {}",
                    campaign.id,
                    target.to_email,
                    e
                );
            }
        }
    }

    if store.lock().count_active_targets(&campaign.id)? == 0 {
        store.lock().set_campaign_status(&campaign.id, "done")?;
        log::info!("Campaign {} done", campaign.id);
    }
    Ok(())
}

/// Advance one active target through its state machine.
async fn process_target(
    store: &Mutex<Store>,
    campaign: &CampaignRow,
    target: &TargetRow,
    mail: &dyn MailSource,
    config: &Config,
) -> Result<(), CampaignError> {
    let now = Utc::now();

    // A reply at any point stops the sequence for this target.
    if target.sent_count > 0 && target.replied_at.is_none() {
        let after = target
            .last_sent_at
            .as_deref()
            .map(|at| parse_iso(at).timestamp())
            .unwrap_or(0);
        if mail.has_reply_after(&target.to_email, after).await? {
            let first_detection = store.lock().mark_target_replied(
                &campaign.id,
                &target.domain,
                &target.to_email,
            )?;
            if first_detection {
                store.lock().bump_campaign_replied(&campaign.id)?;
                log::info!(
                    "Campaign {}: reply from {}",
                    campaign.id,
                    target.to_email
                );
            }
            return Ok(());
        }
    }

    if target.sent_count >= target.max_sends {
        store
            .lock()
            .mark_target_completed(&campaign.id, &target.domain, &target.to_email)?;
        return Ok(());
    }

    if let Some(next) = &target.next_send_at {
        if parse_iso(next) > now {
            return Ok(());
        }
    }

    let (subject, body) = render_variant(target, config);
    let thread = if target.thread_id.is_empty() {
        None
    } else {
        Some(target.thread_id.as_str())
    };
    let receipt = mail.send(&target.to_email, &subject, &body, thread).await?;

    let next_send = to_iso(now + chrono::Duration::days(config.campaign.followup_gap_days.max(1)));
    store.lock().record_target_send(
        &campaign.id,
        &target.domain,
        &target.to_email,
        &receipt.thread_id,
        &next_send,
    )?;
    store.lock().bump_campaign_sent(&campaign.id)?;
    log::info!(
        "Campaign {}: sent step {} to {}",
        campaign.id,
        target.sent_count + 1,
        target.to_email
    );
    Ok(())
}

async fn create_crm_record(
    store: &Mutex<Store>,
    campaign: &CampaignRow,
    target: &TargetRow,
    crm: &dyn Crm,
) -> Result<(), CampaignError> {
    let draft = store
        .lock()
        .get_draft(&campaign.user_email, &target.domain)?;
    let org = store
        .lock()
        .get_organization(&campaign.user_email, &target.domain)?;

    let record_id = crm
        .create_record(&ReplyRecord {
            contact_email: target.to_email.clone(),
            contact_name: draft.map(|d| d.to_name).unwrap_or_default(),
            organization: org.map(|o| o.name).unwrap_or_default(),
            replied_at: target.replied_at.clone().unwrap_or_else(now_iso),
        })
        .await?;

    let recorded = store.lock().set_target_crm_record(
        &campaign.id,
        &target.domain,
        &target.to_email,
        &record_id,
    )?;
    if recorded {
        store.lock().bump_campaign_crm_created(&campaign.id)?;
    }
    Ok(())
}

/// The copy for a target's next send. The first send uses the finalized
/// draft verbatim; follow-ups reply in-thread with a rotating framing line
/// stacked on top of the original body.
pub fn render_variant(target: &TargetRow, config: &Config) -> (String, String) {
    if target.sent_count == 0 {
        return (target.subject.clone(), target.body.clone());
    }
    let framings = &config.campaign.followup_framings;
    let subject = format!("Re: {}", target.subject);
    if framings.is_empty() {
        return (subject, target.body.clone());
    }
    let idx = ((target.sent_count - 1).max(0) as usize) % framings.len();
    let body = format!("{}\n\n{}", framings[idx], target.body);
    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_with_sent(sent: i64) -> TargetRow {
        TargetRow {
            campaign_id: "c1".to_string(),
            domain: "acme.com".to_string(),
            to_email: "jane@acme.com".to_string(),
            token: "tok".to_string(),
            subject: "Quick reconnect".to_string(),
            body: "Hi Jane,\n\nOriginal body.".to_string(),
            thread_id: "t1".to_string(),
            sent_count: sent,
            max_sends: 4,
            last_sent_at: None,
            next_send_at: None,
            replied_at: None,
            crm_record_id: None,
            status: "active".to_string(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_refreshed_token_is_persisted() {
        let store = Mutex::new(Store::open_in_memory().unwrap());
        let conn = GmailConnection {
            user_email: "me@own.com".to_string(),
            connected_email: "me@own.com".to_string(),
            access_token: "tok-old".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Some("2025-06-01T10:00:00+00:00".to_string()),
            updated_at: String::new(),
        };
        store.lock().upsert_gmail_connection(&conn).unwrap();

        // an unchanged token is left alone
        persist_refreshed_tokens(&store, &conn, "tok-old", conn.expires_at.as_deref()).unwrap();
        let loaded = store.lock().get_gmail_connection("me@own.com").unwrap().unwrap();
        assert_eq!(loaded.access_token, "tok-old");

        // a refreshed token lands in the store, refresh token untouched
        persist_refreshed_tokens(&store, &conn, "tok-new", Some("2025-06-01T11:00:00+00:00"))
            .unwrap();
        let loaded = store.lock().get_gmail_connection("me@own.com").unwrap().unwrap();
        assert_eq!(loaded.access_token, "tok-new");
        assert_eq!(loaded.expires_at.as_deref(), Some("2025-06-01T11:00:00+00:00"));
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[test]
    fn test_first_send_is_verbatim() {
        let config = Config::default();
        let (subject, body) = render_variant(&target_with_sent(0), &config);
        assert_eq!(subject, "Quick reconnect");
        assert_eq!(body, "Hi Jane,\n\nOriginal body.");
    }

    #[test]
    fn test_followups_reply_with_rotating_framings() {
        let config = Config::default();
        let framings = &config.campaign.followup_framings;

        let (subject, body) = render_variant(&target_with_sent(1), &config);
        assert_eq!(subject, "Re: Quick reconnect");
        assert!(body.starts_with(&framings[0]));
        assert!(body.ends_with("Original body."));

        let (_, second) = render_variant(&target_with_sent(2), &config);
        assert!(second.starts_with(&framings[1]));

        let (_, third) = render_variant(&target_with_sent(3), &config);
        assert!(third.starts_with(&framings[2]));

        // rotation wraps past the configured framings
        let (_, fourth) = render_variant(&target_with_sent(4), &config);
        assert!(fourth.starts_with(&framings[0]));
    }
}
