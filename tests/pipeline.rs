//! End-to-end pipeline tests over an in-memory store with fake mail and
//! CRM backends: scan, review, drafts, campaign ticks, replies, and CRM
//! record creation.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use reconnect::campaign::scheduler::process_campaign;
use reconnect::campaign::{create_campaign, CampaignError};
use reconnect::config::Config;
use reconnect::crm::{Crm, CrmError, ReplyRecord};
use reconnect::drafts::generate_drafts;
use reconnect::gmail::{GmailError, MailSource, MessageMeta, SendReceipt};
use reconnect::scan::controller::run_scan_job;
use reconnect::scan::{JobRegistry, ScanStatus, StartOutcome};
use reconnect::store::Store;

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct FakeMailbox {
    messages: Vec<MessageMeta>,
    replied_addresses: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(String, String, Option<String>)>>,
    fail_sends: AtomicBool,
}

impl FakeMailbox {
    fn mark_replied(&self, address: &str) {
        self.replied_addresses
            .lock()
            .insert(address.to_lowercase());
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl MailSource for FakeMailbox {
    async fn list_message_ids(&self, _query: &str, cap: usize) -> Result<Vec<String>, GmailError> {
        Ok(self
            .messages
            .iter()
            .take(cap)
            .map(|m| m.id.clone())
            .collect())
    }

    async fn fetch_metadata(&self, id: &str) -> Result<Option<MessageMeta>, GmailError> {
        Ok(self.messages.iter().find(|m| m.id == id).cloned())
    }

    async fn send(
        &self,
        to: &str,
        subject: &str,
        _body: &str,
        thread_id: Option<&str>,
    ) -> Result<SendReceipt, GmailError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(GmailError::ApiError {
                status: 500,
                message: "backend unavailable".to_string(),
            });
        }
        self.sent.lock().push((
            to.to_string(),
            subject.to_string(),
            thread_id.map(|t| t.to_string()),
        ));
        Ok(SendReceipt {
            message_id: format!("sent-{}", self.sent.lock().len()),
            thread_id: thread_id
                .map(|t| t.to_string())
                .unwrap_or_else(|| format!("thread-{}", to)),
        })
    }

    async fn has_reply_after(&self, address: &str, _after: i64) -> Result<bool, GmailError> {
        Ok(self
            .replied_addresses
            .lock()
            .contains(&address.to_lowercase()))
    }
}

#[derive(Default)]
struct FakeCrm {
    created: Mutex<Vec<String>>,
    fail: AtomicBool,
    next_id: AtomicI64,
}

#[async_trait]
impl Crm for FakeCrm {
    async fn create_record(&self, reply: &ReplyRecord) -> Result<String, CrmError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CrmError::Api("crm unavailable".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.created.lock().push(reply.contact_email.clone());
        Ok(format!("rec-{}", id))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn message(id: &str, from: &str, subject: &str, thread: &str, ms: i64) -> MessageMeta {
    MessageMeta {
        id: id.to_string(),
        thread_id: thread.to_string(),
        from: from.to_string(),
        to: "me@own.com".to_string(),
        cc: String::new(),
        subject: subject.to_string(),
        snippet: "Following up on the proposal and timeline".to_string(),
        internal_ms: ms,
    }
}

fn business_mailbox() -> FakeMailbox {
    FakeMailbox {
        messages: vec![
            message(
                "m1",
                "\"Jane Doe\" <jane@acme.com>",
                "Partnership proposal",
                "t1",
                1_700_000_000_000,
            ),
            message(
                "m2",
                "\"Sam Lee\" <sam@acme.com>",
                "Re: Partnership proposal",
                "t1",
                1_700_003_600_000,
            ),
            message("m3", "friend@gmail.com", "Lunch on Friday?", "t2", 1_700_007_200_000),
            message(
                "m4",
                "no-reply@updates.example",
                "Your weekly newsletter",
                "t3",
                1_700_010_800_000,
            ),
        ],
        ..Default::default()
    }
}

async fn scan(store: &Arc<Mutex<Store>>, mail: Arc<dyn MailSource>, config: &Arc<Config>) {
    let registry = Arc::new(JobRegistry::new());
    let StartOutcome::Started(handle) = registry.start("me@own.com").await else {
        panic!("expected a fresh scan job");
    };
    run_scan_job(
        registry.clone(),
        handle.clone(),
        store.clone(),
        mail,
        config.clone(),
        "own.com".to_string(),
    )
    .await;
    assert_eq!(handle.read().await.status, ScanStatus::Done);
}

fn force_targets_due(store: &Mutex<Store>, campaign_id: &str) {
    store
        .lock()
        .conn_ref()
        .execute(
            "UPDATE campaign_targets SET next_send_at = '2000-01-01T00:00:00+00:00'
             WHERE campaign_id = ?1 AND status = 'active'",
            [campaign_id],
        )
        .unwrap();
}

/// Scan, approve acme.com, generate and finalize its draft, and start a
/// campaign. Returns the campaign id.
async fn set_up_campaign(
    store: &Arc<Mutex<Store>>,
    mail: &Arc<FakeMailbox>,
    config: &Arc<Config>,
) -> String {
    let source: Arc<dyn MailSource> = mail.clone();
    scan(store, source, config).await;

    {
        let guard = store.lock();
        assert!(guard
            .set_organization_status("me@own.com", "acme.com", "approved")
            .unwrap());
        let drafts = generate_drafts(&guard, &config.drafts, "me@own.com", "Alex").unwrap();
        assert_eq!(drafts.len(), 1);
        assert!(guard
            .finalize_draft(
                "me@own.com",
                "acme.com",
                &drafts[0].subject,
                &drafts[0].body
            )
            .unwrap());
    }

    create_campaign(store, &config.campaign, "me@own.com")
        .unwrap()
        .id
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn scan_builds_review_queue() {
    let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
    let config = Arc::new(Config::default());
    let mail: Arc<dyn MailSource> = Arc::new(business_mailbox());

    scan(&store, mail, &config).await;

    let orgs = store.lock().list_organizations("me@own.com").unwrap();
    // gmail.com is a free domain; the newsletter sender has no stakeholder
    let domains: Vec<&str> = orgs.iter().map(|o| o.domain.as_str()).collect();
    assert_eq!(domains, vec!["acme.com"]);

    let acme = &orgs[0];
    assert_eq!(acme.status, "pending");
    assert_eq!(acme.auto_status, "pending");
    assert_eq!(acme.message_count, 2);
    assert_eq!(acme.threads_count, 1);
    assert_eq!(acme.primary_contact_email, "sam@acme.com");
    assert_eq!(acme.detail.topics, vec!["Partnership proposal"]);
    assert!(acme.followup_score >= 45);
}

#[tokio::test]
async fn full_campaign_lifecycle_with_reply_and_crm() {
    let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
    let config = Arc::new(Config::default());
    let mail = Arc::new(business_mailbox());
    let crm = FakeCrm::default();

    let campaign_id = set_up_campaign(&store, &mail, &config).await;

    let campaign = store.lock().get_campaign(&campaign_id).unwrap().unwrap();
    assert_eq!(campaign.targets_total, 1);

    // Tick 1: initial send goes out immediately.
    process_campaign(&store, &campaign, mail.as_ref(), Some(&crm), &config)
        .await
        .unwrap();
    assert_eq!(mail.sent_count(), 1);
    {
        let targets = store.lock().list_targets(&campaign_id).unwrap();
        assert_eq!(targets[0].sent_count, 1);
        assert!(!targets[0].thread_id.is_empty());
        assert!(targets[0].next_send_at.is_some());
    }

    // Tick 2: nothing due yet, no extra send.
    process_campaign(&store, &campaign, mail.as_ref(), Some(&crm), &config)
        .await
        .unwrap();
    assert_eq!(mail.sent_count(), 1);

    // The contact replies.
    mail.mark_replied("sam@acme.com");
    process_campaign(&store, &campaign, mail.as_ref(), Some(&crm), &config)
        .await
        .unwrap();

    let refreshed = store.lock().get_campaign(&campaign_id).unwrap().unwrap();
    assert_eq!(refreshed.sent_count, 1);
    assert_eq!(refreshed.replied_count, 1);
    assert_eq!(refreshed.crm_created_count, 1);
    assert_eq!(refreshed.status, "done");
    assert_eq!(crm.created.lock().len(), 1);

    let targets = store.lock().list_targets(&campaign_id).unwrap();
    assert_eq!(targets[0].status, "replied");
    assert_eq!(targets[0].crm_record_id.as_deref(), Some("rec-1"));

    // Reply processed once: a later tick over the same state changes nothing.
    process_campaign(&store, &campaign, mail.as_ref(), Some(&crm), &config)
        .await
        .unwrap();
    let again = store.lock().get_campaign(&campaign_id).unwrap().unwrap();
    assert_eq!(again.replied_count, 1);
    assert_eq!(again.crm_created_count, 1);
    assert_eq!(crm.created.lock().len(), 1);
}

#[tokio::test]
async fn send_failure_leaves_target_unchanged() {
    let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
    let config = Arc::new(Config::default());
    let mail = Arc::new(business_mailbox());

    let campaign_id = set_up_campaign(&store, &mail, &config).await;
    let campaign = store.lock().get_campaign(&campaign_id).unwrap().unwrap();

    mail.fail_sends.store(true, Ordering::SeqCst);
    process_campaign(&store, &campaign, mail.as_ref(), None, &config)
        .await
        .unwrap();

    let targets = store.lock().list_targets(&campaign_id).unwrap();
    assert_eq!(targets[0].sent_count, 0);
    assert!(targets[0].last_sent_at.is_none());
    assert_eq!(targets[0].status, "active");
    let refreshed = store.lock().get_campaign(&campaign_id).unwrap().unwrap();
    assert_eq!(refreshed.sent_count, 0);
    assert_eq!(refreshed.status, "running");

    // Next tick succeeds and retries the same target.
    mail.fail_sends.store(false, Ordering::SeqCst);
    process_campaign(&store, &campaign, mail.as_ref(), None, &config)
        .await
        .unwrap();
    assert_eq!(mail.sent_count(), 1);
    let targets = store.lock().list_targets(&campaign_id).unwrap();
    assert_eq!(targets[0].sent_count, 1);
}

#[tokio::test]
async fn silent_target_is_exhausted_and_campaign_closes() {
    let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
    let config = Arc::new(Config::default());
    let mail = Arc::new(business_mailbox());

    let campaign_id = set_up_campaign(&store, &mail, &config).await;
    let campaign = store.lock().get_campaign(&campaign_id).unwrap().unwrap();
    let max_sends = 1 + i64::from(config.campaign.followup_count);

    for _ in 0..max_sends {
        force_targets_due(&store, &campaign_id);
        process_campaign(&store, &campaign, mail.as_ref(), None, &config)
            .await
            .unwrap();
    }
    assert_eq!(mail.sent_count() as i64, max_sends);

    // One more tick observes the exhausted target and retires it.
    process_campaign(&store, &campaign, mail.as_ref(), None, &config)
        .await
        .unwrap();
    assert_eq!(mail.sent_count() as i64, max_sends);

    let targets = store.lock().list_targets(&campaign_id).unwrap();
    assert_eq!(targets[0].status, "completed");
    assert!(targets[0].replied_at.is_none());
    let refreshed = store.lock().get_campaign(&campaign_id).unwrap().unwrap();
    assert_eq!(refreshed.status, "done");
    assert_eq!(refreshed.sent_count, max_sends);
}

#[tokio::test]
async fn followups_reply_in_thread_with_re_subject() {
    let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
    let config = Arc::new(Config::default());
    let mail = Arc::new(business_mailbox());

    let campaign_id = set_up_campaign(&store, &mail, &config).await;
    let campaign = store.lock().get_campaign(&campaign_id).unwrap().unwrap();

    process_campaign(&store, &campaign, mail.as_ref(), None, &config)
        .await
        .unwrap();
    force_targets_due(&store, &campaign_id);
    process_campaign(&store, &campaign, mail.as_ref(), None, &config)
        .await
        .unwrap();

    let sent = mail.sent.lock();
    assert_eq!(sent.len(), 2);
    let (_, first_subject, first_thread) = &sent[0];
    let (_, second_subject, second_thread) = &sent[1];
    assert!(!first_subject.starts_with("Re: "));
    assert!(first_thread.is_none());
    assert_eq!(*second_subject, format!("Re: {}", first_subject));
    // follow-up lands in the thread opened by the first send
    assert_eq!(second_thread.as_deref(), Some("thread-sam@acme.com"));
}

#[tokio::test]
async fn crm_failure_is_retried_next_tick() {
    let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
    let config = Arc::new(Config::default());
    let mail = Arc::new(business_mailbox());
    let crm = FakeCrm::default();

    let campaign_id = set_up_campaign(&store, &mail, &config).await;
    let campaign = store.lock().get_campaign(&campaign_id).unwrap().unwrap();

    process_campaign(&store, &campaign, mail.as_ref(), Some(&crm), &config)
        .await
        .unwrap();
    mail.mark_replied("sam@acme.com");

    crm.fail.store(true, Ordering::SeqCst);
    process_campaign(&store, &campaign, mail.as_ref(), Some(&crm), &config)
        .await
        .unwrap();
    {
        let targets = store.lock().list_targets(&campaign_id).unwrap();
        assert_eq!(targets[0].status, "replied");
        assert!(targets[0].crm_record_id.is_none());
        let refreshed = store.lock().get_campaign(&campaign_id).unwrap().unwrap();
        assert_eq!(refreshed.replied_count, 1);
        assert_eq!(refreshed.crm_created_count, 0);
    }

    crm.fail.store(false, Ordering::SeqCst);
    process_campaign(&store, &campaign, mail.as_ref(), Some(&crm), &config)
        .await
        .unwrap();
    let targets = store.lock().list_targets(&campaign_id).unwrap();
    assert!(targets[0].crm_record_id.is_some());
    let refreshed = store.lock().get_campaign(&campaign_id).unwrap().unwrap();
    assert_eq!(refreshed.replied_count, 1);
    assert_eq!(refreshed.crm_created_count, 1);
}

#[tokio::test]
async fn campaign_slot_frees_after_terminal_state() {
    let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
    let config = Arc::new(Config::default());
    let mail = Arc::new(business_mailbox());

    let campaign_id = set_up_campaign(&store, &mail, &config).await;
    assert!(matches!(
        create_campaign(&store, &config.campaign, "me@own.com"),
        Err(CampaignError::AlreadyActive(_))
    ));

    let campaign = store.lock().get_campaign(&campaign_id).unwrap().unwrap();
    mail.mark_replied("sam@acme.com");
    process_campaign(&store, &campaign, mail.as_ref(), None, &config)
        .await
        .unwrap();
    process_campaign(&store, &campaign, mail.as_ref(), None, &config)
        .await
        .unwrap();

    let refreshed = store.lock().get_campaign(&campaign_id).unwrap().unwrap();
    assert_eq!(refreshed.status, "done");
    assert!(create_campaign(&store, &config.campaign, "me@own.com").is_ok());
}
