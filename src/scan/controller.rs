//! The scan controller: drives one mailbox scan job to completion.
//!
//! Listing walks yearly query windows newest first, tops up with an
//! un-windowed refill when the windows came back thin, then fetches
//! metadata in batches with a bounded number of concurrent requests.
//! Aggregation stays sequential; only the HTTP fetches fan out. The
//! controller re-checks the job registry before every window and every
//! batch, so pause and cancel take effect at those boundaries.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinSet;

use super::{JobHandle, JobRegistry, ScanError, ScanStatus};
use crate::aggregate::{scoring, EntityMap, Filters};
use crate::config::Config;
use crate::gmail::{MailSource, MessageMeta};
use crate::store::Store;
use crate::util::now_iso;

const PAUSE_POLL: Duration = Duration::from_millis(400);

/// Why the gate let us through or not.
enum Gate {
    Proceed,
    Cancelled,
}

/// Block while the job is paused; report cancellation when the job was
/// removed from the registry or forced terminal.
async fn pause_gate(registry: &JobRegistry, user_email: &str, handle: &JobHandle) -> Gate {
    loop {
        if !registry.owns(user_email, handle) {
            return Gate::Cancelled;
        }
        let status = handle.read().await.status;
        match status {
            ScanStatus::Running => return Gate::Proceed,
            ScanStatus::Paused => tokio::time::sleep(PAUSE_POLL).await,
            ScanStatus::Done | ScanStatus::Failed => return Gate::Cancelled,
        }
    }
}

fn window_query(index: u32) -> String {
    let today = Utc::now().date_naive();
    let newer = today - chrono::Duration::days(365 * i64::from(index));
    let older = today - chrono::Duration::days(365 * i64::from(index + 1));
    format!(
        "after:{} before:{} -in:chats",
        older.format("%Y/%m/%d"),
        newer.format("%Y/%m/%d")
    )
}

/// Entry point spawned per job. Any error marks the job failed; a registry
/// removal mid-flight ends the run silently.
pub async fn run_scan_job(
    registry: Arc<JobRegistry>,
    handle: JobHandle,
    store: Arc<Mutex<Store>>,
    mail: Arc<dyn MailSource>,
    config: Arc<Config>,
    own_domain: String,
) {
    let user_email = handle.read().await.user_email.clone();
    log::info!("Scan started for {}", user_email);

    match run_inner(&registry, &handle, &store, mail, &config, &own_domain).await {
        Ok(true) => {
            let mut job = handle.write().await;
            job.status = ScanStatus::Done;
            job.updated_at = now_iso();
            log::info!(
                "Scan done for {}: {} messages, {} organizations",
                user_email,
                job.processed,
                job.organizations
            );
        }
        Ok(false) => {
            log::info!("Scan cancelled for {}", user_email);
        }
        Err(e) => {
            log::error!("Scan failed for {}: {}", user_email, e);
            if registry.owns(&user_email, &handle) {
                let mut job = handle.write().await;
                job.status = ScanStatus::Failed;
                job.error = Some(e.to_string());
                job.updated_at = now_iso();
            }
        }
    }
}

/// Returns Ok(false) when the job was cancelled mid-run.
async fn run_inner(
    registry: &JobRegistry,
    handle: &JobHandle,
    store: &Mutex<Store>,
    mail: Arc<dyn MailSource>,
    config: &Config,
    own_domain: &str,
) -> Result<bool, ScanError> {
    let user_email = handle.read().await.user_email.clone();
    let scan = &config.scan;
    let filters = Filters::new(&config.filters, own_domain);

    // Phase 1: collect message ids across year windows, newest first.
    let mut ids: Vec<String> = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for window in 0..scan.years {
        if matches!(pause_gate(registry, &user_email, handle).await, Gate::Cancelled) {
            return Ok(false);
        }
        if ids.len() >= scan.max_messages {
            break;
        }
        let query = window_query(window);
        let remaining = scan.max_messages - ids.len();
        let listed = mail.list_message_ids(&query, remaining).await?;
        log::debug!("Window {:?} listed {} ids", query, listed.len());
        for id in listed {
            if seen_ids.insert(id.clone()) {
                ids.push(id);
            }
        }
    }

    // Sparse mailboxes often have most traffic outside the windows; top up
    // with an un-windowed pass.
    if ids.len() < scan.refill_below {
        if matches!(pause_gate(registry, &user_email, handle).await, Gate::Cancelled) {
            return Ok(false);
        }
        let remaining = scan.max_messages - ids.len();
        let listed = mail.list_message_ids("-in:chats", remaining).await?;
        log::debug!("Refill listed {} ids", listed.len());
        for id in listed {
            if seen_ids.insert(id.clone()) {
                ids.push(id);
            }
        }
    }

    ids.truncate(scan.max_messages);
    {
        let mut job = handle.write().await;
        job.total = ids.len();
        job.updated_at = now_iso();
    }

    // Phase 2: batched metadata fetch and sequential merge.
    let mut map = EntityMap::new(&user_email);
    let workers = scan.fetch_workers.max(1);

    for (batch_index, batch) in ids.chunks(scan.batch_size.max(1)).enumerate() {
        if matches!(pause_gate(registry, &user_email, handle).await, Gate::Cancelled) {
            return Ok(false);
        }

        let mut metas = fetch_batch(mail.clone(), batch, workers).await?;
        // fetch completion order is arbitrary; ingest oldest first so
        // latest-wins fields settle identically on every run
        metas.sort_by(|a, b| a.internal_ms.cmp(&b.internal_ms).then_with(|| a.id.cmp(&b.id)));
        for meta in &metas {
            map.ingest(meta, &filters);
        }

        {
            let mut job = handle.write().await;
            job.processed += batch.len();
            job.organizations = map.orgs().len();
            job.updated_at = now_iso();
        }

        if (batch_index + 1) % scan.checkpoint_every_batches.max(1) == 0 {
            checkpoint(store, &map, &filters, config)?;
        }
    }

    checkpoint(store, &map, &filters, config)?;
    Ok(true)
}

/// Fetch metadata for one batch with at most `workers` requests in flight.
/// Unfetchable messages are skipped; real errors abort the batch.
async fn fetch_batch(
    mail: Arc<dyn MailSource>,
    batch: &[String],
    workers: usize,
) -> Result<Vec<MessageMeta>, ScanError> {
    let mut join_set: JoinSet<Result<Option<MessageMeta>, crate::gmail::GmailError>> =
        JoinSet::new();
    let mut pending = batch.iter().cloned();
    let mut metas = Vec::with_capacity(batch.len());

    for id in pending.by_ref().take(workers) {
        let mail = mail.clone();
        join_set.spawn(async move { mail.fetch_metadata(&id).await });
    }

    while let Some(joined) = join_set.join_next().await {
        let fetched = joined.map_err(|e| {
            ScanError::Gmail(crate::gmail::GmailError::RefreshFailed(format!(
                "fetch task panicked: {}",
                e
            )))
        })??;
        if let Some(meta) = fetched {
            metas.push(meta);
        }
        if let Some(id) = pending.next() {
            let mail = mail.clone();
            join_set.spawn(async move { mail.fetch_metadata(&id).await });
        }
    }

    Ok(metas)
}

fn checkpoint(
    store: &Mutex<Store>,
    map: &EntityMap,
    filters: &Filters,
    config: &Config,
) -> Result<(), ScanError> {
    let rows = scoring::build_rows(map, filters, &config.scoring, Utc::now());
    if rows.is_empty() {
        return Ok(());
    }
    let store = store.lock();
    store.save_organization_rows(&rows)?;
    log::debug!("Checkpointed {} organization rows", rows.len());
    Ok(())
}
