//! Entity aggregation: fold message metadata into per-domain organization
//! aggregates.
//!
//! The map is the scan job's working state. Ingestion is idempotent per
//! message id, so overlapping listings (windowed queries plus the refill
//! pass) cannot double-count an organization.

pub mod filters;
pub mod scoring;

pub use filters::Filters;

use std::collections::{HashMap, HashSet};

use chrono::{TimeZone, Utc};

use crate::gmail::MessageMeta;
use crate::util::{
    company_name_from_domain, display_name_from_header, extract_addresses, now_iso, to_iso,
};

#[derive(Debug, Clone, Default)]
pub struct Stakeholder {
    pub email: String,
    pub name: String,
    pub touches: i64,
    pub last_message_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct Thread {
    pub thread_id: String,
    pub subject: String,
    pub last_message_at: String,
    pub messages: i64,
    pub sample: String,
}

/// Everything known about one counterparty domain so far.
#[derive(Debug, Clone, Default)]
pub struct OrgAggregate {
    pub domain: String,
    pub name: String,
    pub stakeholders: HashMap<String, Stakeholder>,
    pub threads: HashMap<String, Thread>,
    pub subjects: HashMap<String, i64>,
    pub snippets: Vec<String>,
    pub message_count: i64,
    pub last_message_at: String,
    pub primary_contact_email: String,
    pub primary_contact_name: String,
}

const SNIPPET_CAP: usize = 8;

/// The scan's in-memory aggregation state: organizations keyed by domain,
/// plus the set of message ids already folded in.
#[derive(Debug, Default)]
pub struct EntityMap {
    pub user_email: String,
    orgs: HashMap<String, OrgAggregate>,
    seen: HashSet<String>,
}

impl EntityMap {
    pub fn new(user_email: &str) -> Self {
        Self {
            user_email: user_email.to_string(),
            orgs: HashMap::new(),
            seen: HashSet::new(),
        }
    }

    pub fn orgs(&self) -> &HashMap<String, OrgAggregate> {
        &self.orgs
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn has_seen(&self, message_id: &str) -> bool {
        self.seen.contains(message_id)
    }

    /// Fold one message into the map. Returns false when the message id was
    /// already ingested.
    pub fn ingest(&mut self, meta: &MessageMeta, filters: &Filters) -> bool {
        if !self.seen.insert(meta.id.clone()) {
            return false;
        }

        let from_emails = extract_addresses(&meta.from);
        let from_email = from_emails.first().cloned().unwrap_or_default();

        let mut all_emails: Vec<String> = from_emails;
        all_emails.extend(extract_addresses(&meta.to));
        all_emails.extend(extract_addresses(&meta.cc));
        all_emails.sort();
        all_emails.dedup();

        let iso_ts = if meta.internal_ms > 0 {
            match Utc.timestamp_millis_opt(meta.internal_ms).single() {
                Some(ts) => to_iso(ts),
                None => now_iso(),
            }
        } else {
            now_iso()
        };

        let subject = meta.subject.trim().to_string();
        let snippet = meta.snippet.trim().to_string();

        let mut domains: Vec<String> = all_emails
            .iter()
            .filter_map(|em| em.split('@').nth(1).map(|d| d.to_lowercase()))
            .filter(|dom| !filters.is_excluded_domain(dom))
            .collect();
        domains.sort();
        domains.dedup();

        for dom in &domains {
            let org = self.orgs.entry(dom.clone()).or_insert_with(|| OrgAggregate {
                domain: dom.clone(),
                name: company_name_from_domain(dom),
                ..Default::default()
            });

            org.message_count += 1;
            if !subject.is_empty() {
                *org.subjects.entry(subject.clone()).or_insert(0) += 1;
            }
            if !snippet.is_empty() && org.snippets.len() < SNIPPET_CAP {
                org.snippets.push(snippet.clone());
            }

            // Latest message wins the primary-contact slot, but only when
            // the sender actually belongs to this domain.
            if org.last_message_at.is_empty() || iso_ts > org.last_message_at {
                org.last_message_at = iso_ts.clone();
                if from_email.ends_with(&format!("@{}", dom)) {
                    org.primary_contact_email = from_email.clone();
                    org.primary_contact_name =
                        display_name_from_header(&meta.from, &from_email);
                }
            }

            for em in &all_emails {
                if !em.ends_with(&format!("@{}", dom)) {
                    continue;
                }
                if filters.is_automated_sender(em) {
                    continue;
                }
                let stakeholder = org.stakeholders.entry(em.clone()).or_insert_with(|| {
                    Stakeholder {
                        email: em.clone(),
                        last_message_at: iso_ts.clone(),
                        ..Default::default()
                    }
                });
                stakeholder.touches += 1;
                if iso_ts > stakeholder.last_message_at {
                    stakeholder.last_message_at = iso_ts.clone();
                }
                if *em == from_email {
                    let name = display_name_from_header(&meta.from, em);
                    if !name.is_empty() {
                        stakeholder.name = name;
                    }
                }
            }

            if !meta.thread_id.is_empty() {
                let thread = org
                    .threads
                    .entry(meta.thread_id.clone())
                    .or_insert_with(|| Thread {
                        thread_id: meta.thread_id.clone(),
                        subject: subject.clone(),
                        last_message_at: iso_ts.clone(),
                        sample: snippet.clone(),
                        ..Default::default()
                    });
                thread.messages += 1;
                if iso_ts > thread.last_message_at {
                    thread.last_message_at = iso_ts.clone();
                    if !subject.is_empty() {
                        thread.subject = subject.clone();
                    }
                    if !snippet.is_empty() {
                        thread.sample = snippet.clone();
                    }
                }
            }
        }

        true
    }
}
