//! Relevance scoring and auto-triage for aggregated organizations.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::{EntityMap, Filters, OrgAggregate};
use crate::config::ScoringConfig;
use crate::store::{OrganizationDetail, OrganizationRow, StakeholderDetail, ThreadDetail};
use crate::util::parse_iso;

const STAKEHOLDER_CAP: usize = 12;
const THREAD_CAP: usize = 15;
const SNIPPET_DETAIL_CAP: usize = 5;

fn reply_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(re|fw|fwd)\s*:\s*").unwrap())
}

/// Keyword relevance score in 0..=100.
///
/// Base 35, up to +35 for keyword hits (7 each), up to +12 for stakeholder
/// breadth (3 each), +8 when the relationship has been quiet for two weeks
/// and another +6 past 45 days, and a flat -30 newsletter penalty.
pub fn text_relevance_score(
    topics: &[String],
    snippets: &[String],
    stakeholders_count: usize,
    days_since_last: i64,
    keywords: &[String],
) -> i64 {
    let text = topics
        .iter()
        .chain(snippets.iter())
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let keyword_hits = keywords
        .iter()
        .filter(|kw| text.contains(&kw.to_lowercase()))
        .count() as i64;

    let mut score = 35 + (keyword_hits * 7).min(35);
    score += (stakeholders_count as i64 * 3).min(12);
    if days_since_last >= 14 {
        score += 8;
    }
    if days_since_last >= 45 {
        score += 6;
    }
    if text.contains("newsletter") || text.contains("unsubscribe") {
        score -= 30;
    }
    score.clamp(0, 100)
}

/// Reduce a subject frequency counter to up to three representative topics:
/// the five most frequent subjects, reply/forward prefixes stripped,
/// deduplicated case-insensitively.
pub fn summarize_topics(subjects: &HashMap<String, i64>) -> Vec<String> {
    let mut ranked: Vec<(&String, &i64)> = subjects.iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let mut topics: Vec<String> = Vec::new();
    for (subject, _) in ranked.into_iter().take(5) {
        let clean = reply_prefix_re().replace(subject.trim(), "").trim().to_string();
        if clean.is_empty() {
            continue;
        }
        if topics.iter().any(|t| t.eq_ignore_ascii_case(&clean)) {
            continue;
        }
        topics.push(clean);
    }
    topics.truncate(3);
    topics
}

fn stakeholder_rank(s: &super::Stakeholder) -> (i64, String) {
    (s.touches, s.last_message_at.clone())
}

/// Triage outcome for one organization: keep it pending for human review,
/// or auto-reject it with the first matching reason.
fn auto_triage(
    org: &OrgAggregate,
    topics: &[String],
    followup_score: i64,
    filters: &Filters,
) -> (String, Option<String>) {
    let subject_noise = topics.iter().filter(|t| filters.is_noise_subject(t)).count();
    if subject_noise >= 2 {
        return (
            "auto_reject".to_string(),
            Some("newsletter_or_system_subject".to_string()),
        );
    }
    if !org.stakeholders.is_empty()
        && org
            .stakeholders
            .values()
            .all(|s| filters.is_automated_sender(&s.email))
    {
        return (
            "auto_reject".to_string(),
            Some("automated_senders_only".to_string()),
        );
    }
    if org.stakeholders.len() == 1 {
        let only = org.stakeholders.values().next();
        if only.map(|s| filters.is_generic_address(&s.email)).unwrap_or(false) {
            return (
                "auto_reject".to_string(),
                Some("generic_single_contact".to_string()),
            );
        }
    }
    if followup_score < 45 {
        return ("auto_reject".to_string(), Some("low_relevance".to_string()));
    }
    ("pending".to_string(), None)
}

/// Score every aggregated organization and shape it into store rows, ranked
/// for the review queue: auto-pending first, then by follow-up score and
/// recency. Organizations without a thread or a stakeholder are dropped.
pub fn build_rows(
    map: &EntityMap,
    filters: &Filters,
    scoring: &ScoringConfig,
    now: DateTime<Utc>,
) -> Vec<OrganizationRow> {
    let mut rows: Vec<OrganizationRow> = Vec::new();

    for org in map.orgs().values() {
        if org.threads.is_empty() || org.stakeholders.is_empty() {
            continue;
        }

        let topics = summarize_topics(&org.subjects);
        let last_dt = parse_iso(&org.last_message_at);
        let days_since_last = (now - last_dt).num_days().max(0);

        let mut stakeholders: Vec<&super::Stakeholder> = org.stakeholders.values().collect();
        stakeholders.sort_by(|a, b| stakeholder_rank(b).cmp(&stakeholder_rank(a)));

        let (primary_email, primary_name) = if org.primary_contact_email.is_empty() {
            let top = stakeholders[0];
            (top.email.clone(), top.name.clone())
        } else {
            (
                org.primary_contact_email.clone(),
                org.primary_contact_name.clone(),
            )
        };

        let business_score = text_relevance_score(
            &topics,
            &org.snippets,
            org.stakeholders.len(),
            days_since_last,
            &scoring.business_keywords,
        );
        let followup_score = (business_score + (org.threads.len() as i64).min(10)).clamp(0, 100);
        let (auto_status, auto_reason) = auto_triage(org, &topics, followup_score, filters);

        let mut threads: Vec<&super::Thread> = org.threads.values().collect();
        threads.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));

        let summary = format!(
            "{} threads merged across {} stakeholders. Top topics: {}.",
            threads.len(),
            stakeholders.len(),
            if topics.is_empty() {
                "n/a".to_string()
            } else {
                topics.join(", ")
            }
        );

        let detail = OrganizationDetail {
            topics: topics.clone(),
            stakeholders: stakeholders
                .iter()
                .take(STAKEHOLDER_CAP)
                .map(|s| StakeholderDetail {
                    email: s.email.clone(),
                    name: s.name.clone(),
                    touches: s.touches,
                    last_message_at: s.last_message_at.clone(),
                })
                .collect(),
            threads: threads
                .iter()
                .take(THREAD_CAP)
                .map(|t| ThreadDetail {
                    thread_id: t.thread_id.clone(),
                    subject: t.subject.clone(),
                    last_message_at: t.last_message_at.clone(),
                    messages: t.messages,
                    sample: t.sample.clone(),
                })
                .collect(),
            snippets: org.snippets.iter().take(SNIPPET_DETAIL_CAP).cloned().collect(),
            days_since_last,
        };

        rows.push(OrganizationRow {
            user_email: map.user_email.clone(),
            domain: org.domain.clone(),
            name: org.name.clone(),
            primary_contact_email: primary_email,
            primary_contact_name: primary_name,
            last_message_at: org.last_message_at.clone(),
            threads_count: threads.len() as i64,
            message_count: org.message_count,
            business_score,
            followup_score,
            auto_status,
            auto_reason,
            status: String::new(),
            summary,
            detail,
            updated_at: String::new(),
        });
    }

    rows.sort_by(|a, b| {
        let a_key = (
            if a.auto_status == "pending" { 0 } else { 1 },
            -a.followup_score,
        );
        let b_key = (
            if b.auto_status == "pending" { 0 } else { 1 },
            -b.followup_score,
        );
        a_key
            .cmp(&b_key)
            .then_with(|| b.last_message_at.cmp(&a.last_message_at))
    });

    rows
}
