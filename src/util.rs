//! Header-parsing and naming helpers shared across the pipeline.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

fn address_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,})").unwrap()
    })
}

/// Extract every email address from a raw header value, lowercased,
/// deduplicated, sorted. Tolerates display names, angle brackets, and
/// comma-joined lists; a garbled header degrades to an empty list.
pub fn extract_addresses(header: &str) -> Vec<String> {
    let mut found: Vec<String> = address_re()
        .find_iter(header)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    found.sort();
    found.dedup();
    found
}

/// Lowercased domain of an address, or empty when there is none.
pub fn domain_of(address: &str) -> String {
    address
        .split('@')
        .nth(1)
        .unwrap_or("")
        .trim()
        .to_lowercase()
}

/// Lowercased local part of an address.
pub fn local_part(address: &str) -> String {
    address
        .split('@')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}

/// Best-effort display name from a From header like `"Jane Doe" <jane@acme.com>`.
///
/// The name is only trusted when the header's address matches `address`;
/// otherwise a Cc'd third party's name could be attributed to the wrong
/// stakeholder.
pub fn display_name_from_header(header: &str, address: &str) -> String {
    let Some(lt) = header.find('<') else {
        return String::new();
    };
    let Some(gt) = header.find('>') else {
        return String::new();
    };
    if gt < lt {
        return String::new();
    }
    let header_addr = header[lt + 1..gt].trim().to_lowercase();
    if header_addr != address.to_lowercase() {
        return String::new();
    }
    header[..lt].trim().trim_matches('"').trim().to_string()
}

/// Derive an organization name from a domain (best-effort).
///
/// Example: "acme-widgets.com" → "ACME Widgets"; short all-letter tokens
/// are upcased, longer ones title-cased.
pub fn company_name_from_domain(domain: &str) -> String {
    let root = domain.split('.').next().unwrap_or(domain);
    if root.is_empty() {
        return domain.to_string();
    }
    root.split(|c: char| c == '-' || c == '_')
        .filter(|p| !p.is_empty())
        .map(|p| {
            if p.len() <= 4 && p.chars().all(|c| c.is_ascii_alphabetic()) {
                p.to_uppercase()
            } else {
                let mut chars = p.chars();
                match chars.next() {
                    Some(c) => c.to_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Infer a greeting-worthy first name from a contact name, falling back to
/// the address's local part, then to "there".
pub fn infer_first_name(contact_name: &str, address: &str) -> String {
    let first = contact_name.split_whitespace().next().unwrap_or("");
    if !first.is_empty()
        && first.len() <= 30
        && first
            .chars()
            .all(|c| c.is_ascii_alphabetic() || c == '\'' || c == '-')
    {
        return first.to_string();
    }

    let local = local_part(address);
    let token = local
        .split(|c: char| c == '.' || c == '_' || c == '-')
        .next()
        .unwrap_or("");
    if token.len() >= 2 && token.len() <= 20 && token.chars().all(|c| c.is_ascii_lowercase()) {
        let mut chars = token.chars();
        return match chars.next() {
            Some(c) => c.to_uppercase().to_string() + chars.as_str(),
            None => "there".to_string(),
        };
    }
    "there".to_string()
}

/// Current UTC time truncated to whole seconds, RFC 3339.
pub fn now_iso() -> String {
    to_iso(Utc::now())
}

/// Format a timestamp the way the store expects it.
pub fn to_iso(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%:z").to_string()
}

/// Parse an RFC 3339 timestamp, degrading to the UNIX epoch so malformed
/// stored values order before everything real instead of erroring.
pub fn parse_iso(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&value.replace('Z', "+00:00"))
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
