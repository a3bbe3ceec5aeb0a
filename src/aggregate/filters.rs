//! Domain and sender filters driving what the aggregator keeps.

use std::collections::HashSet;

use regex::Regex;

use crate::config::FilterConfig;
use crate::util::local_part;

/// Compiled form of `FilterConfig`, bound to the scanned mailbox's own
/// domain. Invalid patterns are dropped with a warning rather than failing
/// the scan.
pub struct Filters {
    own_domain: String,
    own_base: String,
    free_domains: HashSet<String>,
    noise_domains: HashSet<String>,
    noise_subject: Vec<Regex>,
    automated_sender: Vec<Regex>,
    generic_local_parts: HashSet<String>,
}

/// The label left of the TLD: `mail.own.com` → "own", `own.io` → "own".
fn base_label(domain: &str) -> &str {
    let mut labels = domain.rsplit('.');
    let tld = labels.next().unwrap_or("");
    labels.next().unwrap_or(tld)
}

fn compile_all(patterns: &[String], what: &str) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(&format!("(?i){}", p)) {
            Ok(re) => Some(re),
            Err(e) => {
                log::warn!("Ignoring invalid {} pattern {:?}: {}", what, p, e);
                None
            }
        })
        .collect()
}

impl Filters {
    pub fn new(config: &FilterConfig, own_domain: &str) -> Self {
        let own_domain = own_domain.to_lowercase();
        Self {
            own_base: base_label(&own_domain).to_string(),
            own_domain,
            free_domains: config.free_domains.iter().map(|d| d.to_lowercase()).collect(),
            noise_domains: config.noise_domains.iter().map(|d| d.to_lowercase()).collect(),
            noise_subject: compile_all(&config.noise_subject_patterns, "subject"),
            automated_sender: compile_all(&config.automated_sender_patterns, "sender"),
            generic_local_parts: config
                .generic_local_parts
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    /// A domain that can never be a counterparty organization: empty, the
    /// mailbox's own (or any domain sharing its base label), free mail, or
    /// a noise vendor (subdomains included).
    pub fn is_excluded_domain(&self, domain: &str) -> bool {
        let dom = domain.trim().to_lowercase();
        if dom.is_empty() {
            return true;
        }
        if !self.own_domain.is_empty() && dom == self.own_domain {
            return true;
        }
        if !self.own_base.is_empty() && base_label(&dom) == self.own_base {
            return true;
        }
        if self.free_domains.contains(&dom) || self.noise_domains.contains(&dom) {
            return true;
        }
        self.noise_domains
            .iter()
            .any(|noise| dom.ends_with(&format!(".{}", noise)))
    }

    /// Whether the local part marks an automated sender (no-reply and kin).
    pub fn is_automated_sender(&self, email: &str) -> bool {
        let local = local_part(email);
        self.automated_sender.iter().any(|re| re.is_match(&local))
    }

    pub fn is_noise_subject(&self, subject: &str) -> bool {
        self.noise_subject.iter().any(|re| re.is_match(subject))
    }

    /// Whether the address is a shared mailbox like info@ or sales@.
    pub fn is_generic_address(&self, email: &str) -> bool {
        self.generic_local_parts.contains(&local_part(email))
    }

    pub fn own_domain(&self) -> &str {
        &self.own_domain
    }
}
