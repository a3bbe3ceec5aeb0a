//! Service configuration.
//!
//! Everything data-shaped lives here: the domain/sender noise lists the
//! aggregator filters on, the business keyword set the scorer counts, and
//! the outreach copy the campaign scheduler rotates through. All of it is
//! loaded from `~/.reconnect/config.json` with serde defaults, so an empty
//! or missing file yields a fully working configuration.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration, one file per install.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub auth: AuthConfig,
    pub scan: ScanConfig,
    pub campaign: CampaignConfig,
    pub filters: FilterConfig,
    pub scoring: ScoringConfig,
    pub drafts: DraftConfig,
}

/// OAuth2 client credentials used when refreshing Gmail access tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: String,
}

/// Tuning knobs for the mailbox scan job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanConfig {
    /// How many yearly query windows to walk, newest first.
    pub years: u32,
    /// Overall cap on messages considered per scan.
    pub max_messages: usize,
    /// Messages per fetch batch.
    pub batch_size: usize,
    /// Simultaneous metadata fetches within a batch.
    pub fetch_workers: usize,
    /// Snapshot the entity map to the store every N batches.
    pub checkpoint_every_batches: usize,
    /// If windowed listing collected fewer ids than this, run an
    /// un-windowed refill query to top up.
    pub refill_below: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            years: 3,
            max_messages: 600,
            batch_size: 24,
            fetch_workers: 6,
            checkpoint_every_batches: 4,
            refill_below: 120,
        }
    }
}

/// Tuning knobs and copy for the campaign scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CampaignConfig {
    /// Seconds between scheduler ticks.
    pub tick_secs: u64,
    /// Follow-ups after the initial send (max_sends = 1 + this).
    pub followup_count: u32,
    /// Days between sends to the same target.
    pub followup_gap_days: i64,
    /// Rotating follow-up framings, prepended to the original body.
    /// Index (sent_count - 1) mod len selects the framing.
    pub followup_framings: Vec<String>,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            tick_secs: 60,
            followup_count: 3,
            followup_gap_days: 2,
            followup_framings: vec![
                "Quick follow-up in case my previous note got buried.".to_string(),
                "Wanted to check once more before I close the loop. If relevant, happy to do a short 20-minute sync.".to_string(),
                "Final follow-up from my side. If this is not a priority now, no problem and I will close the thread.".to_string(),
            ],
        }
    }
}

/// Domain and sender noise lists consumed by the aggregator's filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterConfig {
    /// Free mail providers, never a counterparty organization.
    pub free_domains: Vec<String>,
    /// Known noise vendors; subdomains are excluded too.
    pub noise_domains: Vec<String>,
    /// Case-insensitive patterns marking a subject as system noise.
    pub noise_subject_patterns: Vec<String>,
    /// Case-insensitive local-part patterns marking an automated sender.
    pub automated_sender_patterns: Vec<String>,
    /// Local parts that are shared mailboxes, not people.
    pub generic_local_parts: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            free_domains: to_strings(&[
                "gmail.com",
                "googlemail.com",
                "yahoo.com",
                "yahoo.co.uk",
                "hotmail.com",
                "outlook.com",
                "icloud.com",
                "aol.com",
                "mail.com",
                "proton.me",
                "protonmail.com",
                "yandex.com",
                "gmx.com",
                "msn.com",
                "live.com",
                "qq.com",
                "163.com",
                "126.com",
            ]),
            noise_domains: to_strings(&[
                "email.reuters.com",
                "github.com",
                "linkedin.com",
                "mail.linkedin.com",
                "notifications.github.com",
                "pipedrive.com",
                "slack.com",
                "atlassian.com",
                "noreply.github.com",
                "notion.so",
                "mail.notion.so",
                "docusign.net",
                "google.com",
                "googlemail.com",
                "amazonaws.com",
            ]),
            noise_subject_patterns: to_strings(&[
                r"\bnewsletter\b",
                r"\bnotification\b",
                r"\bsecurity alert\b",
                r"\bpassword\b",
                r"\binvoice\b",
                r"\bpayment due\b",
                r"\bverification\b",
                r"\bsubscription\b",
            ]),
            automated_sender_patterns: to_strings(&[
                r"\bno[-_.]?reply\b",
                r"\bdo[-_.]?not[-_.]?reply\b",
                r"\bnotification\b",
                r"\bautomated\b",
                r"\balerts?\b",
            ]),
            generic_local_parts: to_strings(&[
                "info", "sales", "support", "hello", "contact", "office", "admin", "team",
                "billing", "jobs", "hr",
            ]),
        }
    }
}

/// Business keyword set the relevance scorer counts substring hits against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringConfig {
    pub business_keywords: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            business_keywords: to_strings(&[
                "meeting",
                "call",
                "proposal",
                "partnership",
                "pricing",
                "scope",
                "timeline",
                "deal",
                "follow up",
                "follow-up",
                "demo",
                "services",
                "nda",
                "kickoff",
                "project",
                "opportunity",
                "client",
                "customer",
                "intro",
                "introduction",
                "next step",
            ]),
        }
    }
}

/// Outreach draft copy. `{first_name}` and `{owner_name}` are substituted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DraftConfig {
    pub subject: String,
    pub body_template: String,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            subject: "Quick reconnect".to_string(),
            body_template: "Hi {first_name},\n\nIt has been a while since we last spoke.\nInterested in your current priorities and whether new digital solutions could be relevant.\n\nBest,\n{owner_name}".to_string(),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Canonical config file path (`~/.reconnect/config.json`).
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".reconnect").join("config.json"))
}

/// Load configuration from disk. A missing file yields defaults; a present
/// but malformed file is an error, never silently ignored.
pub fn load_config() -> Result<Config, String> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(Config::default());
    }

    let content =
        fs::read_to_string(&path).map_err(|e| format!("Failed to read config: {}", e))?;
    serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))
}
