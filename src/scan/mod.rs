//! Mailbox scan jobs.
//!
//! Job status is per-process state, not persisted: a restart forgets
//! in-flight jobs and the scan is simply started again. The registry
//! enforces one non-terminal job per user; removing a job from the registry
//! is the cancellation signal the controller watches for.

pub mod controller;

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::gmail::GmailError;
use crate::store::DbError;
use crate::util::now_iso;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Gmail: {0}")]
    Gmail(#[from] GmailError),

    #[error("Store: {0}")]
    Db(#[from] DbError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Running,
    Paused,
    Done,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Done | ScanStatus::Failed)
    }
}

/// Observable state of one scan job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanJob {
    pub id: String,
    pub user_email: String,
    pub status: ScanStatus,
    pub processed: usize,
    pub total: usize,
    pub organizations: usize,
    pub error: Option<String>,
    pub started_at: String,
    pub updated_at: String,
}

impl ScanJob {
    fn new(user_email: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_email: user_email.to_string(),
            status: ScanStatus::Running,
            processed: 0,
            total: 0,
            organizations: 0,
            error: None,
            started_at: now_iso(),
            updated_at: now_iso(),
        }
    }
}

pub type JobHandle = Arc<RwLock<ScanJob>>;

/// What `JobRegistry::start` decided.
pub enum StartOutcome {
    /// A fresh job was registered; the caller should spawn the controller.
    Started(JobHandle),
    /// A non-terminal job already exists for this user.
    AlreadyRunning(JobHandle),
}

/// In-process registry of scan jobs, one slot per user.
#[derive(Default)]
pub struct JobRegistry {
    jobs: DashMap<String, JobHandle>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_email: &str) -> Option<JobHandle> {
        self.jobs.get(user_email).map(|entry| entry.value().clone())
    }

    /// Register a new job unless a non-terminal one already occupies the
    /// user's slot. A terminal leftover is replaced.
    pub async fn start(&self, user_email: &str) -> StartOutcome {
        if let Some(existing) = self.get(user_email) {
            let status = existing.read().await.status;
            if !status.is_terminal() {
                return StartOutcome::AlreadyRunning(existing);
            }
        }
        let handle: JobHandle = Arc::new(RwLock::new(ScanJob::new(user_email)));
        self.jobs.insert(user_email.to_string(), handle.clone());
        StartOutcome::Started(handle)
    }

    /// Pause a running job. Returns false when there is no job to pause or
    /// it is not running.
    pub async fn pause(&self, user_email: &str) -> bool {
        let Some(handle) = self.get(user_email) else {
            return false;
        };
        let mut job = handle.write().await;
        if job.status != ScanStatus::Running {
            return false;
        }
        job.status = ScanStatus::Paused;
        job.updated_at = now_iso();
        true
    }

    /// Resume a paused job.
    pub async fn resume(&self, user_email: &str) -> bool {
        let Some(handle) = self.get(user_email) else {
            return false;
        };
        let mut job = handle.write().await;
        if job.status != ScanStatus::Paused {
            return false;
        }
        job.status = ScanStatus::Running;
        job.updated_at = now_iso();
        true
    }

    /// Drop the user's job slot. A controller still running notices the
    /// removal at its next check and stops without a final snapshot.
    pub fn remove(&self, user_email: &str) -> bool {
        self.jobs.remove(user_email).is_some()
    }

    pub async fn snapshot(&self, user_email: &str) -> Option<ScanJob> {
        match self.get(user_email) {
            Some(handle) => Some(handle.read().await.clone()),
            None => None,
        }
    }

    /// Whether `handle` is still the job occupying the user's slot.
    pub fn owns(&self, user_email: &str, handle: &JobHandle) -> bool {
        match self.get(user_email) {
            Some(current) => Arc::ptr_eq(&current, handle),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_job_per_user() {
        let registry = JobRegistry::new();
        let first = match registry.start("me@own.com").await {
            StartOutcome::Started(h) => h,
            StartOutcome::AlreadyRunning(_) => panic!("expected fresh job"),
        };

        match registry.start("me@own.com").await {
            StartOutcome::AlreadyRunning(existing) => {
                assert_eq!(existing.read().await.id, first.read().await.id);
            }
            StartOutcome::Started(_) => panic!("second start must not replace a live job"),
        }

        // a different user gets their own slot
        assert!(matches!(
            registry.start("other@own.com").await,
            StartOutcome::Started(_)
        ));
    }

    #[tokio::test]
    async fn test_terminal_job_is_replaced() {
        let registry = JobRegistry::new();
        let StartOutcome::Started(first) = registry.start("me@own.com").await else {
            panic!("expected fresh job");
        };
        first.write().await.status = ScanStatus::Done;

        let StartOutcome::Started(second) = registry.start("me@own.com").await else {
            panic!("terminal job should be replaced");
        };
        assert_ne!(first.read().await.id, second.read().await.id);
    }

    #[tokio::test]
    async fn test_pause_resume_transitions() {
        let registry = JobRegistry::new();
        let StartOutcome::Started(handle) = registry.start("me@own.com").await else {
            panic!("expected fresh job");
        };

        assert!(registry.pause("me@own.com").await);
        assert_eq!(handle.read().await.status, ScanStatus::Paused);
        // pausing a paused job is refused
        assert!(!registry.pause("me@own.com").await);

        assert!(registry.resume("me@own.com").await);
        assert_eq!(handle.read().await.status, ScanStatus::Running);
        assert!(!registry.resume("me@own.com").await);

        assert!(!registry.pause("nobody@own.com").await);
    }

    #[tokio::test]
    async fn test_remove_releases_ownership() {
        let registry = JobRegistry::new();
        let StartOutcome::Started(handle) = registry.start("me@own.com").await else {
            panic!("expected fresh job");
        };
        assert!(registry.owns("me@own.com", &handle));
        assert!(registry.remove("me@own.com"));
        assert!(!registry.owns("me@own.com", &handle));
        assert!(registry.snapshot("me@own.com").await.is_none());
    }
}
