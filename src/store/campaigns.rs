//! Campaign and per-target send state.
//!
//! Targets carry the full send state machine: `sent_count` / `max_sends`,
//! the timing columns, and the reply/CRM markers. The conditional updates
//! here (`replied_at IS NULL`, `crm_record_id IS NULL`) are what makes the
//! scheduler's reply handling idempotent across ticks.

use rusqlite::{params, OptionalExtension, Row};

use super::{CampaignRow, DbError, Store, TargetRow};
use crate::util::now_iso;

fn row_to_campaign(row: &Row<'_>) -> rusqlite::Result<CampaignRow> {
    Ok(CampaignRow {
        id: row.get(0)?,
        user_email: row.get(1)?,
        status: row.get(2)?,
        followup_count: row.get(3)?,
        targets_total: row.get(4)?,
        sent_count: row.get(5)?,
        replied_count: row.get(6)?,
        crm_created_count: row.get(7)?,
        error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        finished_at: row.get(11)?,
    })
}

fn row_to_target(row: &Row<'_>) -> rusqlite::Result<TargetRow> {
    Ok(TargetRow {
        campaign_id: row.get(0)?,
        domain: row.get(1)?,
        to_email: row.get(2)?,
        token: row.get(3)?,
        subject: row.get(4)?,
        body: row.get(5)?,
        thread_id: row.get(6)?,
        sent_count: row.get(7)?,
        max_sends: row.get(8)?,
        last_sent_at: row.get(9)?,
        next_send_at: row.get(10)?,
        replied_at: row.get(11)?,
        crm_record_id: row.get(12)?,
        status: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

const CAMPAIGN_COLUMNS: &str = "id, user_email, status, followup_count, targets_total,
    sent_count, replied_count, crm_created_count, error, created_at, updated_at, finished_at";

const TARGET_COLUMNS: &str = "campaign_id, domain, to_email, token, subject, body, thread_id,
    sent_count, max_sends, last_sent_at, next_send_at, replied_at, crm_record_id, status, updated_at";

impl Store {
    // =========================================================================
    // Campaigns
    // =========================================================================

    pub fn insert_campaign(&self, campaign: &CampaignRow) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT INTO campaigns
                (id, user_email, status, followup_count, targets_total,
                 sent_count, replied_count, crm_created_count, error,
                 created_at, updated_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                campaign.id,
                campaign.user_email,
                campaign.status,
                campaign.followup_count,
                campaign.targets_total,
                campaign.sent_count,
                campaign.replied_count,
                campaign.crm_created_count,
                campaign.error,
                campaign.created_at,
                campaign.updated_at,
                campaign.finished_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_campaign(&self, id: &str) -> Result<Option<CampaignRow>, DbError> {
        let row = self
            .conn_ref()
            .query_row(
                &format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1"),
                params![id],
                |row| row_to_campaign(row),
            )
            .optional()?;
        Ok(row)
    }

    /// The user's single non-terminal campaign, if any. At most one exists
    /// per user; campaign creation refuses while one is active.
    pub fn find_active_campaign(&self, user_email: &str) -> Result<Option<CampaignRow>, DbError> {
        let row = self
            .conn_ref()
            .query_row(
                &format!(
                    "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
                     WHERE user_email = ?1 AND status NOT IN ('done', 'error')
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![user_email],
                |row| row_to_campaign(row),
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_campaigns(&self, user_email: &str) -> Result<Vec<CampaignRow>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
             WHERE user_email = ?1 ORDER BY created_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![user_email], |row| row_to_campaign(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Running campaigns across all users, for the scheduler tick.
    pub fn list_running_campaigns(&self) -> Result<Vec<CampaignRow>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
             WHERE status = 'running' ORDER BY created_at"
        ))?;
        let rows = stmt
            .query_map([], |row| row_to_campaign(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_campaign_status(&self, id: &str, status: &str) -> Result<(), DbError> {
        let finished_at = if status == "done" || status == "error" {
            Some(now_iso())
        } else {
            None
        };
        self.conn_ref().execute(
            "UPDATE campaigns SET status = ?2, finished_at = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, status, finished_at, now_iso()],
        )?;
        Ok(())
    }

    pub fn set_campaign_error(&self, id: &str, error: &str) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE campaigns
             SET status = 'error', error = ?2, finished_at = ?3, updated_at = ?3
             WHERE id = ?1",
            params![id, error, now_iso()],
        )?;
        Ok(())
    }

    pub fn bump_campaign_sent(&self, id: &str) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE campaigns SET sent_count = sent_count + 1, updated_at = ?2 WHERE id = ?1",
            params![id, now_iso()],
        )?;
        Ok(())
    }

    pub fn bump_campaign_replied(&self, id: &str) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE campaigns SET replied_count = replied_count + 1, updated_at = ?2 WHERE id = ?1",
            params![id, now_iso()],
        )?;
        Ok(())
    }

    pub fn bump_campaign_crm_created(&self, id: &str) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE campaigns SET crm_created_count = crm_created_count + 1, updated_at = ?2 WHERE id = ?1",
            params![id, now_iso()],
        )?;
        Ok(())
    }

    // =========================================================================
    // Targets
    // =========================================================================

    pub fn insert_target(&self, target: &TargetRow) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT INTO campaign_targets
                (campaign_id, domain, to_email, token, subject, body, thread_id,
                 sent_count, max_sends, last_sent_at, next_send_at, replied_at,
                 crm_record_id, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                target.campaign_id,
                target.domain,
                target.to_email,
                target.token,
                target.subject,
                target.body,
                target.thread_id,
                target.sent_count,
                target.max_sends,
                target.last_sent_at,
                target.next_send_at,
                target.replied_at,
                target.crm_record_id,
                target.status,
                now_iso(),
            ],
        )?;
        Ok(())
    }

    pub fn list_targets(&self, campaign_id: &str) -> Result<Vec<TargetRow>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {TARGET_COLUMNS} FROM campaign_targets
             WHERE campaign_id = ?1 ORDER BY domain, to_email"
        ))?;
        let rows = stmt
            .query_map(params![campaign_id], |row| row_to_target(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_active_targets(&self, campaign_id: &str) -> Result<Vec<TargetRow>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {TARGET_COLUMNS} FROM campaign_targets
             WHERE campaign_id = ?1 AND status = 'active' ORDER BY domain, to_email"
        ))?;
        let rows = stmt
            .query_map(params![campaign_id], |row| row_to_target(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Replied targets that still lack a CRM record, so record creation can
    /// be retried on a later tick if it failed once.
    pub fn list_replied_targets_missing_crm(
        &self,
        campaign_id: &str,
    ) -> Result<Vec<TargetRow>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {TARGET_COLUMNS} FROM campaign_targets
             WHERE campaign_id = ?1 AND status = 'replied' AND crm_record_id IS NULL
             ORDER BY domain, to_email"
        ))?;
        let rows = stmt
            .query_map(params![campaign_id], |row| row_to_target(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_active_targets(&self, campaign_id: &str) -> Result<i64, DbError> {
        let count = self.conn_ref().query_row(
            "SELECT COUNT(*) FROM campaign_targets WHERE campaign_id = ?1 AND status = 'active'",
            params![campaign_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Record a completed send: bump `sent_count`, remember the thread so
    /// follow-ups land in it, and schedule the next send.
    pub fn record_target_send(
        &self,
        campaign_id: &str,
        domain: &str,
        to_email: &str,
        thread_id: &str,
        next_send_at: &str,
    ) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE campaign_targets
             SET sent_count = sent_count + 1,
                 thread_id = CASE WHEN thread_id = '' THEN ?4 ELSE thread_id END,
                 last_sent_at = ?6,
                 next_send_at = ?5,
                 updated_at = ?6
             WHERE campaign_id = ?1 AND domain = ?2 AND to_email = ?3",
            params![campaign_id, domain, to_email, thread_id, next_send_at, now_iso()],
        )?;
        Ok(())
    }

    /// Mark a target replied. Returns true only on the first call; later
    /// calls are no-ops so a reply is counted exactly once.
    pub fn mark_target_replied(
        &self,
        campaign_id: &str,
        domain: &str,
        to_email: &str,
    ) -> Result<bool, DbError> {
        let n = self.conn_ref().execute(
            "UPDATE campaign_targets
             SET replied_at = ?4, status = 'replied', updated_at = ?4
             WHERE campaign_id = ?1 AND domain = ?2 AND to_email = ?3
               AND replied_at IS NULL",
            params![campaign_id, domain, to_email, now_iso()],
        )?;
        Ok(n > 0)
    }

    /// Attach a CRM record to a replied target. Returns true only when the
    /// target had no record yet; the guard is what keeps CRM creation
    /// idempotent.
    pub fn set_target_crm_record(
        &self,
        campaign_id: &str,
        domain: &str,
        to_email: &str,
        record_id: &str,
    ) -> Result<bool, DbError> {
        let n = self.conn_ref().execute(
            "UPDATE campaign_targets
             SET crm_record_id = ?4, updated_at = ?5
             WHERE campaign_id = ?1 AND domain = ?2 AND to_email = ?3
               AND crm_record_id IS NULL",
            params![campaign_id, domain, to_email, record_id, now_iso()],
        )?;
        Ok(n > 0)
    }

    /// A target that has exhausted its sends without a reply.
    pub fn mark_target_completed(
        &self,
        campaign_id: &str,
        domain: &str,
        to_email: &str,
    ) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE campaign_targets
             SET status = 'completed', updated_at = ?4
             WHERE campaign_id = ?1 AND domain = ?2 AND to_email = ?3",
            params![campaign_id, domain, to_email, now_iso()],
        )?;
        Ok(())
    }
}
