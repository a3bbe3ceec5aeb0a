//! Outreach drafts generated for approved organizations.

use rusqlite::{params, OptionalExtension, Row};

use super::{DbError, DraftRow, Store};
use crate::util::now_iso;

fn row_to_draft(row: &Row<'_>) -> rusqlite::Result<DraftRow> {
    Ok(DraftRow {
        user_email: row.get(0)?,
        domain: row.get(1)?,
        to_email: row.get(2)?,
        to_name: row.get(3)?,
        subject: row.get(4)?,
        body: row.get(5)?,
        status: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

const DRAFT_COLUMNS: &str =
    "user_email, domain, to_email, to_name, subject, body, status, updated_at";

impl Store {
    /// Upsert a draft. Regeneration refreshes recipient and copy but resets
    /// the status to whatever the caller passes, so finalized drafts are
    /// only overwritten deliberately.
    pub fn upsert_draft(&self, draft: &DraftRow) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT INTO drafts (user_email, domain, to_email, to_name, subject, body, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(user_email, domain) DO UPDATE SET
                to_email = excluded.to_email,
                to_name = excluded.to_name,
                subject = excluded.subject,
                body = excluded.body,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                draft.user_email,
                draft.domain,
                draft.to_email,
                draft.to_name,
                draft.subject,
                draft.body,
                draft.status,
                now_iso(),
            ],
        )?;
        Ok(())
    }

    pub fn get_draft(&self, user_email: &str, domain: &str) -> Result<Option<DraftRow>, DbError> {
        let row = self
            .conn_ref()
            .query_row(
                &format!("SELECT {DRAFT_COLUMNS} FROM drafts WHERE user_email = ?1 AND domain = ?2"),
                params![user_email, domain],
                |row| row_to_draft(row),
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_drafts(&self, user_email: &str) -> Result<Vec<DraftRow>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {DRAFT_COLUMNS} FROM drafts WHERE user_email = ?1 ORDER BY domain"
        ))?;
        let rows = stmt
            .query_map(params![user_email], |row| row_to_draft(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Update a draft's copy and mark it finalized. Returns false when no
    /// such draft exists.
    pub fn finalize_draft(
        &self,
        user_email: &str,
        domain: &str,
        subject: &str,
        body: &str,
    ) -> Result<bool, DbError> {
        let n = self.conn_ref().execute(
            "UPDATE drafts SET subject = ?3, body = ?4, status = 'final', updated_at = ?5
             WHERE user_email = ?1 AND domain = ?2",
            params![user_email, domain, subject, body, now_iso()],
        )?;
        Ok(n > 0)
    }

    /// Drafts eligible for a campaign: finalized, and whose organization is
    /// still approved.
    pub fn list_campaign_ready_drafts(&self, user_email: &str) -> Result<Vec<DraftRow>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT d.user_email, d.domain, d.to_email, d.to_name, d.subject, d.body, d.status, d.updated_at
             FROM drafts d
             JOIN organizations o ON o.user_email = d.user_email AND o.domain = d.domain
             WHERE d.user_email = ?1 AND d.status = 'final' AND o.status = 'approved'
             ORDER BY d.domain"
        ))?;
        let rows = stmt
            .query_map(params![user_email], |row| row_to_draft(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
