//! Scored organization rows produced by the mailbox scan.

use rusqlite::{params, OptionalExtension, Row};

use super::{DbError, OrganizationDetail, OrganizationRow, Store};
use crate::util::now_iso;

fn row_to_organization(row: &Row<'_>) -> rusqlite::Result<OrganizationRow> {
    let detail_json: String = row.get(14)?;
    let detail: OrganizationDetail = serde_json::from_str(&detail_json).unwrap_or_default();
    Ok(OrganizationRow {
        user_email: row.get(0)?,
        domain: row.get(1)?,
        name: row.get(2)?,
        primary_contact_email: row.get(3)?,
        primary_contact_name: row.get(4)?,
        last_message_at: row.get(5)?,
        threads_count: row.get(6)?,
        message_count: row.get(7)?,
        business_score: row.get(8)?,
        followup_score: row.get(9)?,
        auto_status: row.get(10)?,
        auto_reason: row.get(11)?,
        status: row.get(12)?,
        summary: row.get(13)?,
        detail,
        updated_at: row.get(15)?,
    })
}

const ORG_COLUMNS: &str = "user_email, domain, name, primary_contact_email, primary_contact_name,
    last_message_at, threads_count, message_count, business_score, followup_score,
    auto_status, auto_reason, status, summary, detail_json, updated_at";

impl Store {
    /// Upsert a batch of freshly scored organization rows.
    ///
    /// A new row enters the review queue as `pending` unless the scorer
    /// auto-rejected it. A re-scan of an existing row refreshes every
    /// derived column but never touches `status`: approve/reject decisions
    /// made by the user survive checkpoints and repeated scans.
    pub fn save_organization_rows(&self, rows: &[OrganizationRow]) -> Result<(), DbError> {
        for org in rows {
            let initial_status = if org.auto_status == "pending" {
                "pending"
            } else {
                "rejected"
            };
            let detail_json = serde_json::to_string(&org.detail)?;
            self.conn_ref().execute(
                "INSERT INTO organizations
                    (user_email, domain, name, primary_contact_email, primary_contact_name,
                     last_message_at, threads_count, message_count, business_score, followup_score,
                     auto_status, auto_reason, status, summary, detail_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                 ON CONFLICT(user_email, domain) DO UPDATE SET
                    name = excluded.name,
                    primary_contact_email = excluded.primary_contact_email,
                    primary_contact_name = excluded.primary_contact_name,
                    last_message_at = excluded.last_message_at,
                    threads_count = excluded.threads_count,
                    message_count = excluded.message_count,
                    business_score = excluded.business_score,
                    followup_score = excluded.followup_score,
                    auto_status = excluded.auto_status,
                    auto_reason = excluded.auto_reason,
                    summary = excluded.summary,
                    detail_json = excluded.detail_json,
                    updated_at = excluded.updated_at",
                params![
                    org.user_email,
                    org.domain,
                    org.name,
                    org.primary_contact_email,
                    org.primary_contact_name,
                    org.last_message_at,
                    org.threads_count,
                    org.message_count,
                    org.business_score,
                    org.followup_score,
                    org.auto_status,
                    org.auto_reason,
                    initial_status,
                    org.summary,
                    detail_json,
                    now_iso(),
                ],
            )?;
        }
        Ok(())
    }

    /// List a user's organizations in review order: rows still awaiting a
    /// decision first, auto-accepted before auto-rejected, then by follow-up
    /// score and recency.
    pub fn list_organizations(&self, user_email: &str) -> Result<Vec<OrganizationRow>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations
             WHERE user_email = ?1
             ORDER BY
                CASE status WHEN 'pending' THEN 0 ELSE 1 END,
                CASE auto_status WHEN 'pending' THEN 0 ELSE 1 END,
                followup_score DESC,
                last_message_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![user_email], |row| row_to_organization(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_organization(
        &self,
        user_email: &str,
        domain: &str,
    ) -> Result<Option<OrganizationRow>, DbError> {
        let row = self
            .conn_ref()
            .query_row(
                &format!(
                    "SELECT {ORG_COLUMNS} FROM organizations
                     WHERE user_email = ?1 AND domain = ?2"
                ),
                params![user_email, domain],
                |row| row_to_organization(row),
            )
            .optional()?;
        Ok(row)
    }

    /// Record the user's approve/reject decision. Returns false when the
    /// organization does not exist.
    pub fn set_organization_status(
        &self,
        user_email: &str,
        domain: &str,
        status: &str,
    ) -> Result<bool, DbError> {
        let n = self.conn_ref().execute(
            "UPDATE organizations SET status = ?3, updated_at = ?4
             WHERE user_email = ?1 AND domain = ?2",
            params![user_email, domain, status, now_iso()],
        )?;
        Ok(n > 0)
    }

    pub fn list_approved_organizations(
        &self,
        user_email: &str,
    ) -> Result<Vec<OrganizationRow>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations
             WHERE user_email = ?1 AND status = 'approved'
             ORDER BY followup_score DESC, last_message_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![user_email], |row| row_to_organization(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(domain: &str, followup: i64, auto_status: &str) -> OrganizationRow {
        OrganizationRow {
            user_email: "me@own.com".to_string(),
            domain: domain.to_string(),
            name: domain.to_string(),
            primary_contact_email: format!("contact@{}", domain),
            primary_contact_name: "Contact".to_string(),
            last_message_at: "2025-05-01T09:00:00+00:00".to_string(),
            threads_count: 2,
            message_count: 5,
            business_score: followup,
            followup_score: followup,
            auto_status: auto_status.to_string(),
            auto_reason: if auto_status == "pending" {
                None
            } else {
                Some("low_relevance".to_string())
            },
            status: String::new(),
            summary: "2 threads, 5 messages".to_string(),
            detail: OrganizationDetail::default(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_save_sets_initial_status_from_auto_status() {
        let store = Store::open_in_memory().unwrap();
        store
            .save_organization_rows(&[org("acme.com", 70, "pending"), org("spam.io", 20, "rejected")])
            .unwrap();

        let acme = store.get_organization("me@own.com", "acme.com").unwrap().unwrap();
        assert_eq!(acme.status, "pending");
        let spam = store.get_organization("me@own.com", "spam.io").unwrap().unwrap();
        assert_eq!(spam.status, "rejected");
        assert_eq!(spam.auto_reason.as_deref(), Some("low_relevance"));
    }

    #[test]
    fn test_rescan_preserves_user_decision() {
        let store = Store::open_in_memory().unwrap();
        store.save_organization_rows(&[org("acme.com", 70, "pending")]).unwrap();
        assert!(store
            .set_organization_status("me@own.com", "acme.com", "approved")
            .unwrap());

        // Re-scan with fresher numbers
        let mut updated = org("acme.com", 85, "pending");
        updated.message_count = 9;
        store.save_organization_rows(&[updated]).unwrap();

        let loaded = store.get_organization("me@own.com", "acme.com").unwrap().unwrap();
        assert_eq!(loaded.status, "approved");
        assert_eq!(loaded.followup_score, 85);
        assert_eq!(loaded.message_count, 9);
    }

    #[test]
    fn test_set_status_missing_row() {
        let store = Store::open_in_memory().unwrap();
        assert!(!store
            .set_organization_status("me@own.com", "nowhere.com", "approved")
            .unwrap());
    }

    #[test]
    fn test_list_orders_pending_first() {
        let store = Store::open_in_memory().unwrap();
        store
            .save_organization_rows(&[
                org("low.com", 50, "pending"),
                org("rejected.io", 90, "rejected"),
                org("high.com", 80, "pending"),
            ])
            .unwrap();
        store
            .set_organization_status("me@own.com", "low.com", "approved")
            .unwrap();

        let rows = store.list_organizations("me@own.com").unwrap();
        let domains: Vec<&str> = rows.iter().map(|r| r.domain.as_str()).collect();
        // pending before decided; within pending, auto-pending before auto-rejected
        assert_eq!(domains, vec!["high.com", "low.com", "rejected.io"]);
    }

    #[test]
    fn test_detail_json_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let mut row = org("acme.com", 70, "pending");
        row.detail.topics = vec!["Partnership proposal".to_string()];
        row.detail.snippets = vec!["Let us discuss scope".to_string()];
        row.detail.days_since_last = 30;
        store.save_organization_rows(&[row]).unwrap();

        let loaded = store.get_organization("me@own.com", "acme.com").unwrap().unwrap();
        assert_eq!(loaded.detail.topics, vec!["Partnership proposal"]);
        assert_eq!(loaded.detail.days_since_last, 30);
    }
}
