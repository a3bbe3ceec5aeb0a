//! Gmail and CRM connection rows.

use rusqlite::{params, OptionalExtension};

use super::{CrmConnection, DbError, GmailConnection, Store};
use crate::util::now_iso;

impl Store {
    pub fn upsert_gmail_connection(&self, conn: &GmailConnection) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT INTO gmail_connections
                (user_email, connected_email, access_token, refresh_token, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_email) DO UPDATE SET
                connected_email = excluded.connected_email,
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, gmail_connections.refresh_token),
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![
                conn.user_email,
                conn.connected_email,
                conn.access_token,
                conn.refresh_token,
                conn.expires_at,
                now_iso(),
            ],
        )?;
        Ok(())
    }

    pub fn get_gmail_connection(&self, user_email: &str) -> Result<Option<GmailConnection>, DbError> {
        let row = self
            .conn_ref()
            .query_row(
                "SELECT user_email, connected_email, access_token, refresh_token, expires_at, updated_at
                 FROM gmail_connections WHERE user_email = ?1",
                params![user_email],
                |row| {
                    Ok(GmailConnection {
                        user_email: row.get(0)?,
                        connected_email: row.get(1)?,
                        access_token: row.get(2)?,
                        refresh_token: row.get(3)?,
                        expires_at: row.get(4)?,
                        updated_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn delete_gmail_connection(&self, user_email: &str) -> Result<bool, DbError> {
        let n = self.conn_ref().execute(
            "DELETE FROM gmail_connections WHERE user_email = ?1",
            params![user_email],
        )?;
        Ok(n > 0)
    }

    pub fn update_gmail_tokens(
        &self,
        user_email: &str,
        access_token: &str,
        expires_at: Option<&str>,
    ) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE gmail_connections
             SET access_token = ?2, expires_at = ?3, updated_at = ?4
             WHERE user_email = ?1",
            params![user_email, access_token, expires_at, now_iso()],
        )?;
        Ok(())
    }

    pub fn upsert_crm_connection(&self, conn: &CrmConnection) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT INTO crm_connections (user_email, domain, api_token, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_email) DO UPDATE SET
                domain = excluded.domain,
                api_token = excluded.api_token,
                updated_at = excluded.updated_at",
            params![conn.user_email, conn.domain, conn.api_token, now_iso()],
        )?;
        Ok(())
    }

    pub fn get_crm_connection(&self, user_email: &str) -> Result<Option<CrmConnection>, DbError> {
        let row = self
            .conn_ref()
            .query_row(
                "SELECT user_email, domain, api_token, updated_at
                 FROM crm_connections WHERE user_email = ?1",
                params![user_email],
                |row| {
                    Ok(CrmConnection {
                        user_email: row.get(0)?,
                        domain: row.get(1)?,
                        api_token: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn delete_crm_connection(&self, user_email: &str) -> Result<bool, DbError> {
        let n = self.conn_ref().execute(
            "DELETE FROM crm_connections WHERE user_email = ?1",
            params![user_email],
        )?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gmail_conn(user: &str) -> GmailConnection {
        GmailConnection {
            user_email: user.to_string(),
            connected_email: user.to_string(),
            access_token: "tok-1".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Some("2025-06-01T10:00:00+00:00".to_string()),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_gmail_connection_upsert_keeps_refresh_token() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_gmail_connection(&gmail_conn("me@own.com")).unwrap();

        // Re-auth without a refresh token must not wipe the stored one
        let mut again = gmail_conn("me@own.com");
        again.access_token = "tok-2".to_string();
        again.refresh_token = None;
        store.upsert_gmail_connection(&again).unwrap();

        let loaded = store.get_gmail_connection("me@own.com").unwrap().unwrap();
        assert_eq!(loaded.access_token, "tok-2");
        assert_eq!(loaded.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[test]
    fn test_gmail_connection_delete() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_gmail_connection(&gmail_conn("me@own.com")).unwrap();
        assert!(store.delete_gmail_connection("me@own.com").unwrap());
        assert!(!store.delete_gmail_connection("me@own.com").unwrap());
        assert!(store.get_gmail_connection("me@own.com").unwrap().is_none());
    }

    #[test]
    fn test_crm_connection_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_crm_connection(&CrmConnection {
                user_email: "me@own.com".to_string(),
                domain: "mycrm".to_string(),
                api_token: "secret".to_string(),
                updated_at: String::new(),
            })
            .unwrap();
        let loaded = store.get_crm_connection("me@own.com").unwrap().unwrap();
        assert_eq!(loaded.domain, "mycrm");
        assert_eq!(loaded.api_token, "secret");
        assert!(store.get_crm_connection("other@own.com").unwrap().is_none());
    }
}
