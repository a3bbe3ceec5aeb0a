//! Mailbox reactivation service.
//!
//! Scans a connected Gmail mailbox into a scored queue of counterparty
//! organizations, turns approved ones into outreach drafts, and runs a
//! follow-up campaign with reply detection and CRM record creation.

pub mod aggregate;
pub mod campaign;
pub mod config;
pub mod crm;
pub mod drafts;
pub mod gmail;
pub mod scan;
pub mod store;
pub mod util;
