//! Outreach draft generation for approved organizations.

use crate::config::DraftConfig;
use crate::store::{DbError, DraftRow, Store};
use crate::util::infer_first_name;

/// Generate one draft per approved organization with a known primary
/// contact. Organizations whose draft was already finalized are left
/// untouched; everything else gets a fresh pending draft from the template.
pub fn generate_drafts(
    store: &Store,
    config: &DraftConfig,
    user_email: &str,
    owner_name: &str,
) -> Result<Vec<DraftRow>, DbError> {
    let owner = if owner_name.trim().is_empty() {
        infer_first_name("", user_email)
    } else {
        owner_name.trim().to_string()
    };

    let approved = store.list_approved_organizations(user_email)?;
    let mut generated = Vec::new();

    for org in approved {
        let to_email = org.primary_contact_email.trim().to_lowercase();
        if to_email.is_empty() {
            continue;
        }
        if let Some(existing) = store.get_draft(user_email, &org.domain)? {
            if existing.status == "final" {
                continue;
            }
        }

        let first_name = infer_first_name(&org.primary_contact_name, &to_email);
        let body = config
            .body_template
            .replace("{first_name}", &first_name)
            .replace("{owner_name}", &owner);

        let draft = DraftRow {
            user_email: user_email.to_string(),
            domain: org.domain.clone(),
            to_email,
            to_name: org.primary_contact_name.clone(),
            subject: config.subject.clone(),
            body,
            status: "pending".to_string(),
            updated_at: String::new(),
        };
        store.upsert_draft(&draft)?;
        generated.push(draft);
    }

    log::info!("Generated {} drafts for {}", generated.len(), user_email);
    Ok(generated)
}
