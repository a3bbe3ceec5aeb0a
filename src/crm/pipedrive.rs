//! Pipedrive-backed `Crm`: look up or create the person, open a deal, and
//! attach a note describing the reply.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{Crm, CrmError, ReplyRecord};

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    item: Option<IdHolder>,
}

#[derive(Debug, Deserialize)]
struct IdHolder {
    id: Option<i64>,
}

pub struct PipedriveClient {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl PipedriveClient {
    pub fn new(domain: &str, api_token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("https://{}.pipedrive.com/api/v1", domain),
            token: api_token.to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, CrmError> {
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("api_token", &self.token));
        let resp = self
            .http
            .get(format!("{}{}", self.base, path))
            .query(&query)
            .send()
            .await?;
        Self::unwrap_envelope(path, resp).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, CrmError> {
        let resp = self
            .http
            .post(format!("{}{}", self.base, path))
            .query(&[("api_token", &self.token)])
            .json(body)
            .send()
            .await?;
        Self::unwrap_envelope(path, resp).await
    }

    async fn unwrap_envelope<T: DeserializeOwned>(
        path: &str,
        resp: reqwest::Response,
    ) -> Result<T, CrmError> {
        let status = resp.status();
        let text = resp.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&text)
            .map_err(|e| CrmError::Api(format!("{} ({}): {}", path, status, e)))?;
        if !envelope.success {
            return Err(CrmError::Api(format!("{} failed ({})", path, status)));
        }
        envelope
            .data
            .ok_or_else(|| CrmError::Api(format!("{} returned no data", path)))
    }

    async fn find_person_by_email(&self, email: &str) -> Result<Option<i64>, CrmError> {
        let data: SearchData = self
            .get(
                "/persons/search",
                &[("term", email), ("fields", "email"), ("exact_match", "1")],
            )
            .await?;
        Ok(data
            .items
            .into_iter()
            .find_map(|item| item.item.and_then(|holder| holder.id)))
    }

    async fn create_person(&self, reply: &ReplyRecord) -> Result<i64, CrmError> {
        let name = if reply.contact_name.is_empty() {
            reply.contact_email.clone()
        } else {
            reply.contact_name.clone()
        };
        let mut body = serde_json::json!({
            "name": name,
            "email": reply.contact_email,
        });
        if !reply.organization.is_empty() {
            body["org_name"] = serde_json::Value::String(reply.organization.clone());
        }
        let holder: IdHolder = self.post("/persons", &body).await?;
        holder.id.ok_or_else(|| {
            CrmError::Api(format!("could not create person for {}", reply.contact_email))
        })
    }
}

#[async_trait]
impl Crm for PipedriveClient {
    async fn create_record(&self, reply: &ReplyRecord) -> Result<String, CrmError> {
        let person_id = match self.find_person_by_email(&reply.contact_email).await? {
            Some(id) => id,
            None => self.create_person(reply).await?,
        };

        let display = if reply.contact_name.is_empty() {
            &reply.contact_email
        } else {
            &reply.contact_name
        };
        let deal: IdHolder = self
            .post(
                "/deals",
                &serde_json::json!({
                    "title": format!("Reconnect reply - {}", display),
                    "person_id": person_id,
                    "status": "open",
                }),
            )
            .await?;
        let deal_id = deal
            .id
            .ok_or_else(|| CrmError::Api(format!("deal creation failed for person {}", person_id)))?;

        let note = format!(
            "Auto-created from reconnect campaign reply\nContact: {}\nReply date: {}",
            reply.contact_email, reply.replied_at
        );
        let _: IdHolder = self
            .post(
                "/notes",
                &serde_json::json!({
                    "person_id": person_id,
                    "deal_id": deal_id,
                    "content": note,
                }),
            )
            .await?;

        log::info!(
            "Created Pipedrive deal {} for reply from {}",
            deal_id,
            reply.contact_email
        );
        Ok(deal_id.to_string())
    }
}
