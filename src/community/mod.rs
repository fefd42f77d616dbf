//! Publish Gateway - appends agent definitions to the shared community catalog
//!
//! One publish is one read-modify-write against a [`ContentStore`]. The write
//! carries the version token from the read, so a concurrent publish in between
//! surfaces as [`GatewayError::Conflict`] instead of silently dropping a record.
//! Nothing is retried here; the caller decides whether to re-submit.

pub mod store;

pub use store::{ContentStore, GitHubContentStore, MemoryContentStore, VersionedDocument, WriteReceipt};

use crate::error::{GatewayError, GatewayResult};
use crate::types::CommunityAgentRecord;
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::info;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 9;

/// Incoming publish body, as sent by the UI.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PublishRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub tags: Option<Vec<String>>,
    pub data: Option<Value>,
}

/// A publish request that passed validation.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentDraft {
    pub name: String,
    pub description: String,
    pub author: String,
    pub tags: Vec<String>,
    pub data: Value,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl PublishRequest {
    /// Requires `name`, `author` and `data`; reports every missing one.
    pub fn validate(self) -> GatewayResult<AgentDraft> {
        let name = present(self.name);
        let author = present(self.author);
        let data = self.data.filter(|d| !d.is_null());

        let mut missing = Vec::new();
        if name.is_none() {
            missing.push("name");
        }
        if author.is_none() {
            missing.push("author");
        }
        if data.is_none() {
            missing.push("data");
        }

        match (name, author, data) {
            (Some(name), Some(author), Some(data)) => Ok(AgentDraft {
                name,
                description: self.description.unwrap_or_default(),
                author,
                tags: self.tags.unwrap_or_default(),
                data,
            }),
            _ => Err(GatewayError::Validation { missing }),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PublishReceipt {
    pub agent_id: String,
    pub commit: Option<String>,
}

/// `community_<epoch millis>_<9 lowercase alphanumerics>`
pub fn generate_agent_id(at: OffsetDateTime) -> String {
    let millis = at.unix_timestamp_nanos() / 1_000_000;
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("community_{millis}_{suffix}")
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-05-01T12:00:00.000Z`.
pub fn timestamp(at: OffsetDateTime) -> GatewayResult<String> {
    let format = format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    );
    at.to_offset(time::UtcOffset::UTC)
        .format(format)
        .map_err(|e| GatewayError::malformed(format!("timestamp: {e}")))
}

pub struct CommunityPublisher {
    store: Arc<dyn ContentStore>,
}

impl CommunityPublisher {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    pub async fn publish(&self, draft: AgentDraft) -> GatewayResult<PublishReceipt> {
        let VersionedDocument { mut catalog, token } = self.store.read().await?;

        let now = OffsetDateTime::now_utc();
        let published_at = timestamp(now)?;
        let message = format!("Add community agent: {}", draft.name);
        let record = CommunityAgentRecord {
            id: generate_agent_id(now),
            name: draft.name,
            description: draft.description,
            author: draft.author,
            tags: draft.tags,
            downloads: 0,
            published_at: published_at.clone(),
            data: draft.data,
        };
        let agent_id = record.id.clone();

        catalog.agents.insert(0, record);
        catalog.last_updated = Some(published_at);

        let receipt = self.store.write(&catalog, &token, &message).await?;
        info!(agent_id = %agent_id, total = catalog.agents.len(), "published community agent");

        Ok(PublishReceipt {
            agent_id,
            commit: receipt.commit,
        })
    }
}
