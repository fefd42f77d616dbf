use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a conversation. Only streamed through, never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A conversation context held by the upstream LLM API.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatSession {
    pub id: String,
    pub created_at: OffsetDateTime,
    pub agent_id: Option<String>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, agent_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            created_at: OffsetDateTime::now_utc(),
            agent_id,
        }
    }
}

/// Incremental unit of assistant output, applied in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamChunk {
    Delta(String),
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    None,
    Sso,
    ApiKey,
}

impl std::str::FromStr for AuthMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "sso" => Ok(Self::Sso),
            "api-key" | "apikey" | "api_key" => Ok(Self::ApiKey),
            other => Err(format!("unknown auth mode '{other}'")),
        }
    }
}

/// How a client reaches the gateway. Resolved once, immutable afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionProfile {
    pub name: String,
    pub api_base_url: Option<String>,
    pub auth_mode: AuthMode,
    pub api_key: Option<String>,
    pub streaming: bool,
}

impl ConnectionProfile {
    /// AI features are only available when the profile points somewhere.
    pub fn ai_enabled(&self) -> bool {
        self.api_base_url.is_some()
    }
}

/// One entry of the shared community catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityAgentRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub downloads: u64,
    pub published_at: String,
    pub data: serde_json::Value,
}

/// The `community-agents.json` document. Newest record first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityCatalog {
    #[serde(default)]
    pub agents: Vec<CommunityAgentRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
