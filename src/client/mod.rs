//! Gateway Client
//!
//! Gives callers a "send message, get streamed text" contract and hides the
//! chat session lifecycle behind it.
//!
//! # Behavior
//!
//! - A session is created lazily on the first send and reused afterwards.
//! - When the gateway reports the session gone (404/410), the stale id is
//!   dropped, exactly one new session is created and the same message is
//!   sent once more. A second failure is returned to the caller.
//! - [`GatewayClient::abort`] cancels the in-flight send; it is a no-op when
//!   nothing is in flight. Callers serialize sends themselves.
//!
//! ```rust,no_run
//! use wizard_gateway::client::GatewayClient;
//!
//! # async fn example() -> wizard_gateway::error::GatewayResult<()> {
//! let client = GatewayClient::new("http://localhost:3001");
//! let reply = client
//!     .send_message("Hello!", |delta, _so_far| print!("{delta}"))
//!     .await?;
//! # Ok(())
//! # }
//! ```
pub mod sse;

use crate::error::{GatewayError, GatewayResult};
use crate::relay::JSON_API;
use crate::settings::Settings;
use crate::types::{AuthMode, ChatSession, ConnectionProfile, Message};
use futures::StreamExt;
use futures::future::{AbortHandle, Abortable, Aborted};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use sse::{Flow, StreamAssembler, StreamPayload};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

const EVENT_STREAM: &str = "text/event-stream";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================
// Wire types
// ============================================

#[derive(Serialize)]
struct CreateChatRequest<'a> {
    data: CreateChatData<'a>,
}

#[derive(Serialize)]
struct CreateChatData<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    attributes: CreateChatAttributes<'a>,
}

#[derive(Serialize)]
struct CreateChatAttributes<'a> {
    #[serde(rename = "agentId", skip_serializing_if = "Option::is_none")]
    agent_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreateChatResponse {
    data: CreatedChat,
}

#[derive(Deserialize)]
struct CreatedChat {
    id: String,
}

#[derive(Serialize)]
struct ContinueRequest<'a> {
    input: &'a str,
}

/// Body of the gateway's `/health` endpoint.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub configured: bool,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

// ============================================
// Client
// ============================================

pub struct GatewayClient {
    http: Client,
    base_url: String,
    bearer_token: Option<String>,
    agent_id: Option<String>,
    streaming: bool,
    session: tokio::sync::Mutex<Option<ChatSession>>,
    in_flight: Mutex<Option<AbortHandle>>,
    transcript: Mutex<Vec<Message>>,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
            agent_id: None,
            streaming: true,
            session: tokio::sync::Mutex::new(None),
            in_flight: Mutex::new(None),
            transcript: Mutex::new(Vec::new()),
        }
    }

    /// Builds a client for a resolved profile. A saved endpoint overrides the
    /// profile's base URL and a saved agent id is sent on session create.
    pub fn from_profile(profile: &ConnectionProfile, settings: &Settings) -> GatewayResult<Self> {
        let base_url = settings
            .endpoint
            .clone()
            .or_else(|| profile.api_base_url.clone())
            .ok_or_else(|| {
                GatewayError::configuration(format!(
                    "AI features are disabled for the '{}' profile; set GATEWAY_URL or a saved endpoint",
                    profile.name
                ))
            })?;

        let bearer_token = match profile.auth_mode {
            AuthMode::ApiKey => Some(profile.api_key.clone().ok_or_else(|| {
                GatewayError::configuration("GATEWAY_API_KEY is required in api-key auth mode")
            })?),
            AuthMode::None | AuthMode::Sso => None,
        };

        let mut client = Self::new(base_url).with_agent_id(settings.agent_id.clone());
        client.bearer_token = bearer_token;
        client.streaming = profile.streaming;
        Ok(client)
    }

    pub fn with_agent_id(mut self, agent_id: Option<String>) -> Self {
        self.agent_id = agent_id.filter(|id| !id.trim().is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Pings `/health`.
    pub async fn check_connection(&self) -> GatewayResult<HealthStatus> {
        let response = self
            .request(Method::GET, "/health")
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let response = ensure_success(response).await?;
        response
            .json::<HealthStatus>()
            .await
            .map_err(|e| GatewayError::malformed(format!("health response: {e}")))
    }

    /// Id of the current session, if one has been created.
    pub async fn session_id(&self) -> Option<String> {
        self.session.lock().await.as_ref().map(|s| s.id.clone())
    }

    /// Returns the current session id, creating a session on first use.
    pub async fn ensure_session(&self) -> GatewayResult<String> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.id.clone());
        }
        let session = self.create_session().await?;
        let id = session.id.clone();
        *slot = Some(session);
        Ok(id)
    }

    async fn create_session(&self) -> GatewayResult<ChatSession> {
        let body = CreateChatRequest {
            data: CreateChatData {
                kind: "chats",
                attributes: CreateChatAttributes {
                    agent_id: self.agent_id.as_deref(),
                },
            },
        };
        let payload = serde_json::to_vec(&body)
            .map_err(|e| GatewayError::malformed(format!("encode chat request: {e}")))?;

        let response = self
            .request(Method::POST, "/api/chats")
            .header(CONTENT_TYPE, JSON_API)
            .header(ACCEPT, JSON_API)
            .body(payload)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let created: CreateChatResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::malformed(format!("chat session response: {e}")))?;

        info!(
            session_id = %created.data.id,
            agent_id = self.agent_id.as_deref().unwrap_or("(server default)"),
            "chat session created"
        );
        Ok(ChatSession::new(created.data.id, self.agent_id.clone()))
    }

    /// Drops `stale_id` if it is still the current session.
    async fn discard_session(&self, stale_id: &str) {
        let mut slot = self.session.lock().await;
        if slot.as_ref().is_some_and(|s| s.id == stale_id) {
            *slot = None;
        }
    }

    /// Sends `text` and streams the reply. `on_chunk(delta, accumulated)` is
    /// called for every delta in arrival order. Returns the full reply.
    pub async fn send_message<F>(&self, text: &str, mut on_chunk: F) -> GatewayResult<String>
    where
        F: FnMut(&str, &str),
    {
        let (handle, registration) = AbortHandle::new_pair();
        self.set_in_flight(Some(handle));
        let outcome = Abortable::new(self.send_with_recovery(text, &mut on_chunk), registration).await;
        self.set_in_flight(None);

        let reply = match outcome {
            Ok(result) => result?,
            Err(Aborted) => {
                debug!("send aborted by caller");
                return Err(GatewayError::Aborted);
            }
        };

        let mut transcript = self.lock_transcript();
        transcript.push(Message::user(text));
        transcript.push(Message::assistant(reply.clone()));
        Ok(reply)
    }

    async fn send_with_recovery<F>(&self, text: &str, on_chunk: &mut F) -> GatewayResult<String>
    where
        F: FnMut(&str, &str),
    {
        let session_id = self.ensure_session().await?;
        match self.continue_session(&session_id, text, on_chunk).await {
            Err(GatewayError::SessionExpired { status, .. }) => {
                info!(%session_id, %status, "chat session expired, starting a new one");
                self.discard_session(&session_id).await;
                let fresh = self.ensure_session().await?;
                self.continue_session(&fresh, text, on_chunk).await
            }
            other => other,
        }
    }

    async fn continue_session<F>(
        &self,
        session_id: &str,
        text: &str,
        on_chunk: &mut F,
    ) -> GatewayResult<String>
    where
        F: FnMut(&str, &str),
    {
        let accept = if self.streaming { EVENT_STREAM } else { "application/json" };
        let response = self
            .request(Method::POST, &format!("/api/chats/{session_id}/continue"))
            .header(ACCEPT, accept)
            .json(&ContinueRequest { input: text })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(GatewayError::SessionExpired {
                session_id: session_id.to_string(),
                status,
            });
        }
        let response = ensure_success(response).await?;

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains(EVENT_STREAM));
        if is_stream {
            read_stream(response, on_chunk).await
        } else {
            read_buffered(response, on_chunk).await
        }
    }

    /// Cancels the in-flight send, if any.
    pub fn abort(&self) {
        if let Some(handle) = self.set_in_flight(None) {
            handle.abort();
        }
    }

    /// Forgets the session and transcript and aborts any in-flight send.
    pub async fn reset_session(&self) {
        self.abort();
        *self.session.lock().await = None;
        self.lock_transcript().clear();
    }

    /// Completed user/assistant turns since the last reset.
    pub fn transcript(&self) -> Vec<Message> {
        self.lock_transcript().clone()
    }

    fn set_in_flight(&self, handle: Option<AbortHandle>) -> Option<AbortHandle> {
        let mut slot = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *slot, handle)
    }

    fn lock_transcript(&self) -> std::sync::MutexGuard<'_, Vec<Message>> {
        self.transcript
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn ensure_success(response: Response) -> GatewayResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Upstream {
        service: "gateway",
        status,
        body,
    })
}

async fn read_stream<F>(response: Response, on_chunk: &mut F) -> GatewayResult<String>
where
    F: FnMut(&str, &str),
{
    let mut assembler = StreamAssembler::new();
    let mut stream = response.bytes_stream();
    while let Some(item) = stream.next().await {
        let bytes = item?;
        if assembler.feed(&bytes, on_chunk)? == Flow::Finished {
            break;
        }
    }
    assembler.finish(on_chunk)?;
    debug!(chars = assembler.text().len(), "response complete");
    Ok(assembler.into_text())
}

async fn read_buffered<F>(response: Response, on_chunk: &mut F) -> GatewayResult<String>
where
    F: FnMut(&str, &str),
{
    let body = response.text().await?;
    let value: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| GatewayError::malformed(format!("buffered reply: {e}")))?;
    match StreamPayload::from_value(&value) {
        StreamPayload::Failure(message) => Err(GatewayError::Stream(message)),
        payload => {
            let text = payload.delta().unwrap_or_default().to_string();
            if !text.is_empty() {
                on_chunk(&text, &text);
            }
            Ok(text)
        }
    }
}
