use super::upstream::LlmUpstream;
use crate::community::{CommunityPublisher, ContentStore, GitHubContentStore, PublishRequest};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::presence::{PresenceAction, PresenceTracker, STALE_AFTER};
use axum::body::{Body, Bytes};
use axum::extract::{Path, Request, State};
use axum::http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

const EVENT_STREAM: &str = "text/event-stream";
const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Authorization, Accept";
const PREFLIGHT_MAX_AGE: &str = "86400";

// ============================================
// State
// ============================================

#[derive(Clone)]
pub struct AppState {
    config: Arc<GatewayConfig>,
    upstream: LlmUpstream,
    presence: Arc<PresenceTracker>,
    /// `Err` names the setting that keeps publishing disabled.
    publisher: Result<Arc<CommunityPublisher>, &'static str>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        let publisher = GitHubContentStore::from_config(&config.community, config.llm.timeout)
            .map(|store| Arc::new(CommunityPublisher::new(Arc::new(store))));
        Self {
            upstream: LlmUpstream::new(&config.llm),
            config: Arc::new(config),
            presence: Arc::new(PresenceTracker::default()),
            publisher,
        }
    }

    /// Publishes into `store` instead of the configured content host.
    pub fn with_content_store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.publisher = Ok(Arc::new(CommunityPublisher::new(store)));
        self
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    fn agent_id_status(&self) -> &'static str {
        if self.config.llm.default_agent_id.is_some() {
            "configured"
        } else {
            "not set"
        }
    }
}

// ============================================
// Router
// ============================================

pub fn router(state: AppState) -> Router {
    let static_dir = state.config.static_dir.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, axum::http::header::AUTHORIZATION, ACCEPT])
        .max_age(std::time::Duration::from_secs(86400));

    Router::new()
        .route("/health", get(health))
        .route("/api/chats", post(create_chat))
        .route("/api/chats/:id/continue", post(continue_chat))
        .route(
            "/api/community/publish",
            post(publish).fallback(method_not_allowed),
        )
        .route(
            "/api/presence",
            get(presence_count)
                .post(presence_update)
                .fallback(method_not_allowed),
        )
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
        .layer(cors)
        .layer(middleware::from_fn(preflight))
        .layer(TraceLayer::new_for_http())
}

/// Answers every OPTIONS request with 204 before routing.
async fn preflight(request: Request, next: Next) -> Response {
    if request.method() != Method::OPTIONS {
        return next.run(request).await;
    }
    let headers: [(HeaderName, &str); 4] = [
        (HeaderName::from_static("access-control-allow-origin"), "*"),
        (HeaderName::from_static("access-control-allow-methods"), ALLOWED_METHODS),
        (HeaderName::from_static("access-control-allow-headers"), ALLOWED_HEADERS),
        (HeaderName::from_static("access-control-max-age"), PREFLIGHT_MAX_AGE),
    ];
    (StatusCode::NO_CONTENT, headers).into_response()
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
        .into_response()
}

// ============================================
// Handlers
// ============================================

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Wizard gateway is running",
        "configured": state.upstream.is_configured(),
        "agentId": state.agent_id_status(),
        "baseUrl": state.upstream.base_url(),
    }))
}

async fn create_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<Response> {
    let body = inject_agent_id(body, state.config.llm.default_agent_id.as_deref());
    let response = state
        .upstream
        .forward(reqwest::Method::POST, "/api/chats", &headers, body)
        .await
        .inspect_err(|err| warn!("create chat failed: {}", err))?;
    relay_response(response, &headers).await
}

async fn continue_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<Response> {
    if !is_opaque_id(&chat_id) {
        return Err(GatewayError::InvalidRequest(format!(
            "invalid chat id '{chat_id}'"
        )));
    }
    let path = format!("/api/chats/{chat_id}/continue");
    let response = state
        .upstream
        .forward(reqwest::Method::POST, &path, &headers, body)
        .await
        .inspect_err(|err| warn!(chat_id = %chat_id, "continue chat failed: {}", err))?;
    relay_response(response, &headers).await
}

/// Chat ids are a single path segment of `[A-Za-z0-9_-]`.
fn is_opaque_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Fills `data.attributes.agentId` from the server default when the caller
/// left it out. Bodies of any other shape pass through untouched.
fn inject_agent_id(body: Bytes, default_agent_id: Option<&str>) -> Bytes {
    let Some(agent_id) = default_agent_id else {
        return body;
    };
    let Ok(mut document) = serde_json::from_slice::<Value>(&body) else {
        return body;
    };
    let Some(attributes) = document
        .pointer_mut("/data/attributes")
        .and_then(Value::as_object_mut)
    else {
        return body;
    };

    let absent = match attributes.get("agentId") {
        None | Some(Value::Null) => true,
        Some(Value::String(existing)) => existing.is_empty(),
        Some(_) => false,
    };
    if !absent {
        return body;
    }
    attributes.insert("agentId".into(), Value::String(agent_id.to_string()));

    match serde_json::to_vec(&document) {
        Ok(rewritten) => Bytes::from(rewritten),
        Err(_) => body,
    }
}

/// Returns the upstream reply to the caller.
///
/// Errors keep their status and body. Event streams are forwarded chunk by
/// chunk; dropping the downstream body drops the upstream connection.
async fn relay_response(upstream: reqwest::Response, incoming: &HeaderMap) -> GatewayResult<Response> {
    let status = upstream.status();
    let upstream_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();

    if !status.is_success() {
        let body = upstream.bytes().await?;
        warn!(%status, "llm api returned an error, passing it through");
        return Ok((status, [(CONTENT_TYPE, upstream_type)], body).into_response());
    }

    let wants_stream = incoming
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains(EVENT_STREAM));
    if wants_stream || upstream_type.contains(EVENT_STREAM) {
        debug!(%status, "streaming llm response");
        let headers = [(CONTENT_TYPE, EVENT_STREAM), (CACHE_CONTROL, "no-cache")];
        return Ok((status, headers, Body::from_stream(upstream.bytes_stream())).into_response());
    }

    let body = upstream.bytes().await?;
    Ok((status, [(CONTENT_TYPE, upstream_type)], body).into_response())
}

async fn publish(State(state): State<AppState>, body: Bytes) -> GatewayResult<Json<Value>> {
    let request: PublishRequest = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::InvalidRequest(format!("publish body: {e}")))?;
    let draft = request.validate()?;

    let publisher = state.publisher.as_ref().map_err(|missing| {
        GatewayError::configuration(format!("{missing} is not configured"))
    })?;
    let receipt = publisher
        .publish(draft)
        .await
        .inspect_err(|err| warn!("publish failed: {}", err))?;

    Ok(Json(json!({
        "success": true,
        "message": "Agent published successfully",
        "agentId": receipt.agent_id,
        "commit": receipt.commit,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresenceUpdate {
    session_id: Option<String>,
    #[serde(default)]
    action: Option<PresenceAction>,
}

async fn presence_count(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "count": state.presence.count() }))
}

async fn presence_update(State(state): State<AppState>, body: Bytes) -> Response {
    let update = serde_json::from_slice::<PresenceUpdate>(&body).ok();
    let Some((session_id, action)) = update.and_then(|u| {
        u.session_id
            .filter(|id| !id.is_empty())
            .map(|id| (id, u.action.unwrap_or_default()))
    }) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "sessionId required" })),
        )
            .into_response();
    };

    let count = state.presence.touch(&session_id, action);
    Json(json!({ "count": count, "sessionId": session_id })).into_response()
}

// ============================================
// Serve
// ============================================

pub async fn serve(config: GatewayConfig) -> GatewayResult<()> {
    let addr = format!("{}:{}", config.bind_addr, config.port);
    let state = AppState::new(config);
    log_startup(&state, &addr);

    let sweeper = tokio::spawn(sweep_presence(state.presence.clone()));
    let listener = TcpListener::bind(&addr).await?;
    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();

    info!("wizard gateway stopped");
    Ok(result?)
}

fn log_startup(state: &AppState, addr: &str) {
    info!("wizard gateway listening on http://{}", addr);
    info!(
        base_url = %state.upstream.base_url(),
        agent_id = state.agent_id_status(),
        "llm api"
    );
    if !state.upstream.is_configured() {
        warn!("LLM_API_KEY is not set; chat requests will fail until it is configured");
    }
    match &state.publisher {
        Ok(_) => info!(file = %state.config.community.file_path, "community publishing enabled"),
        Err(missing) => info!("community publishing disabled ({} not set)", missing),
    }
    info!(static_dir = %state.config.static_dir, "serving static files");
}

async fn sweep_presence(presence: Arc<PresenceTracker>) {
    let mut interval = tokio::time::interval(STALE_AFTER);
    loop {
        interval.tick().await;
        let dropped = presence.sweep();
        if dropped > 0 {
            debug!(dropped, "expired presence sessions");
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("could not listen for ctrl-c: {}", err);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
