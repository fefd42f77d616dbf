use crate::config::LlmConfig;
use crate::error::{GatewayError, GatewayResult};
use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Response};
use std::time::Duration;
use tracing::debug;

pub const JSON_API: &str = "application/vnd.api+json";

/// Credentialed connection to the LLM API. The key never leaves this struct.
#[derive(Clone)]
pub struct LlmUpstream {
    http: Client,
    base_url: String,
    authorization: Option<String>,
    timeout: Duration,
}

impl LlmUpstream {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            authorization: config
                .api_key
                .as_ref()
                .map(|key| format!("{} {}", config.auth_scheme, key)),
            timeout: config.timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_configured(&self) -> bool {
        self.authorization.is_some()
    }

    /// Sends `body` to `path` with server-side credentials attached.
    ///
    /// Content-Type and Accept are taken from the caller when present and
    /// default to JSON:API. The timeout covers the wait for response headers
    /// only; a streamed body may run longer.
    pub async fn forward(
        &self,
        method: Method,
        path: &str,
        incoming: &HeaderMap,
        body: Bytes,
    ) -> GatewayResult<Response> {
        let Some(authorization) = &self.authorization else {
            return Err(GatewayError::configuration("LLM_API_KEY is not configured"));
        };

        let content_type = incoming
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(JSON_API);
        let accept = incoming
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(JSON_API);

        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, accept, "forwarding to llm api");

        let request = self
            .http
            .request(method, &url)
            .header(AUTHORIZATION, authorization.as_str())
            .header(CONTENT_TYPE, content_type)
            .header(ACCEPT, accept)
            .body(body)
            .send();

        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(GatewayError::Timeout(self.timeout)),
        }
    }
}
