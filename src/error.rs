use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::time::Duration;

/// Every failure the gateway, its client, and the publish flow can report.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Caller omitted required fields. Raised before any network call.
    #[error("missing required fields: {}", .missing.join(", "))]
    Validation { missing: Vec<&'static str> },

    /// Request body could not be parsed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Server-side credential or environment value is missing or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An external dependency answered with a non-success status.
    #[error("{service} returned {status}: {body}")]
    Upstream {
        service: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    /// The content-hash token was stale at write time.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("chat session {session_id} is gone (status {status})")]
    SessionExpired {
        session_id: String,
        status: StatusCode,
    },

    /// An `error` field arrived inside the event stream.
    #[error("stream error: {0}")]
    Stream(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("request aborted")]
    Aborted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Stable machine-readable kind, used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Configuration(_) => "configuration",
            Self::Upstream { .. } | Self::Network(_) | Self::Timeout(_) => "upstream_unavailable",
            Self::Conflict(_) => "conflict",
            Self::SessionExpired { .. } => "session_expired",
            Self::Stream(_) => "stream",
            Self::Malformed(_) => "malformed",
            Self::Aborted => "aborted",
            Self::Io(_) => "io",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Configuration(_) | Self::Network(_) | Self::Timeout(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Upstream { .. } | Self::Stream(_) | Self::Malformed(_) => StatusCode::BAD_GATEWAY,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::SessionExpired { .. } => StatusCode::GONE,
            Self::Aborted => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "Missing required fields",
            Self::InvalidRequest(_) => "Invalid request",
            Self::Configuration(_) => "Server configuration error",
            Self::Network(_) | Self::Timeout(_) => "Proxy error",
            Self::Upstream { .. } => "Upstream error",
            Self::Conflict(_) => "Conflict",
            Self::SessionExpired { .. } => "Session expired",
            Self::Stream(_) => "Stream error",
            Self::Malformed(_) => "Malformed upstream response",
            Self::Aborted => "Aborted",
            Self::Io(_) => "Internal error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.title(),
            "message": self.to_string(),
            "kind": self.kind(),
        });
        if let Self::Validation { missing } = &self {
            body["missing"] = json!(missing);
        }
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_lists_missing_fields() {
        let err = GatewayError::Validation {
            missing: vec!["name", "data"],
        };
        assert_eq!(err.to_string(), "missing required fields: name, data");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn configuration_is_a_server_fault() {
        let err = GatewayError::configuration("LLM_API_KEY is not set");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn conflict_and_aborted_are_distinct() {
        assert_eq!(
            GatewayError::Conflict("stale".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(GatewayError::Aborted.status().as_u16(), 499);
        assert_eq!(GatewayError::Aborted.kind(), "aborted");
    }
}
