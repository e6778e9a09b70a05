use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;

/// Stable `code` values of the JSON error envelope.
pub mod error_codes {
    pub const EDGE_TTS_ERROR: &str = "edge_tts_error";
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const INVALID_API_KEY: &str = "invalid_api_key";
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// Credential endpoint unreachable, timed out, or answered non-2xx,
    /// and no cached session was available to fall back on.
    #[error("Failed to fetch endpoint: {0}")]
    AuthFetch(String),

    /// Synthesis endpoint answered non-2xx.
    #[error("Edge TTS API error: {status} {body}")]
    UpstreamSynthesis { status: u16, body: String },

    /// Synthesis endpoint unreachable or timed out.
    #[error("Edge TTS request failed: {0}")]
    SynthesisRequest(String),

    #[error("{0}")]
    MalformedRequest(String),

    #[error("Failed to sign endpoint request: {0}")]
    Signing(String),

    #[error("Invalid API key. Use 'Authorization: Bearer your-api-key' header")]
    InvalidApiKey,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidApiKey => StatusCode::UNAUTHORIZED,
            ApiError::AuthFetch(_)
            | ApiError::UpstreamSynthesis { .. }
            | ApiError::SynthesisRequest(_)
            | ApiError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::MalformedRequest(_) | ApiError::InvalidApiKey => "invalid_request_error",
            _ => "api_error",
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::MalformedRequest(_) => error_codes::INVALID_REQUEST,
            ApiError::InvalidApiKey => error_codes::INVALID_API_KEY,
            ApiError::AuthFetch(_)
            | ApiError::UpstreamSynthesis { .. }
            | ApiError::SynthesisRequest(_)
            | ApiError::Signing(_) => error_codes::EDGE_TTS_ERROR,
        }
    }

    /// Name of the request field at fault, when there is one.
    pub fn param(&self) -> Option<&'static str> {
        match self {
            ApiError::MalformedRequest(msg) if msg.starts_with("input") => Some("input"),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "param": self.param(),
                "code": self.error_code(),
            }
        })
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Speech synthesis failed: {}", self);
        } else {
            tracing::debug!("Rejected request: {}", self);
        }
        (status, Json(self.to_json())).into_response()
    }
}
