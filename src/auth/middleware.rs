use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use crate::error::ApiError;
use crate::AppState;

/// Caller presented the configured API key, or none is configured.
#[derive(Debug, Clone, Copy)]
pub struct ApiKeyAuth;

impl<S> FromRequestParts<S> for ApiKeyAuth
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        if !app_state.config.is_api_key_required() {
            return Ok(ApiKeyAuth);
        }

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        match extract_bearer_token(auth_header) {
            Some(key) if key == app_state.config.api_key => Ok(ApiKeyAuth),
            _ => Err(ApiError::InvalidApiKey),
        }
    }
}

/// Pull the key out of an `Authorization: Bearer <key>` header value.
fn extract_bearer_token(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ").filter(|t| !t.is_empty())
}
