use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Deserialize;

use crate::auth::middleware::ApiKeyAuth;
use crate::error::ApiError;
use crate::services::tts::{rate_offset_percent, OutputFormat, SynthesisRequest};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/audio/speech", post(create_speech))
}

/// OpenAI-compatible `/v1/audio/speech` body.
#[derive(Debug, Deserialize)]
pub struct SpeechRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub response_format: Option<String>,
    #[serde(default)]
    pub speed: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SpeechQuery {
    #[serde(default)]
    pub download: bool,
}

impl SpeechRequest {
    pub fn into_synthesis(
        self,
        default_voice: &str,
        download: bool,
    ) -> Result<SynthesisRequest, ApiError> {
        let text = self
            .input
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ApiError::MalformedRequest("input is required".into()))?;

        let speed = self.speed.unwrap_or(1.0);
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ApiError::MalformedRequest(
                "speed must be a positive number".into(),
            ));
        }

        let voice_name = self
            .voice
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default_voice.to_string());

        let output_format = self
            .response_format
            .as_deref()
            .map(OutputFormat::from_response_format)
            .unwrap_or_default();

        Ok(SynthesisRequest {
            text,
            voice_name,
            rate_offset_percent: rate_offset_percent(speed),
            output_format,
            download,
        })
    }
}

async fn create_speech(
    State(state): State<AppState>,
    _auth: ApiKeyAuth,
    Query(query): Query<SpeechQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payload: SpeechRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::MalformedRequest(format!("Invalid JSON body: {e}")))?;
    tracing::debug!(model = ?payload.model, "Speech request");

    let req = payload.into_synthesis(&state.config.default_voice, query.download)?;
    let audio = state.tts.synthesize(&req).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&audio.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(req.output_format.content_type())),
    );
    if let Some(filename) = &audio.filename {
        if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
    }

    Ok((StatusCode::OK, headers, Body::from_stream(audio.body)).into_response())
}
