//! Neural TTS (Text-to-Speech) service.
//!
//! Turns a synthesis request into an SSML document, posts it to the
//! regional `/cognitiveservices/v1` endpoint with the current session token,
//! and hands the audio body back as a stream.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::Stream;

use crate::auth::session::{SessionManager, USER_AGENT};
use crate::config::Config;
use crate::error::ApiError;
use crate::utils::filename::generate_audio_filename;

/// Upstream audio body, relayed chunk by chunk.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

const SSML_LANG: &str = "zh-CN";

/// Audio encodings the gateway can request upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Mp3,
    Opus,
    Wav,
    Pcm,
}

impl OutputFormat {
    /// Map an OpenAI `response_format`. Anything unsupported gets MP3.
    pub fn from_response_format(format: &str) -> Self {
        match format.trim().to_ascii_lowercase().as_str() {
            "opus" => Self::Opus,
            "wav" => Self::Wav,
            "pcm" => Self::Pcm,
            "mp3" => Self::Mp3,
            other => {
                tracing::debug!("Unsupported response_format {:?}, using mp3", other);
                Self::Mp3
            }
        }
    }

    /// Value of the `X-Microsoft-OutputFormat` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio-24khz-48kbitrate-mono-mp3",
            Self::Opus => "ogg-24khz-16bit-mono-opus",
            Self::Wav => "riff-24khz-16bit-mono-pcm",
            Self::Pcm => "raw-24khz-16bit-mono-pcm",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Opus => "audio/ogg",
            Self::Wav => "audio/wav",
            Self::Pcm => "audio/pcm",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Opus => "ogg",
            Self::Wav => "wav",
            Self::Pcm => "pcm",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_name: String,
    pub rate_offset_percent: i32,
    pub output_format: OutputFormat,
    /// Attach a `Content-Disposition` filename to the response.
    pub download: bool,
}

/// `speed` multiplier to a prosody rate offset: 1.5 -> 50, 0.5 -> -50.
pub fn rate_offset_percent(speed: f64) -> i32 {
    ((speed - 1.0) * 100.0).round() as i32
}

pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

pub fn build_ssml(text: &str, voice_name: &str, rate_offset_percent: i32) -> String {
    format!(
        concat!(
            r#"<speak xmlns="http://www.w3.org/2001/10/synthesis" xmlns:mstts="http://www.w3.org/2001/mstts" version="1.0" xml:lang="{lang}">"#,
            r#"<voice name="{voice}">"#,
            r#"<mstts:express-as style="general" styledegree="1.0" role="default">"#,
            r#"<prosody rate="{rate}%" pitch="0%" volume="50">{text}</prosody>"#,
            r#"</mstts:express-as>"#,
            r#"</voice>"#,
            r#"</speak>"#,
        ),
        lang = SSML_LANG,
        voice = escape_xml(voice_name),
        rate = rate_offset_percent,
        text = escape_xml(text),
    )
}

/// Successful synthesis, ready to be relayed.
pub struct SynthesizedAudio {
    pub content_type: String,
    pub filename: Option<String>,
    pub body: AudioStream,
}

pub struct Synthesizer {
    client: reqwest::Client,
    sessions: Arc<SessionManager>,
    config: Config,
}

impl Synthesizer {
    pub fn new(client: reqwest::Client, sessions: Arc<SessionManager>, config: Config) -> Self {
        Self {
            client,
            sessions,
            config,
        }
    }

    fn timeout(&self) -> Duration {
        self.config.upstream_timeout()
    }

    /// Synthesize `req`. Single attempt; the body is not buffered.
    pub async fn synthesize(&self, req: &SynthesisRequest) -> Result<SynthesizedAudio, ApiError> {
        let session = self.sessions.get_session().await?;
        let url = self.config.tts_url(session.region());

        let request = self
            .client
            .post(&url)
            .header("Authorization", &session.token)
            .header("Content-Type", "application/ssml+xml")
            .header("User-Agent", USER_AGENT)
            .header("X-Microsoft-OutputFormat", req.output_format.as_str())
            .body(build_ssml(&req.text, &req.voice_name, req.rate_offset_percent));

        // Only the wait for response headers is bounded; a long audio body
        // keeps streaming past the timeout.
        let resp = tokio::time::timeout(self.timeout(), request.send())
            .await
            .map_err(|_| ApiError::SynthesisRequest("request timed out".into()))?
            .map_err(|e| ApiError::SynthesisRequest(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::UpstreamSynthesis { status, body });
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(req.output_format.content_type())
            .to_string();

        let filename = req
            .download
            .then(|| generate_audio_filename(req.output_format.extension()));

        Ok(SynthesizedAudio {
            content_type,
            filename,
            body: Box::pin(resp.bytes_stream()),
        })
    }
}
