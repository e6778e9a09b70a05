//! Request signing for the translator credential endpoint.
//!
//! The endpoint accepts a call only when it carries an `X-MT-Signature`
//! header of the form `appId::base64(hmac)::date::traceId`, where the HMAC
//! is computed over the lowercased canonical string
//! `appId + urlencode(host/path?query) + date + traceId`.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

pub const APP_ID: &str = "MSTranslatorAndroidApp";

/// Shared secret baked into the upstream client app.
const SHARED_SECRET_B64: &str =
    "oik6PdDdMnOXemTbwvMn9de/h9lFnfBaCWbGMMZqqoSaQaqUOqjVGm5NqsmjcBI1x+sS9ugjB55HEJWRiFXYFw==";

/// A signature header together with the trace id it was bound to.
#[derive(Debug, Clone)]
pub struct Signature {
    pub header: String,
    pub trace_id: String,
}

/// Random 32-hex-character nonce (a v4 UUID without hyphens).
pub fn generate_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// `Sat, 18 Oct 2026 06:13:00 GMT` rendered in lowercase.
pub fn format_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
        .to_lowercase()
}

fn strip_scheme(url: &str) -> &str {
    url.split_once("://").map(|(_, rest)| rest).unwrap_or(url)
}

/// Percent-encode like the translator app does. `urlencoding` also escapes
/// `!*'()`, which the app leaves literal.
fn encode_component(input: &str) -> String {
    urlencoding::encode(input)
        .replace("%21", "!")
        .replace("%2A", "*")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
}

pub fn canonical_string(app_id: &str, url: &str, formatted_date: &str, trace_id: &str) -> String {
    let encoded_url = encode_component(strip_scheme(url));
    format!("{app_id}{encoded_url}{formatted_date}{trace_id}").to_lowercase()
}

/// Everything that goes into one signature. One per credential fetch.
#[derive(Debug, Clone)]
pub struct SigningContext {
    pub trace_id: String,
    pub formatted_date: String,
    pub canonical_string: String,
}

impl SigningContext {
    pub fn new(url: &str, trace_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        let trace_id = trace_id.into();
        let formatted_date = format_date(now);
        let canonical_string = canonical_string(APP_ID, url, &formatted_date, &trace_id);
        Self {
            trace_id,
            formatted_date,
            canonical_string,
        }
    }

    /// Compute the `X-MT-Signature` header value.
    pub fn sign(&self) -> Result<String, ApiError> {
        let key = STANDARD
            .decode(SHARED_SECRET_B64)
            .map_err(|e| ApiError::Signing(format!("Invalid shared secret: {e}")))?;
        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| ApiError::Signing(format!("HMAC init error: {e}")))?;
        mac.update(self.canonical_string.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!(
            "{APP_ID}::{signature}::{}::{}",
            self.formatted_date, self.trace_id
        ))
    }
}

/// Sign `url` with a caller-supplied trace id, so the same id can be sent
/// as `X-ClientTraceId`.
pub fn sign_with_trace_id(url: &str, trace_id: &str) -> Result<Signature, ApiError> {
    let ctx = SigningContext::new(url, trace_id, Utc::now());
    Ok(Signature {
        header: ctx.sign()?,
        trace_id: ctx.trace_id,
    })
}

/// Sign `url` with a fresh trace id.
pub fn sign(url: &str) -> Result<Signature, ApiError> {
    sign_with_trace_id(url, &generate_trace_id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const URL: &str = "https://dev.microsofttranslator.com/apps/endpoint?api-version=1.0";
    const NONCE: &str = "0123456789abcdef0123456789abcdef";

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 5, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date(fixed_time()), "fri, 05 jan 2024 03:04:05 gmt");
    }

    #[test]
    fn test_canonical_string_strips_scheme_and_encodes() {
        let date = format_date(fixed_time());
        assert_eq!(
            canonical_string(APP_ID, URL, &date, NONCE),
            "mstranslatorandroidappdev.microsofttranslator.com%2fapps%2fendpoint%3fapi-version%3d1.0\
             fri, 05 jan 2024 03:04:05 gmt0123456789abcdef0123456789abcdef"
        );
    }

    #[test]
    fn test_canonical_string_keeps_component_marks() {
        assert_eq!(
            canonical_string("App", "https://host/p?q=(a)!*'~b c", "d", "t"),
            "apphost%2fp%3fq%3d(a)!*'~b%20cdt"
        );
        // A literal escape in the URL is encoded again, not decoded.
        assert_eq!(canonical_string("a", "h/%21", "d", "t"), "ah%2f%2521dt");
    }

    #[test]
    fn test_known_signature() {
        let header = SigningContext::new(URL, NONCE, fixed_time()).sign().unwrap();
        assert_eq!(
            header,
            "MSTranslatorAndroidApp::EHjVZXQ2Y1RXp6Fva5YfNHpCdWu5opNrBMmQhpe7meY=::\
             fri, 05 jan 2024 03:04:05 gmt::0123456789abcdef0123456789abcdef"
        );
    }

    #[test]
    fn test_signature_is_deterministic() {
        let a = SigningContext::new(URL, NONCE, fixed_time()).sign().unwrap();
        let b = SigningContext::new(URL, NONCE, fixed_time()).sign().unwrap();
        assert_eq!(a, b);
    }

    fn signature_part(header: &str) -> String {
        header.split("::").nth(1).unwrap().to_string()
    }

    #[test]
    fn test_each_input_changes_signature() {
        let base = signature_part(&SigningContext::new(URL, NONCE, fixed_time()).sign().unwrap());

        let other_url = "https://dev.microsofttranslator.com/apps/endpoint?api-version=2.0";
        let by_url = signature_part(&SigningContext::new(other_url, NONCE, fixed_time()).sign().unwrap());

        let other_nonce = "ffffffffffffffffffffffffffffffff";
        let by_nonce = signature_part(&SigningContext::new(URL, other_nonce, fixed_time()).sign().unwrap());

        let later = fixed_time() + chrono::Duration::seconds(1);
        let by_date = signature_part(&SigningContext::new(URL, NONCE, later).sign().unwrap());

        assert_ne!(base, by_url);
        assert_ne!(base, by_nonce);
        assert_ne!(base, by_date);
    }

    #[test]
    fn test_trace_id_format() {
        let id = generate_trace_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_trace_id());
    }

    #[test]
    fn test_sign_binds_trace_id() {
        let sig = sign_with_trace_id(URL, NONCE).unwrap();
        assert_eq!(sig.trace_id, NONCE);
        let parts: Vec<&str> = sig.header.split("::").collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], APP_ID);
        assert_eq!(parts[3], NONCE);
    }
}
