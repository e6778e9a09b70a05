use std::env;
use std::time::Duration;

pub const DEFAULT_ENDPOINT_URL: &str =
    "https://dev.microsofttranslator.com/apps/endpoint?api-version=1.0";
pub const DEFAULT_TTS_URL_TEMPLATE: &str =
    "https://{region}.tts.speech.microsoft.com/cognitiveservices/v1";
pub const DEFAULT_VOICE: &str = "zh-CN-XiaoxiaoNeural";

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Shared key callers must present as `Authorization: Bearer <key>`.
    /// Empty disables the check.
    pub api_key: String,
    /// Credential endpoint that hands out the region + bearer token.
    pub endpoint_url: String,
    /// Synthesis URL with a `{region}` placeholder.
    pub tts_url_template: String,
    pub upstream_timeout_secs: u64,
    pub default_voice: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8787,
            api_key: String::new(),
            endpoint_url: DEFAULT_ENDPOINT_URL.into(),
            tts_url_template: DEFAULT_TTS_URL_TEMPLATE.into(),
            upstream_timeout_secs: 30,
            default_voice: DEFAULT_VOICE.into(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();
        let config = Self {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            api_key: env::var("API_KEY").unwrap_or_default().trim().to_string(),
            endpoint_url: env::var("ENDPOINT_URL").unwrap_or(defaults.endpoint_url),
            tts_url_template: env::var("TTS_URL_TEMPLATE").unwrap_or(defaults.tts_url_template),
            upstream_timeout_secs: env::var("UPSTREAM_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.upstream_timeout_secs),
            default_voice: env::var("DEFAULT_VOICE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.default_voice),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject URLs the upstream clients could never call.
    pub fn validate(&self) -> Result<(), String> {
        url::Url::parse(&self.endpoint_url)
            .map_err(|e| format!("ENDPOINT_URL is not a valid URL: {e}"))?;
        if !self.tts_url_template.contains("{region}") {
            return Err("TTS_URL_TEMPLATE must contain a {region} placeholder".into());
        }
        url::Url::parse(&self.tts_url("eastasia"))
            .map_err(|e| format!("TTS_URL_TEMPLATE is not a valid URL: {e}"))?;
        Ok(())
    }

    pub fn is_api_key_required(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    /// Synthesis URL for the region handed out with the current session.
    pub fn tts_url(&self, region: &str) -> String {
        self.tts_url_template.replace("{region}", region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(!config.is_api_key_required());
        assert_eq!(config.upstream_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_tts_url_substitutes_region() {
        let config = Config::default();
        assert_eq!(
            config.tts_url("southeastasia"),
            "https://southeastasia.tts.speech.microsoft.com/cognitiveservices/v1"
        );
    }

    #[test]
    fn test_template_without_placeholder_rejected() {
        let config = Config {
            tts_url_template: "https://tts.example.com/v1".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_endpoint_url_rejected() {
        let config = Config {
            endpoint_url: "not a url".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
