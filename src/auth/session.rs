//! Upstream session cache.
//!
//! The gateway holds one shared session (region + bearer token) for every
//! caller. It is reused until it comes within [`REFRESH_MARGIN_SECS`] of its
//! expiry, then refreshed from the credential endpoint. If a refresh fails
//! while some session is cached, the stale one is served instead.

use std::sync::Arc;
use std::time::Duration;

use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine,
};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;

use crate::auth::signer;
use crate::error::ApiError;

/// Refresh this long before the token actually expires.
pub const REFRESH_MARGIN_SECS: i64 = 5 * 60;

pub const USER_AGENT: &str = "okhttp/4.5.0";
const CLIENT_VERSION: &str = "4.0.530a 5fe1dc6c";
const USER_ID: &str = "0f04d16a175c411e";
const HOME_REGION: &str = "zh-Hans-CN";

/// Endpoint record returned by the credential endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointInfo {
    /// Region to synthesize against, e.g. `southeastasia`.
    #[serde(rename = "r")]
    pub region: String,
    /// Bearer token for the synthesis endpoint.
    #[serde(rename = "t")]
    pub token: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub endpoint: EndpointInfo,
    pub token: String,
    /// Epoch seconds, taken from the token's `exp` claim.
    pub expires_at: i64,
}

impl Session {
    pub fn from_endpoint(endpoint: EndpointInfo) -> Result<Self, ApiError> {
        let expires_at = token_expiry(&endpoint.token)?;
        Ok(Self {
            token: endpoint.token.clone(),
            endpoint,
            expires_at,
        })
    }

    pub fn region(&self) -> &str {
        &self.endpoint.region
    }

    /// Usable without a refresh at `now` (epoch seconds).
    pub fn is_fresh(&self, now: i64) -> bool {
        now < self.expires_at - REFRESH_MARGIN_SECS
    }

    pub fn remaining_secs(&self, now: i64) -> i64 {
        self.expires_at - now
    }
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    exp: i64,
}

/// Read `exp` out of the token's middle (claims) segment.
pub fn token_expiry(token: &str) -> Result<i64, ApiError> {
    let segment = token
        .split('.')
        .nth(1)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::AuthFetch("token has no claims segment".into()))?;
    let segment = segment.trim_end_matches('=');

    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .or_else(|_| STANDARD_NO_PAD.decode(segment))
        .map_err(|e| ApiError::AuthFetch(format!("token claims are not base64: {e}")))?;
    let claims: TokenClaims = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::AuthFetch(format!("token claims are invalid: {e}")))?;

    Ok(claims.exp)
}

/// Source of fresh endpoint records.
pub trait EndpointFetcher: Send + Sync {
    fn fetch_endpoint(&self) -> BoxFuture<'_, Result<EndpointInfo, ApiError>>;
}

/// Fetches endpoint records from the signed translator credential endpoint.
pub struct HttpEndpointFetcher {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpEndpointFetcher {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    async fn fetch(&self) -> Result<EndpointInfo, ApiError> {
        let trace_id = signer::generate_trace_id();
        let signature = signer::sign_with_trace_id(&self.url, &trace_id)?;

        let resp = self
            .client
            .post(&self.url)
            .header("Accept-Language", "zh-Hans")
            .header("X-ClientVersion", CLIENT_VERSION)
            .header("X-UserId", USER_ID)
            .header("X-HomeGeographicRegion", HOME_REGION)
            .header("X-ClientTraceId", &signature.trace_id)
            .header("X-MT-Signature", &signature.header)
            .header("User-Agent", USER_AGENT)
            .header("Content-Type", "application/json; charset=utf-8")
            .body(Vec::new())
            .send()
            .await
            .map_err(|e| ApiError::AuthFetch(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ApiError::AuthFetch(format!(
                "endpoint returned {}",
                resp.status().as_u16()
            )));
        }

        resp.json::<EndpointInfo>()
            .await
            .map_err(|e| ApiError::AuthFetch(format!("invalid endpoint response: {e}")))
    }
}

impl EndpointFetcher for HttpEndpointFetcher {
    fn fetch_endpoint(&self) -> BoxFuture<'_, Result<EndpointInfo, ApiError>> {
        Box::pin(async move {
            tokio::time::timeout(self.timeout, self.fetch())
                .await
                .map_err(|_| ApiError::AuthFetch("endpoint request timed out".into()))?
        })
    }
}

/// One refresh attempt, awaited by every caller that needed it.
type SharedRefresh = Shared<BoxFuture<'static, Result<Arc<Session>, ApiError>>>;

pub struct SessionManager {
    fetcher: Arc<dyn EndpointFetcher>,
    current: RwLock<Option<Arc<Session>>>,
    /// The refresh in flight, if any. Concurrent callers await the same one.
    inflight: Mutex<Option<SharedRefresh>>,
}

impl SessionManager {
    pub fn new(fetcher: Arc<dyn EndpointFetcher>) -> Self {
        Self {
            fetcher,
            current: RwLock::new(None),
            inflight: Mutex::new(None),
        }
    }

    /// The cached session, whether fresh or not.
    pub fn cached(&self) -> Option<Arc<Session>> {
        self.current.read().clone()
    }

    fn fresh_cached(&self, now: i64) -> Option<Arc<Session>> {
        self.cached().filter(|s| s.is_fresh(now))
    }

    fn start_refresh(&self) -> SharedRefresh {
        let fetcher = Arc::clone(&self.fetcher);
        async move {
            let endpoint = fetcher.fetch_endpoint().await?;
            Session::from_endpoint(endpoint).map(Arc::new)
        }
        .boxed()
        .shared()
    }

    pub async fn get_session(&self) -> Result<Arc<Session>, ApiError> {
        if let Some(session) = self.fresh_cached(Utc::now().timestamp()) {
            tracing::debug!(
                "Using cached token, {:.1} minutes remaining",
                session.remaining_secs(Utc::now().timestamp()) as f64 / 60.0
            );
            return Ok(session);
        }

        let refresh = {
            let mut inflight = self.inflight.lock();
            // A refresh may have landed since the check above.
            if let Some(session) = self.fresh_cached(Utc::now().timestamp()) {
                return Ok(session);
            }
            inflight.get_or_insert_with(|| self.start_refresh()).clone()
        };

        let refreshed = refresh.clone().await;
        self.finish_refresh(&refresh, &refreshed);

        match refreshed {
            Ok(session) => Ok(session),
            Err(e @ ApiError::Signing(_)) => Err(e),
            Err(e) => match self.cached() {
                Some(stale) => {
                    tracing::warn!("Token refresh failed ({}), using cached token", e);
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }

    /// The first waiter back publishes the outcome and clears the slot so
    /// the next stale caller starts a new attempt.
    fn finish_refresh(&self, refresh: &SharedRefresh, outcome: &Result<Arc<Session>, ApiError>) {
        let mut inflight = self.inflight.lock();
        if !inflight.as_ref().is_some_and(|f| f.ptr_eq(refresh)) {
            return;
        }
        if let Ok(session) = outcome {
            *self.current.write() = Some(Arc::clone(session));
            tracing::info!(
                region = %session.region(),
                "Fetched new token, valid for {:.1} minutes",
                session.remaining_secs(Utc::now().timestamp()) as f64 / 60.0
            );
        }
        *inflight = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_token(exp: i64) -> String {
        let claims = serde_json::json!({ "exp": exp, "region": "eastasia" }).to_string();
        format!(
            "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.{}.c2lnbmF0dXJl",
            URL_SAFE_NO_PAD.encode(claims)
        )
    }

    fn endpoint(region: &str, exp: i64) -> EndpointInfo {
        EndpointInfo {
            region: region.into(),
            token: make_token(exp),
            extra: serde_json::Map::new(),
        }
    }

    /// Plays back queued results and counts calls.
    struct ScriptedFetcher {
        calls: AtomicUsize,
        results: parking_lot::Mutex<VecDeque<Result<EndpointInfo, ApiError>>>,
        delay: Duration,
    }

    impl ScriptedFetcher {
        fn new(results: Vec<Result<EndpointInfo, ApiError>>) -> Arc<Self> {
            Self::with_delay(results, Duration::ZERO)
        }

        fn with_delay(results: Vec<Result<EndpointInfo, ApiError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                results: parking_lot::Mutex::new(results.into()),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl EndpointFetcher for ScriptedFetcher {
        fn fetch_endpoint(&self) -> BoxFuture<'_, Result<EndpointInfo, ApiError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.results
                    .lock()
                    .pop_front()
                    .unwrap_or_else(|| Err(ApiError::AuthFetch("no scripted result".into())))
            })
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    #[test]
    fn test_claims_extraction() {
        assert_eq!(token_expiry(&make_token(1_700_000_000)).unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_claims_extraction_accepts_padded_standard_base64() {
        let segment = base64::engine::general_purpose::STANDARD.encode(r#"{"exp": 1700000000}"#);
        assert!(segment.ends_with('='));
        let token = format!("header.{segment}.sig");
        assert_eq!(token_expiry(&token).unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_claims_extraction_rejects_garbage() {
        assert!(token_expiry("no-dots-here").is_err());
        assert!(token_expiry("a..c").is_err());
        assert!(token_expiry("a.!!!.c").is_err());
        let no_exp = URL_SAFE_NO_PAD.encode(r#"{"sub":"x"}"#);
        assert!(token_expiry(&format!("a.{no_exp}.c")).is_err());
    }

    #[test]
    fn test_freshness_boundary() {
        let session = Session::from_endpoint(endpoint("eastasia", 10_000)).unwrap();
        assert!(session.is_fresh(10_000 - REFRESH_MARGIN_SECS - 1));
        assert!(!session.is_fresh(10_000 - REFRESH_MARGIN_SECS));
        assert!(!session.is_fresh(20_000));
    }

    #[tokio::test]
    async fn test_fresh_session_is_reused_without_fetching() {
        let fetcher = ScriptedFetcher::new(vec![Ok(endpoint("eastasia", now() + 3600))]);
        let manager = SessionManager::new(fetcher.clone());

        let first = manager.get_session().await.unwrap();
        let second = manager.get_session().await.unwrap();

        assert_eq!(fetcher.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_session_inside_margin_triggers_one_refresh() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(endpoint("eastasia", now() + REFRESH_MARGIN_SECS)),
            Ok(endpoint("westus", now() + 3600)),
        ]);
        let manager = SessionManager::new(fetcher.clone());

        manager.get_session().await.unwrap();
        let refreshed = manager.get_session().await.unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert_eq!(refreshed.region(), "westus");
    }

    #[tokio::test]
    async fn test_expired_session_triggers_refresh() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(endpoint("eastasia", now() - 60)),
            Ok(endpoint("westus", now() + 3600)),
        ]);
        let manager = SessionManager::new(fetcher.clone());

        manager.get_session().await.unwrap();
        assert_eq!(manager.get_session().await.unwrap().region(), "westus");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_stale_session() {
        let fetcher = ScriptedFetcher::new(vec![
            Ok(endpoint("eastasia", now() + 60)),
            Err(ApiError::AuthFetch("endpoint returned 503".into())),
        ]);
        let manager = SessionManager::new(fetcher.clone());

        let first = manager.get_session().await.unwrap();
        let fallback = manager.get_session().await.unwrap();

        assert_eq!(fetcher.calls(), 2);
        assert!(Arc::ptr_eq(&first, &fallback));
        assert_eq!(fallback.token, first.token);
    }

    #[tokio::test]
    async fn test_failed_refresh_without_cache_is_an_error() {
        let fetcher = ScriptedFetcher::new(vec![Err(ApiError::AuthFetch("connection refused".into()))]);
        let manager = SessionManager::new(fetcher.clone());

        let err = manager.get_session().await.unwrap_err();
        assert!(matches!(err, ApiError::AuthFetch(_)));
        assert!(manager.cached().is_none());
    }

    #[tokio::test]
    async fn test_bad_token_counts_as_failed_refresh() {
        let mut broken = endpoint("westus", 0);
        broken.token = "not-a-jwt".into();
        let fetcher = ScriptedFetcher::new(vec![Ok(endpoint("eastasia", now() + 60)), Ok(broken)]);
        let manager = SessionManager::new(fetcher.clone());

        manager.get_session().await.unwrap();
        let session = manager.get_session().await.unwrap();
        assert_eq!(session.region(), "eastasia");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let fetcher = ScriptedFetcher::with_delay(
            vec![Ok(endpoint("eastasia", now() + 3600))],
            Duration::from_millis(50),
        );
        let manager = Arc::new(SessionManager::new(fetcher.clone()));

        let calls = (0..8).map(|_| {
            let manager = Arc::clone(&manager);
            async move { manager.get_session().await }
        });
        let results = futures::future::join_all(calls).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_refresh_is_shared_by_waiters() {
        let fetcher = ScriptedFetcher::with_delay(
            vec![
                Ok(endpoint("eastasia", now() + 60)),
                Err(ApiError::AuthFetch("endpoint request timed out".into())),
            ],
            Duration::from_millis(200),
        );
        let manager = Arc::new(SessionManager::new(fetcher.clone()));
        manager.get_session().await.unwrap();

        let started = std::time::Instant::now();
        let calls = (0..8).map(|_| {
            let manager = Arc::clone(&manager);
            async move { manager.get_session().await }
        });
        let results = futures::future::join_all(calls).await;
        let elapsed = started.elapsed();

        assert!(results
            .iter()
            .all(|r| r.as_ref().is_ok_and(|s| s.region() == "eastasia")));
        assert_eq!(fetcher.calls(), 2, "Waiters should share one failed attempt");
        assert!(
            elapsed < Duration::from_millis(600),
            "Waiters were serialized: {elapsed:?}"
        );

        // The failed attempt is not reused; the next stale caller tries again.
        manager.get_session().await.unwrap();
        assert_eq!(fetcher.calls(), 3);
    }

    #[test]
    fn test_endpoint_info_keeps_unknown_fields() {
        let info: EndpointInfo =
            serde_json::from_str(r#"{"r":"eastasia","t":"a.b.c","u":"https://example"}"#).unwrap();
        assert_eq!(info.region, "eastasia");
        assert_eq!(info.token, "a.b.c");
        assert_eq!(info.extra["u"], "https://example");
    }
}
