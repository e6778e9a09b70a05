pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use auth::session::{EndpointFetcher, HttpEndpointFetcher, SessionManager};
use services::tts::Synthesizer;

#[derive(Clone)]
pub struct AppState {
    pub config: config::Config,
    pub sessions: Arc<SessionManager>,
    pub tts: Arc<Synthesizer>,
}

impl AppState {
    pub fn new(config: config::Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let fetcher = Arc::new(HttpEndpointFetcher::new(
            client.clone(),
            config.endpoint_url.clone(),
            config.upstream_timeout(),
        ));
        Ok(Self::with_fetcher(config, client, fetcher))
    }

    /// Build state around a custom endpoint source.
    pub fn with_fetcher(
        config: config::Config,
        client: reqwest::Client,
        fetcher: Arc<dyn EndpointFetcher>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(fetcher));
        let tts = Arc::new(Synthesizer::new(client, Arc::clone(&sessions), config.clone()));
        Self {
            config,
            sessions,
            tts,
        }
    }
}
