use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use edge_tts_gateway::{config, routes, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load config
    let config = config::Config::from_env().map_err(anyhow::Error::msg)?;
    let port = config.port;

    if config.is_api_key_required() {
        tracing::info!("API key check enabled");
    } else {
        tracing::warn!("API_KEY not set, /v1/audio/speech is open to anyone");
    }

    // Session is fetched lazily on the first synthesis request
    let state = AppState::new(config)?;
    let app = routes::create_router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
