//! Spot Exchange Engine - Main Entry Point

use spot_exchange_engine::{api, MatchingEngine, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting spot exchange engine v{}", env!("CARGO_PKG_VERSION"));

    let engine = Arc::new(MatchingEngine::in_memory().with_history_window(config.history_window()));
    tracing::info!(
        "Trade summaries count the last {} days as recent",
        config.history_window_days
    );

    let app = api::create_router(engine);

    tracing::info!("Listening on http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
