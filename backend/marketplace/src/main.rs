//! AgroConnect marketplace entry point.
//!
//! Opens the SQLite store, starts the subscription sweeper in the
//! background and serves the REST API until Ctrl-C.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use marketplace::api::{self, AppState};
use marketplace::config::Config;
use marketplace::expiry;
use marketplace::service::Marketplace;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    if config.payment_token.is_none() {
        warn!("PAYMENT_TOKEN is not set; credit endpoints are disabled");
    }

    // Set up the SQLite connection pool and run migrations.
    let market = Marketplace::connect(&config).await?;

    // ─── Background sweeper ───────────────────────────────
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(expiry::run(
        market.clone(),
        config.sweep_interval(),
        shutdown.clone(),
    ));

    // ─── REST API ─────────────────────────────────────────
    let state = Arc::new(AppState {
        market,
        payment_token: config.payment_token.clone(),
    });
    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    sweeper.await?;
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
    shutdown.cancel();
}
