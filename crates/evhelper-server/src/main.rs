//! # evhelper-server
//!
//! Mutual-aid EV charging server.
//!
//! This binary provides:
//! - the **request lifecycle engine** (create / accept / complete / cancel
//!   with race-protected status transitions and a token ledger)
//! - **city-scoped event fanout** over WebSocket rooms
//! - a **REST API** (axum) for registration, profiles, and the request
//!   operations
//! - **per-IP rate limiting** to protect against abuse

mod api;
mod auth;
mod config;
mod engine;
mod error;
mod rate_limit;
mod rooms;
mod ws;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use evhelper_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::engine::LifecycleEngine;
use crate::rate_limit::RateLimiter;
use crate::rooms::CityRouter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,evhelper_server=debug")),
        )
        .init();

    info!("Starting evhelper server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let database = Database::open_at(&config.db_path)?;
    info!(path = %config.db_path.display(), "Database ready");

    let router = CityRouter::new();
    let engine = Arc::new(LifecycleEngine::new(
        Arc::new(Mutex::new(database)),
        router,
    ));

    // Rate limiter: 10 req/s sustained, burst of 30
    let rate_limiter = RateLimiter::default();

    let state = AppState {
        engine,
        config: Arc::new(config.clone()),
        rate_limiter: rate_limiter.clone(),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    let http_addr = config.http_addr;
    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
