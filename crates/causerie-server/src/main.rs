//! # causerie-server
//!
//! HTTP front end for the Causerie conversation engine.
//!
//! This binary provides:
//! - **REST API** (axum) for conversations, membership, messages, receipts
//!   and mutes, plus a server-sent presence stream
//! - **SQLite persistence** through a write-behind journal; state is
//!   restored from the database on start
//! - **Push notices** for new messages, skipping muted recipients
//! - **Per-client rate limiting** to protect against abuse

mod api;
mod config;
mod error;
mod push;
mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use causerie_engine::{Engine, Journal};
use causerie_store::{spawn_journal_writer, Database};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::push::PushDispatcher;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,causerie_server=debug,causerie_engine=debug")
        }))
        .init();

    info!("Starting Causerie server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Restore state from the database
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let snapshot = db.load_snapshot()?;
    info!(
        path = ?db.path(),
        conversations = snapshot.conversations.len(),
        messages = snapshot.messages.len(),
        "Loaded snapshot"
    );

    let (journal, journal_rx) = Journal::channel();
    let engine = Arc::new(Engine::restore(config.engine_config(), journal, snapshot));
    let _writer = spawn_journal_writer(db, journal_rx);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let _push = PushDispatcher::new(engine.clone(), config.push_webhook_url.clone())
        .spawn(engine.subscribe_events());

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_stale(600.0).await;
        }
    });

    // Expired mutes (every minute)
    let mutes_engine = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            mutes_engine.purge_expired_mutes(chrono::Utc::now()).await;
        }
    });

    // Idle direct-creation locks (every 5 minutes)
    let locks_engine = engine.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            locks_engine.purge_idle_locks();
        }
    });

    let http_addr = config.http_addr;
    let app_state = AppState {
        engine,
        rate_limiter,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
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
