//! Ranking server
//!
//! - Opens (or creates) the SQLite database and applies the schema
//! - Wires selector, vote service and leaderboard onto the store
//! - Serves HTTP until Ctrl-C
//!
//! Usage:
//!   cargo run --release --bin pairrank-server
//!
//! Environment variables: see `RankingConfig::from_env`. `RUST_LOG`
//! controls log output (default: info).

use dotenv::dotenv;
use log::info;
use pairrank::api::{create_router, AppState};
use pairrank::config::RankingConfig;
use pairrank::store::SqliteStore;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Pairrank server");

    let config = RankingConfig::from_env()?;
    info!("   ├─ Database: {}", config.db_path.display());
    info!("   ├─ Bind: {}", config.bind_addr);
    info!(
        "   ├─ Dedup: {} attempts, repeat on exhaustion={}",
        config.dedup.max_attempts, config.dedup.accept_on_exhaustion
    );
    info!("   ├─ Placement: {:?}", config.placement);
    info!(
        "   ├─ Rate limit: {} requests / {}ms",
        config.rate_limit.max_requests,
        config.rate_limit.window.as_millis()
    );
    info!(
        "   └─ Sessions: signed={}, accept unsigned={}",
        config.session_secret.is_some(),
        config.accept_opaque_sessions
    );

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let state = Arc::new(AppState::from_store(store, &config));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("✅ Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("🛑 Shutdown signal received");
            }
        })
        .await?;

    info!("👋 Server stopped");
    Ok(())
}
