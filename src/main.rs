//! Ridelink service entry point
//!
//! Wiring order: config -> logging -> store -> engine/registry/dispatcher ->
//! sweeper task -> gateway.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;

use ridelink::config::AppConfig;
use ridelink::db::Database;
use ridelink::dispatch::Dispatcher;
use ridelink::gateway::{self, state::AppState};
use ridelink::logging::init_logging;
use ridelink::sweeper::OrphanSweeper;
use ridelink::trip::{MemTripStore, PgTripStore, TripEngine, TripStore};
use ridelink::websocket::SessionRegistry;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn use_mem_store() -> bool {
    std::env::args().any(|a| a == "--mem-store")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(&get_env());
    let _log_guard = init_logging(&config);

    let (store, db): (Arc<dyn TripStore>, Option<Arc<Database>>) = if use_mem_store() {
        tracing::warn!("Running with in-memory store - all state is lost on restart");
        (Arc::new(MemTripStore::new()), None)
    } else {
        let url = config
            .postgres_url
            .as_deref()
            .context("postgres_url missing from config (or pass --mem-store)")?;
        let db = Arc::new(Database::connect(url).await?);
        (Arc::new(PgTripStore::new(db.pool().clone())), Some(db))
    };

    let engine = Arc::new(TripEngine::new(store));
    let registry = Arc::new(SessionRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(
        engine.clone(),
        registry.clone(),
        Duration::from_secs(config.location.persist_window_secs),
    ));

    let sweeper = OrphanSweeper::new(
        engine,
        registry,
        Duration::from_secs(config.sweeper.interval_secs),
        Duration::from_secs(config.sweeper.stale_after_secs),
    );
    tokio::spawn(sweeper.run());

    let app_state = Arc::new(AppState::new(dispatcher, db));
    let app = gateway::router(app_state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "Ridelink gateway listening");

    axum::serve(listener, app).await?;
    Ok(())
}
