//! Monopoly game host: runs oracle-driven games on a timer.

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod engine;
mod gateway;
mod oracle;
mod scheduler;
mod store;

use config::{OracleSettings, ServerConfig};
use engine::{Engine, EngineSettings};
use gateway::DecisionGateway;
use oracle::{BotOracle, DecisionOracle, HttpOracle};
use scheduler::Scheduler;
use store::{GameStore, MemoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Missing credentials stop us here, before any game exists
    let config = ServerConfig::from_env()?;

    let oracle: Arc<dyn DecisionOracle> = match &config.oracle {
        OracleSettings::Bot { difficulty } => Arc::new(BotOracle::new(*difficulty)),
        OracleSettings::Http(http) => Arc::new(HttpOracle::new(http.clone())?),
    };
    info!(
        oracle = oracle.name(),
        players = ?config.players,
        interval_secs = config.trigger_interval.as_secs(),
        "Starting Monopoly host..."
    );

    let store: Arc<dyn GameStore> = Arc::new(MemoryStore::new());
    let gateway = Arc::new(DecisionGateway::new(
        oracle,
        Arc::clone(&store),
        config.retry.clone(),
    ));
    let (scheduler, tasks) = Scheduler::new();
    let engine = Arc::new(Engine::new(
        store,
        gateway,
        scheduler.clone(),
        EngineSettings::from(&config),
    ));

    tokio::spawn(scheduler.recurring(config.trigger_interval));

    tokio::select! {
        _ = engine.run(tasks) => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
