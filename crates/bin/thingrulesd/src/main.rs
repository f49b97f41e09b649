//! # thingrulesd: thingrules daemon
//!
//! Composition root that wires all adapters together and runs the engine.
//!
//! ## Responsibilities
//! - Parse configuration (env vars, config file)
//! - Install the `tracing` subscriber
//! - Initialize the `SQLite` connection pool and run migrations
//! - Open the `db` store device
//! - Watch the rule and device-configuration directories
//! - Start the rule engine with the compiled function catalog
//! - Handle graceful shutdown (SIGTERM/SIGINT)
//!
//! ## Dependency rule
//! This is the **only** crate that depends on all other crates.
//! It is the wiring layer: no domain logic belongs here.

mod config;
mod functions;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use thingrules_adapter_cron::CronSchedules;
use thingrules_adapter_fs::{DirectoryWatcher, TomlRuleModuleSource, YamlDeviceConfigSource};
use thingrules_adapter_storage_sqlite_sqlx::SqliteKeyValueStore;
use thingrules_adapter_webthing::WebthingFactory;
use thingrules_app::engine::{EngineParts, RuleEngine};
use thingrules_app::store_device::StoreDevice;

use crate::config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .init();

    // Database
    let db = thingrules_adapter_storage_sqlite_sqlx::Config {
        database_url: config.database_url().to_string(),
    }
    .build()
    .await?;
    let store = StoreDevice::open(SqliteKeyValueStore::new(db.pool().clone())).await?;

    // Watched directories
    let engine_config = &config.engine;
    tokio::fs::create_dir_all(&engine_config.rules_dir).await?;
    tokio::fs::create_dir_all(&engine_config.config_dir).await?;
    let (_rules_watcher, rule_events) = DirectoryWatcher::spawn(&engine_config.rules_dir)?;
    let (_config_watcher, config_events) = DirectoryWatcher::spawn(&engine_config.config_dir)?;

    // Engine
    let catalog = functions::catalog();
    tracing::info!(functions = catalog.len(), "function catalog ready");
    let engine = RuleEngine::new(EngineParts {
        store: Arc::new(store),
        device_source: Arc::new(YamlDeviceConfigSource::new(&engine_config.config_dir)),
        device_factory: Arc::new(WebthingFactory::new()),
        reload_policy: engine_config.reload_policy,
        cron: Arc::new(CronSchedules::new()),
        rule_source: TomlRuleModuleSource::new(&engine_config.rules_dir),
        catalog,
    });
    engine.start(rule_events, config_events).await;

    shutdown_signal().await;

    engine.stop().await;
    db.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(%err, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(%err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown requested");
}
