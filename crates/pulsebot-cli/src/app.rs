//! Wires storage, scheduler and interaction engine together from config.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use pulsebot_config::PulseConfig;
use pulsebot_cron::Scheduler;
use pulsebot_interaction::InteractionControl;
use pulsebot_storage::{KvStore, MemoryKvStore, SqliteKvStore};

pub struct App {
    pub config: PulseConfig,
    pub scheduler: Arc<Scheduler>,
    pub engine: Arc<InteractionControl>,
}

impl App {
    /// Open storage, hydrate the engine and register the built-in jobs.
    pub async fn build(config: PulseConfig) -> anyhow::Result<Self> {
        let store = open_store(&config);

        let scheduler = Arc::new(
            Scheduler::new(store.clone(), config.scheduler.clone())
                .context("Invalid scheduler configuration")?,
        );
        let engine =
            Arc::new(InteractionControl::initialize(store, config.interaction.clone()).await);

        scheduler
            .register_job(engine.cleanup_job())
            .await
            .context("Failed to register interaction cleanup job")?;

        Ok(Self {
            config,
            scheduler,
            engine,
        })
    }
}

/// SQLite at the configured path, or an in-memory store if that fails.
fn open_store(config: &PulseConfig) -> Arc<dyn KvStore> {
    let db_path = match config.database_path() {
        Ok(path) => path,
        Err(e) => {
            warn!("Failed to resolve database path, running without persistence: {e}");
            return Arc::new(MemoryKvStore::new());
        }
    };

    match SqliteKvStore::open(&db_path) {
        Ok(store) => {
            info!("Storage initialized: {}", db_path.display());
            Arc::new(store)
        }
        Err(e) => {
            warn!("Failed to open storage, running without persistence: {e}");
            Arc::new(MemoryKvStore::new())
        }
    }
}
