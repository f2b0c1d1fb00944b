pub mod agent;
pub mod config;
pub mod control_handler;
pub mod server;

// Re-export commonly used types
pub use agent::control::ControlChannel;
pub use agent::fetcher::{Network, UpstreamFetcher};
pub use agent::lifecycle::LifecycleController;
pub use agent::strategy::StrategyEngine;
pub use agent::{CacheStore, generation_name};
pub use config::{AgentConfig, ConfigError};

use agent::classify::RuleTable;
use std::sync::Arc;

pub type AppState = Arc<AgentState>;

/// Everything a request handler needs, shared behind one `Arc`
pub struct AgentState {
    pub config: AgentConfig,
    pub store: Arc<dyn CacheStore>,
    pub lifecycle: Arc<LifecycleController>,
    pub engine: StrategyEngine,
    pub control: ControlChannel,
}

impl AgentState {
    /// Wire the engine, lifecycle and control channel around one store and network
    pub fn new(config: AgentConfig, store: Arc<dyn CacheStore>, network: Arc<dyn Network>) -> Self {
        let lifecycle = Arc::new(LifecycleController::new(
            store.clone(),
            network.clone(),
            config.precache.clone(),
            config.cache_prefix.clone(),
            config.skip_waiting,
        ));
        let engine = StrategyEngine::new(
            Arc::new(RuleTable::standard()),
            store.clone(),
            network,
            lifecycle.clone(),
        );
        let control = ControlChannel::new(store.clone(), lifecycle.clone());

        Self {
            config,
            store,
            lifecycle,
            engine,
            control,
        }
    }

    /// Install the configured cache version
    pub async fn install_configured(&self) -> Result<(), agent::lifecycle::LifecycleError> {
        self.lifecycle.install(&self.config.cache_version).await?;
        Ok(())
    }
}

impl std::fmt::Debug for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentState")
            .field("config", &self.config)
            .field("store", &self.store.storage_type())
            .field("lifecycle", &self.lifecycle)
            .field("engine", &self.engine)
            .finish()
    }
}

#[cfg(test)]
mod server_test;
