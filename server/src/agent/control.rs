//! Control channel: cache management commands from the page or the CLI

use crate::agent::lifecycle::LifecycleController;
use crate::agent::CacheStore;
use fincache_proto::{ControlMessage, ControlReply, StatusReport, now_millis};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Answers control messages against the store and the lifecycle
pub struct ControlChannel {
    store: Arc<dyn CacheStore>,
    lifecycle: Arc<LifecycleController>,
}

impl ControlChannel {
    pub fn new(store: Arc<dyn CacheStore>, lifecycle: Arc<LifecycleController>) -> Self {
        Self { store, lifecycle }
    }

    /// Parse and handle one text message; malformed input gets an `Error` reply
    pub async fn handle_text(&self, text: &str) -> ControlReply {
        match ControlMessage::from_json(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                warn!("Malformed control message: {}", e);
                ControlReply::Error {
                    message: format!("malformed control message: {}", e),
                }
            }
        }
    }

    pub async fn handle(&self, message: ControlMessage) -> ControlReply {
        match message {
            ControlMessage::ClearCache { prefix } => self.clear(prefix.as_deref()).await,
            ControlMessage::QueryStatus => ControlReply::Status(self.status().await),
            ControlMessage::SkipWaiting => match self.lifecycle.activate().await {
                Ok(_) => ControlReply::Status(self.status().await),
                Err(e) => ControlReply::Error {
                    message: e.to_string(),
                },
            },
            ControlMessage::InstallUpdate { version } => {
                match self.lifecycle.install(&version).await {
                    Ok(_) => ControlReply::Status(self.status().await),
                    Err(e) => ControlReply::Error {
                        message: e.to_string(),
                    },
                }
            }
        }
    }

    /// Snapshot of the active generation
    pub async fn status(&self) -> StatusReport {
        let generation = self.lifecycle.active_generation();
        let entry_count = match &generation {
            Some(generation) => self.store.entry_count(generation).await.unwrap_or_else(|e| {
                warn!("Could not count entries in {}: {}", generation.name, e);
                0
            }),
            None => 0,
        };

        StatusReport {
            generation_name: generation.map(|g| g.name),
            entry_count,
            timestamp: now_millis(),
            state: self
                .lifecycle
                .state()
                .map(|s| s.as_str())
                .unwrap_or("uninstalled")
                .to_string(),
            update_pending: self.lifecycle.update_pending(),
        }
    }

    /// Lifecycle announcements (`UpdateAvailable`, `Activated`)
    pub fn subscribe(&self) -> broadcast::Receiver<ControlReply> {
        self.lifecycle.subscribe()
    }

    async fn clear(&self, prefix: Option<&str>) -> ControlReply {
        let result = match prefix {
            None => self.store.delete_all().await,
            Some(prefix) => match self.lifecycle.active_generation() {
                Some(generation) => self.store.delete_prefix(&generation, prefix).await,
                None => Ok(0),
            },
        };

        match result {
            Ok(removed) => {
                info!(
                    "🧹 Cleared {} cached entries (prefix: {})",
                    removed,
                    prefix.unwrap_or("*")
                );
                ControlReply::CacheCleared {
                    removed,
                    timestamp: now_millis(),
                }
            }
            Err(e) => {
                warn!("Cache clear failed: {}", e);
                ControlReply::Error {
                    message: format!("cache clear failed: {}", e),
                }
            }
        }
    }
}

impl fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlChannel")
            .field("store", &self.store.storage_type())
            .field("active", &self.lifecycle.active_generation().map(|g| g.name))
            .finish()
    }
}
