//! Generation lifecycle: install → waiting → activating → active
//!
//! [`LifecycleState::transition`] is the whole state machine and has no
//! side effects. [`LifecycleController`] drives it: it opens and precaches
//! generations, purges stale ones on activation, and announces updates to
//! control-channel subscribers.

use crate::agent::fetcher::Network;
use crate::agent::manifest::PrecacheManifest;
use crate::agent::{CacheError, CacheGeneration, CacheStore, generation_name};
use fincache_proto::ControlReply;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Installing,
    Waiting,
    Activating,
    Active,
    /// A newer generation took over
    Superseded,
    /// Install failed; this generation never activates
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    InstallSucceeded,
    InstallFailed,
    /// Automatic activation or an explicit skip-waiting
    Activate,
    CleanupFinished,
    Superseded,
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Illegal lifecycle transition: {event:?} while {state}")]
    IllegalTransition {
        state: LifecycleState,
        event: LifecycleEvent,
    },

    #[error("Install of {generation} failed; could not precache: {}", failed.join(", "))]
    InstallFailed {
        generation: String,
        failed: Vec<String>,
    },

    #[error("No installed generation to activate")]
    NothingToActivate,

    #[error("Cache store error: {0}")]
    Store(#[from] CacheError),
}

impl LifecycleState {
    /// Apply an event, returning the next state
    pub fn transition(self, event: LifecycleEvent) -> Result<LifecycleState, LifecycleError> {
        use LifecycleEvent as E;
        use LifecycleState as S;

        match (self, event) {
            (S::Installing, E::InstallSucceeded) => Ok(S::Waiting),
            (S::Installing, E::InstallFailed) => Ok(S::Failed),
            (S::Waiting, E::Activate) => Ok(S::Activating),
            (S::Activating, E::CleanupFinished) => Ok(S::Active),
            // Re-activating the active generation only re-runs cleanup
            (S::Active, E::Activate) => Ok(S::Active),
            (S::Active, E::Superseded) | (S::Waiting, E::Superseded) => Ok(S::Superseded),
            (state, event) => Err(LifecycleError::IllegalTransition { state, event }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Installing => "installing",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
            LifecycleState::Superseded => "superseded",
            LifecycleState::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One installed instance of the agent and its generation
#[derive(Debug, Clone)]
pub struct Worker {
    pub id: Uuid,
    pub generation: CacheGeneration,
    pub state: LifecycleState,
}

impl Worker {
    fn apply(&mut self, event: LifecycleEvent) -> Result<(), LifecycleError> {
        let next = self.state.transition(event)?;
        debug!(
            "Worker {} ({}): {} --{:?}--> {}",
            self.id, self.generation.name, self.state, event, next
        );
        self.state = next;
        Ok(())
    }
}

/// Owns the active generation and the install/activate sequence
pub struct LifecycleController {
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    manifest: PrecacheManifest,
    prefix: String,
    skip_waiting: bool,
    active: RwLock<Option<Worker>>,
    pending: Mutex<Option<Worker>>,
    // Held for the whole of an activation, including cleanup
    activation: tokio::sync::Mutex<()>,
    events: broadcast::Sender<ControlReply>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
        manifest: PrecacheManifest,
        prefix: impl Into<String>,
        skip_waiting: bool,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            network,
            manifest,
            prefix: prefix.into(),
            skip_waiting,
            active: RwLock::new(None),
            pending: Mutex::new(None),
            activation: tokio::sync::Mutex::new(()),
            events,
        }
    }

    /// The generation serving requests right now
    pub fn active_generation(&self) -> Option<CacheGeneration> {
        self.read_active().as_ref().map(|w| w.generation.clone())
    }

    /// The generation that finished installing and waits for activation
    pub fn waiting_generation(&self) -> Option<CacheGeneration> {
        self.lock_pending()
            .as_ref()
            .filter(|w| w.state == LifecycleState::Waiting)
            .map(|w| w.generation.clone())
    }

    /// State of the controlling worker, or of the newest one before any activation
    pub fn state(&self) -> Option<LifecycleState> {
        if let Some(active) = self.read_active().as_ref() {
            return Some(active.state);
        }
        self.lock_pending().as_ref().map(|w| w.state)
    }

    /// State of the newest not-yet-active worker
    pub fn pending_state(&self) -> Option<LifecycleState> {
        self.lock_pending().as_ref().map(|w| w.state)
    }

    /// A new generation is installed while an older one still controls clients
    pub fn update_pending(&self) -> bool {
        self.waiting_generation().is_some() && self.active_generation().is_some()
    }

    /// Receive `UpdateAvailable` and `Activated` announcements
    pub fn subscribe(&self) -> broadcast::Receiver<ControlReply> {
        self.events.subscribe()
    }

    pub fn manifest(&self) -> &PrecacheManifest {
        &self.manifest
    }

    /// Install the generation for `version` and precache the manifest
    ///
    /// Any precache failure aborts the install; the active generation keeps
    /// serving. Activation follows immediately when nothing is active yet,
    /// when the same generation is being refreshed, or when skip-waiting is
    /// configured. Otherwise the generation waits and an update is announced.
    pub async fn install(&self, version: &str) -> Result<CacheGeneration, LifecycleError> {
        let name = generation_name(&self.prefix, version);
        info!("📦 Installing generation {}", name);

        let generation = self.store.open(&name).await?;
        let mut worker = Worker {
            id: Uuid::new_v4(),
            generation: generation.clone(),
            state: LifecycleState::Installing,
        };
        self.replace_pending(worker.clone());

        if let Err(failed) = self.precache(&generation).await {
            worker.apply(LifecycleEvent::InstallFailed)?;
            self.set_pending_state(worker.id, worker.state);
            self.discard_failed(&name).await;
            error!("❌ Install of {} failed ({} assets)", name, failed.len());
            return Err(LifecycleError::InstallFailed {
                generation: name,
                failed,
            });
        }

        worker.apply(LifecycleEvent::InstallSucceeded)?;
        self.set_pending_state(worker.id, worker.state);
        info!("✅ Installed {} ({} assets precached)", name, self.manifest.len());

        let active = self.active_generation();
        let refreshing = active.as_ref().is_some_and(|g| g.name == name);
        if active.is_none() || refreshing || self.skip_waiting {
            return self.activate().await;
        }

        info!("⏳ {} is waiting; {} still controls clients", name, active.map(|g| g.name).unwrap_or_default());
        let _ = self.events.send(ControlReply::UpdateAvailable {
            generation_name: name,
        });
        Ok(generation)
    }

    /// Activate the waiting generation, or re-run cleanup for the active one
    ///
    /// Returns once every other generation has been deleted.
    pub async fn activate(&self) -> Result<CacheGeneration, LifecycleError> {
        let _guard = self.activation.lock().await;

        if let Some(waiting) = self.waiting_generation() {
            self.ensure_populated(&waiting).await?;
        }
        let mut worker = match self.take_waiting() {
            Some(worker) => worker,
            None => self
                .read_active()
                .clone()
                .ok_or(LifecycleError::NothingToActivate)?,
        };
        worker.apply(LifecycleEvent::Activate)?;

        let name = worker.generation.name.clone();
        match self.store.delete_generations_except(&name).await {
            Ok(deleted) if !deleted.is_empty() => {
                info!("🧹 Deleted stale generations: {}", deleted.join(", "))
            }
            Ok(_) => debug!("No stale generations to delete"),
            Err(e) => warn!("Failed to delete stale generations: {}", e),
        }

        if worker.state == LifecycleState::Activating {
            worker.apply(LifecycleEvent::CleanupFinished)?;
        }

        let previous = self.write_active(worker.clone());
        if let Some(mut previous) = previous.filter(|p| p.id != worker.id) {
            if let Err(e) = previous.apply(LifecycleEvent::Superseded) {
                warn!("{}", e);
            }
            info!("🚀 Activated {} (superseding {})", name, previous.generation.name);
        } else {
            info!("🚀 Activated {}", name);
        }

        let _ = self.events.send(ControlReply::Activated {
            generation_name: name,
        });
        Ok(worker.generation)
    }

    /// Fetch every manifest path, then store them all
    ///
    /// Nothing is written unless every path is usable and every fetch
    /// succeeded with a 2xx status.
    async fn precache(&self, generation: &CacheGeneration) -> Result<(), Vec<String>> {
        let mut failed = Vec::new();
        let mut requests = Vec::with_capacity(self.manifest.len());
        for (path, request) in self.manifest.requests() {
            match request {
                Ok(request) => requests.push(request),
                Err(e) => {
                    warn!("Precache path {:?} is unusable: {}", path, e);
                    failed.push(path.to_string());
                }
            }
        }
        if !failed.is_empty() {
            return Err(failed);
        }

        let fetches = requests.into_iter().map(|request| async move {
            let result = self.network.fetch(&request).await;
            (request, result)
        });
        let results = futures::future::join_all(fetches).await;

        let mut fetched = Vec::with_capacity(results.len());
        for (request, result) in results {
            match result {
                Ok(response) if response.is_success() => fetched.push((request, response)),
                Ok(response) => {
                    warn!("Precache of {} returned {}", request.target(), response.status);
                    failed.push(request.target().to_string());
                }
                Err(e) => {
                    warn!("Precache of {} failed: {}", request.target(), e);
                    failed.push(request.target().to_string());
                }
            }
        }
        if !failed.is_empty() {
            return Err(failed);
        }

        for (request, response) in fetched {
            if let Err(e) = self
                .store
                .put(generation, &request.cache_key(), response.to_snapshot())
                .await
            {
                warn!("Failed to store precached {}: {}", request.target(), e);
                failed.push(request.target().to_string());
            }
        }
        if failed.is_empty() { Ok(()) } else { Err(failed) }
    }

    /// Precache a waiting generation again if it was deleted while waiting
    ///
    /// On failure the generation keeps waiting and activation is refused.
    async fn ensure_populated(&self, generation: &CacheGeneration) -> Result<(), LifecycleError> {
        match self.store.generation_names().await {
            Ok(names) if names.contains(&generation.name) => return Ok(()),
            Ok(_) => {}
            Err(e) => {
                warn!("Could not list generations, assuming {} is intact: {}", generation.name, e);
                return Ok(());
            }
        }

        info!("♻️ {} was cleared while waiting; precaching again", generation.name);
        let reopened = self.store.open(&generation.name).await?;
        if let Err(failed) = self.precache(&reopened).await {
            self.discard_failed(&generation.name).await;
            error!("❌ Could not repopulate {}; it stays waiting", generation.name);
            return Err(LifecycleError::InstallFailed {
                generation: generation.name.clone(),
                failed,
            });
        }
        Ok(())
    }

    async fn discard_failed(&self, name: &str) {
        if self.active_generation().is_some_and(|g| g.name == name) {
            return;
        }
        if let Err(e) = self.store.delete_generation(name).await {
            warn!("Failed to delete failed generation {}: {}", name, e);
        }
    }

    fn replace_pending(&self, worker: Worker) {
        let mut pending = self.lock_pending();
        if let Some(mut old) = pending.take() {
            if old.state == LifecycleState::Waiting {
                // Left in the store; the next activation deletes it
                let _ = old.apply(LifecycleEvent::Superseded);
            }
        }
        *pending = Some(worker);
    }

    fn set_pending_state(&self, id: Uuid, state: LifecycleState) {
        if let Some(worker) = self.lock_pending().as_mut().filter(|w| w.id == id) {
            worker.state = state;
        }
    }

    fn take_waiting(&self) -> Option<Worker> {
        let mut pending = self.lock_pending();
        if pending.as_ref().is_some_and(|w| w.state == LifecycleState::Waiting) {
            pending.take()
        } else {
            None
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<Worker>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_active(&self) -> std::sync::RwLockReadGuard<'_, Option<Worker>> {
        self.active.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_active(&self, worker: Worker) -> Option<Worker> {
        let mut active = self.active.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        active.replace(worker)
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("store", &self.store.storage_type())
            .field("network", &"<dyn Network>")
            .field("manifest", &self.manifest)
            .field("prefix", &self.prefix)
            .field("skip_waiting", &self.skip_waiting)
            .field("active", &self.active_generation())
            .finish()
    }
}
