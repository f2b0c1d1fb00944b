//! Per-class caching strategies for intercepted requests

use crate::agent::classify::{ResourceClass, RuleTable};
use crate::agent::fetcher::Network;
use crate::agent::lifecycle::LifecycleController;
use crate::agent::offline::{LIMITED_OFFLINE_MESSAGE, SENSITIVE_OFFLINE_MESSAGE, offline_json, respond_offline};
use crate::agent::{AgentRequest, AgentResponse, CacheGeneration, CacheKey, CacheStore, NetworkError};
use axum::http::{HeaderValue, Method, header};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a served response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    OfflineDocument,
    OfflineJson,
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::OfflineDocument => "offline-document",
            ResponseSource::OfflineJson => "offline-json",
        })
    }
}

/// Result of running a request through the engine
#[derive(Debug, Clone)]
pub struct Served {
    pub response: AgentResponse,
    pub source: ResponseSource,
    /// `None` for requests that bypassed classification (non-GET)
    pub class: Option<ResourceClass>,
}

impl Served {
    fn new(response: AgentResponse, source: ResponseSource, class: Option<ResourceClass>) -> Self {
        Self {
            response,
            source,
            class,
        }
    }
}

/// What a network-first strategy returns when both network and cache miss
#[derive(Debug, Clone, Copy)]
enum TotalMiss {
    OfflineJson,
    OfflineDocument,
    Propagate,
}

// Response headers that would let anything downstream keep a copy
const CACHING_HEADERS: &[&str] = &[
    "cache-control",
    "expires",
    "pragma",
    "etag",
    "last-modified",
    "age",
];

/// Applies the caching policy of each resource class
pub struct StrategyEngine {
    rules: Arc<RuleTable>,
    store: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    lifecycle: Arc<LifecycleController>,
}

impl StrategyEngine {
    pub fn new(
        rules: Arc<RuleTable>,
        store: Arc<dyn CacheStore>,
        network: Arc<dyn Network>,
        lifecycle: Arc<LifecycleController>,
    ) -> Self {
        Self {
            rules,
            store,
            network,
            lifecycle,
        }
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Serve one intercepted request
    ///
    /// `Err` means a transport failure the class policy does not recover
    /// from; the caller decides how to surface it.
    pub async fn handle(&self, request: &AgentRequest) -> Result<Served, NetworkError> {
        // Mutating requests are never cached or replayed
        if request.method != Method::GET {
            debug!("Bypassing engine for {} {}", request.method, request.target());
            let response = self.network.fetch(request).await?;
            return Ok(Served::new(response, ResponseSource::Network, None));
        }

        let class = self.rules.classify(request);
        // Read once: a request racing an activation finishes against this generation
        let generation = self.lifecycle.active_generation();

        let served = match class {
            ResourceClass::SensitiveApi => fetch_sensitive(self.network.as_ref(), request).await,
            ResourceClass::StaticAsset | ResourceClass::Image | ResourceClass::Font => {
                self.cache_first(request, class, generation.as_ref()).await?
            }
            ResourceClass::SafeApi => {
                self.network_first(request, class, generation.as_ref(), TotalMiss::OfflineJson)
                    .await?
            }
            ResourceClass::HtmlPage => {
                self.network_first(request, class, generation.as_ref(), TotalMiss::OfflineDocument)
                    .await?
            }
            ResourceClass::Default => {
                self.network_first(request, class, generation.as_ref(), TotalMiss::Propagate)
                    .await?
            }
        };

        debug!(
            "{} {} [{}] served from {} ({})",
            request.method,
            request.target(),
            class,
            served.source,
            served.response.status
        );
        Ok(served)
    }

    async fn cache_first(
        &self,
        request: &AgentRequest,
        class: ResourceClass,
        generation: Option<&CacheGeneration>,
    ) -> Result<Served, NetworkError> {
        let key = request.cache_key();
        if let Some(hit) = self.cached(generation, &key).await {
            return Ok(Served::new(hit, ResponseSource::Cache, Some(class)));
        }

        let response = self.network.fetch(request).await?;
        if response.is_success() {
            self.remember(generation, &key, &response).await;
        }
        Ok(Served::new(response, ResponseSource::Network, Some(class)))
    }

    async fn network_first(
        &self,
        request: &AgentRequest,
        class: ResourceClass,
        generation: Option<&CacheGeneration>,
        total_miss: TotalMiss,
    ) -> Result<Served, NetworkError> {
        let key = request.cache_key();
        let error = match self.network.fetch(request).await {
            Ok(response) => {
                // Default-class responses are served but never written
                if response.is_success() && !matches!(total_miss, TotalMiss::Propagate) {
                    self.remember(generation, &key, &response).await;
                }
                return Ok(Served::new(response, ResponseSource::Network, Some(class)));
            }
            Err(e) => e,
        };

        info!("📴 Network failed for {}: {}", key, error);
        if let Some(hit) = self.cached(generation, &key).await {
            return Ok(Served::new(hit, ResponseSource::Cache, Some(class)));
        }

        match total_miss {
            TotalMiss::OfflineJson => Ok(Served::new(
                offline_json(LIMITED_OFFLINE_MESSAGE),
                ResponseSource::OfflineJson,
                Some(class),
            )),
            TotalMiss::OfflineDocument => Ok(Served::new(
                respond_offline(request),
                ResponseSource::OfflineDocument,
                Some(class),
            )),
            TotalMiss::Propagate => Err(error),
        }
    }

    /// Lookup that degrades every store problem to a miss
    async fn cached(&self, generation: Option<&CacheGeneration>, key: &CacheKey) -> Option<AgentResponse> {
        let generation = generation?;
        match self.store.lookup(generation, key).await {
            Ok(Some(entry)) => match AgentResponse::from_snapshot(entry.response) {
                Ok(response) => {
                    debug!("Cache hit for {} in {}", key, generation.name);
                    Some(response)
                }
                Err(e) => {
                    warn!("Ignoring unusable cache entry for {}: {}", key, e);
                    None
                }
            },
            Ok(None) => {
                debug!("Cache miss for {} in {}", key, generation.name);
                None
            }
            Err(e) => {
                warn!("Cache lookup failed for {}, treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Write that degrades every store problem to a skipped write
    async fn remember(&self, generation: Option<&CacheGeneration>, key: &CacheKey, response: &AgentResponse) {
        let Some(generation) = generation else {
            return;
        };
        if let Err(e) = self.store.put(generation, key, response.to_snapshot()).await {
            warn!("Cache write failed for {}, skipping: {}", key, e);
        }
    }
}

/// Network-only fetch for sensitive data
///
/// Takes only the network so the store is out of reach here.
async fn fetch_sensitive(network: &dyn Network, request: &AgentRequest) -> Served {
    let class = Some(ResourceClass::SensitiveApi);
    match network.fetch(request).await {
        Ok(mut response) => {
            for name in CACHING_HEADERS {
                response.headers.remove(*name);
            }
            response
                .headers
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            Served::new(response, ResponseSource::Network, class)
        }
        Err(e) => {
            info!("📴 Network failed for sensitive {}: {}", request.target(), e);
            Served::new(
                offline_json(SENSITIVE_OFFLINE_MESSAGE),
                ResponseSource::OfflineJson,
                class,
            )
        }
    }
}

impl fmt::Debug for StrategyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyEngine")
            .field("rules", &self.rules.rules().len())
            .field("store", &self.store.storage_type())
            .field("network", &"<dyn Network>")
            .finish()
    }
}
