//! Caching strategies.
//!
//! Each strategy reads and writes one partition and may hit the network.
//! Only GET requests answered with HTTP 200 are ever written, and a write
//! always follows the network response it stores.

use std::sync::Arc;

use futures::FutureExt;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheStorage, CachedResponse, PartitionKind, PartitionNames, RequestKey};
use crate::fetch::{CacheRequest, FetchError, Fetcher};

use super::router::StrategyKind;
use super::tasks::{TaskError, TaskExecutor};

const METRIC_CACHE_HIT: &str = "pwa_cache_hit_total";
const METRIC_CACHE_MISS: &str = "pwa_cache_miss_total";
const METRIC_NETWORK_ERROR: &str = "pwa_cache_network_error_total";

/// Served when a navigation fails and the offline document was never cached.
const BUILTIN_OFFLINE_PAGE: &str = "<!doctype html>\n<html lang=\"en\">\n<head><meta charset=\"utf-8\"><meta name=\"viewport\" content=\"width=device-width, initial-scale=1\"><title>Offline</title></head>\n<body><h1>You are offline</h1><p>Check your connection and try again.</p></body>\n</html>\n";

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("network request failed and nothing was cached: {0}")]
    Network(#[from] FetchError),
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Network,
    Cache,
    /// The offline document, cached or built in.
    Offline,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub response: CachedResponse,
    pub source: ResponseSource,
}

impl StrategyOutcome {
    fn network(response: CachedResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }

    fn cache(response: CachedResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Cache,
        }
    }

    fn offline(response: CachedResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Offline,
        }
    }
}

/// Everything a strategy touches.
#[derive(Clone)]
pub struct StrategyContext {
    pub storage: Arc<dyn CacheStorage>,
    pub fetcher: Arc<dyn Fetcher>,
    pub executor: Arc<dyn TaskExecutor>,
    pub names: PartitionNames,
    /// Origin the offline document and the static manifest are fetched from.
    pub app_origin: Url,
    pub offline_path: String,
}

impl StrategyContext {
    pub async fn run(
        &self,
        strategy: StrategyKind,
        partition: PartitionKind,
        request: &CacheRequest,
    ) -> Result<StrategyOutcome, StrategyError> {
        match strategy {
            StrategyKind::CacheFirst => self.cache_first(partition, request).await,
            StrategyKind::NetworkFirst => self.network_first(partition, request).await,
            StrategyKind::NetworkFirstOffline => {
                self.network_first_offline(partition, request).await
            }
            StrategyKind::StaleWhileRevalidate => {
                self.stale_while_revalidate(partition, request).await
            }
        }
    }

    /// Cached copy if present (refreshed in the background), else the network.
    pub async fn cache_first(
        &self,
        partition: PartitionKind,
        request: &CacheRequest,
    ) -> Result<StrategyOutcome, StrategyError> {
        let strategy = StrategyKind::CacheFirst;
        if let Some(cached) = self.lookup(partition, &request.key()).await {
            record_lookup(METRIC_CACHE_HIT, partition, strategy);
            self.spawn_refresh("cache_first.refresh", partition, request);
            return Ok(StrategyOutcome::cache(cached));
        }
        record_lookup(METRIC_CACHE_MISS, partition, strategy);

        let response = self.network(request, strategy).await?;
        self.store_if_cacheable(partition, request, &response).await;
        Ok(StrategyOutcome::network(response))
    }

    /// Network response if reachable, else any cached copy, else the error.
    pub async fn network_first(
        &self,
        partition: PartitionKind,
        request: &CacheRequest,
    ) -> Result<StrategyOutcome, StrategyError> {
        let strategy = StrategyKind::NetworkFirst;
        match self.network(request, strategy).await {
            Ok(response) => {
                self.store_if_cacheable(partition, request, &response).await;
                Ok(StrategyOutcome::network(response))
            }
            Err(err) => match self.lookup_any(&request.key()).await {
                Some(cached) => {
                    record_lookup(METRIC_CACHE_HIT, partition, strategy);
                    Ok(StrategyOutcome::cache(cached))
                }
                None => {
                    record_lookup(METRIC_CACHE_MISS, partition, strategy);
                    Err(err.into())
                }
            },
        }
    }

    /// Like [`Self::network_first`], but never fails: the last resort is the
    /// offline document.
    pub async fn network_first_offline(
        &self,
        partition: PartitionKind,
        request: &CacheRequest,
    ) -> Result<StrategyOutcome, StrategyError> {
        let strategy = StrategyKind::NetworkFirstOffline;
        let err = match self.network(request, strategy).await {
            Ok(response) => {
                self.store_if_cacheable(partition, request, &response).await;
                return Ok(StrategyOutcome::network(response));
            }
            Err(err) => err,
        };

        if let Some(cached) = self.lookup_any(&request.key()).await {
            record_lookup(METRIC_CACHE_HIT, partition, strategy);
            return Ok(StrategyOutcome::cache(cached));
        }
        record_lookup(METRIC_CACHE_MISS, partition, strategy);

        debug!(url = %request.url, error = %err, "serving offline document");
        Ok(StrategyOutcome::offline(self.offline_document().await))
    }

    /// Cached copy right away with a background revalidation, or the network
    /// when cold. Non-GET requests go straight to the network.
    pub async fn stale_while_revalidate(
        &self,
        partition: PartitionKind,
        request: &CacheRequest,
    ) -> Result<StrategyOutcome, StrategyError> {
        let strategy = StrategyKind::StaleWhileRevalidate;
        if !request.is_get() {
            let response = self.network(request, strategy).await?;
            return Ok(StrategyOutcome::network(response));
        }

        if let Some(cached) = self.lookup(partition, &request.key()).await {
            record_lookup(METRIC_CACHE_HIT, partition, strategy);
            self.spawn_refresh("stale_while_revalidate.revalidate", partition, request);
            return Ok(StrategyOutcome::cache(cached));
        }
        record_lookup(METRIC_CACHE_MISS, partition, strategy);

        let response = self.network(request, strategy).await?;
        self.store_if_cacheable(partition, request, &response).await;
        Ok(StrategyOutcome::network(response))
    }

    /// Plain network fetch, counted on failure.
    pub async fn network(
        &self,
        request: &CacheRequest,
        strategy: StrategyKind,
    ) -> Result<CachedResponse, FetchError> {
        self.fetcher.fetch(request).await.inspect_err(|err| {
            counter!(METRIC_NETWORK_ERROR, "strategy" => strategy.as_str()).increment(1);
            debug!(url = %request.url, strategy = strategy.as_str(), error = %err, "network fetch failed");
        })
    }

    async fn lookup(&self, partition: PartitionKind, key: &RequestKey) -> Option<CachedResponse> {
        let name = self.names.name(partition);
        match self.storage.get(name, key).await {
            Ok(found) => found,
            Err(err) => {
                warn!(partition = name, key = %key, error = %err, "cache read failed; treating as miss");
                None
            }
        }
    }

    async fn lookup_any(&self, key: &RequestKey) -> Option<CachedResponse> {
        match self.storage.match_any(&self.names.all(), key).await {
            Ok(found) => found,
            Err(err) => {
                warn!(key = %key, error = %err, "cache match failed; treating as miss");
                None
            }
        }
    }

    async fn store_if_cacheable(
        &self,
        partition: PartitionKind,
        request: &CacheRequest,
        response: &CachedResponse,
    ) {
        if !request.is_get() || !response.is_ok() {
            return;
        }
        let name = self.names.name(partition);
        if let Err(err) = self
            .storage
            .put(name, request.key(), response.clone())
            .await
        {
            warn!(partition = name, url = %request.url, error = %err, "cache write failed");
        }
    }

    fn spawn_refresh(&self, task: &'static str, partition: PartitionKind, request: &CacheRequest) {
        let storage = Arc::clone(&self.storage);
        let fetcher = Arc::clone(&self.fetcher);
        let name = self.names.name(partition).to_string();
        let request = request.clone();

        self.executor.submit(
            task,
            async move {
                let response = fetcher.fetch(&request).await?;
                if request.is_get() && response.is_ok() {
                    storage.put(&name, request.key(), response).await?;
                }
                Ok::<(), TaskError>(())
            }
            .boxed(),
        );
    }

    async fn offline_document(&self) -> CachedResponse {
        if let Ok(url) = self.app_origin.join(&self.offline_path)
            && let Some(cached) = self.lookup_any(&RequestKey::get(url)).await
        {
            return cached;
        }
        warn!(offline_path = %self.offline_path, "offline document not cached; using built-in page");
        CachedResponse::new(
            503,
            vec![(
                "content-type".to_string(),
                "text/html; charset=utf-8".to_string(),
            )],
            BUILTIN_OFFLINE_PAGE,
        )
    }
}

fn record_lookup(metric: &'static str, partition: PartitionKind, strategy: StrategyKind) {
    counter!(metric, "partition" => partition.as_str(), "strategy" => strategy.as_str())
        .increment(1);
}
