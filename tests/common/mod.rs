#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use pwa_cache::cache::{
    CacheConfig, CacheStorage, CachedResponse, MemoryCacheStorage, PartitionKind, RequestKey,
};
use pwa_cache::fetch::{CacheRequest, FetchError, Fetcher};
use pwa_cache::worker::{CacheManager, DeferredExecutor};
use url::Url;

pub const ORIGIN: &str = "https://salon.test";
pub const API_HOST: &str = "api.salon.test";

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN)
        .and_then(|origin| origin.join(path))
        .expect("valid test url")
}

pub fn api_url(path: &str) -> Url {
    Url::parse(&format!("https://{API_HOST}{path}")).expect("valid api url")
}

pub fn config(version: &str) -> CacheConfig {
    CacheConfig {
        version: version.to_string(),
        api_host: API_HOST.to_string(),
        ..CacheConfig::default()
    }
}

pub fn html(body: &str) -> CachedResponse {
    CachedResponse::new(
        200,
        vec![("content-type".to_string(), "text/html".to_string())],
        body.to_string(),
    )
}

/// Fetcher answering from a fixed script; anything unscripted is unreachable.
#[derive(Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, (u16, Bytes)>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, url: &Url, status: u16, body: &str) {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(url.to_string(), (status, Bytes::from(body.to_string())));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// `METHOD url` of every fetch, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse, FetchError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(format!("{} {}", request.method, request.url));

        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::unreachable(&request.url, "offline"));
        }
        let scripted = self
            .routes
            .lock()
            .expect("routes lock")
            .get(request.url.as_str())
            .cloned();
        match scripted {
            Some((status, body)) => Ok(CachedResponse::new(status, vec![], body)),
            None => Err(FetchError::unreachable(&request.url, "connection refused")),
        }
    }
}

pub struct Harness {
    pub manager: Arc<CacheManager>,
    pub storage: Arc<MemoryCacheStorage>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub executor: Arc<DeferredExecutor>,
}

impl Harness {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_storage(config, Arc::new(MemoryCacheStorage::new()))
    }

    pub fn with_storage(config: CacheConfig, storage: Arc<MemoryCacheStorage>) -> Self {
        let fetcher = ScriptedFetcher::new();
        let executor = Arc::new(DeferredExecutor::new());
        let manager = CacheManager::new(
            config,
            Url::parse(ORIGIN).expect("origin"),
            storage.clone(),
            fetcher.clone(),
            executor.clone(),
        );
        Self {
            manager: Arc::new(manager),
            storage,
            fetcher,
            executor,
        }
    }

    /// Activated manager over empty partitions.
    pub async fn activated(config: CacheConfig) -> Self {
        let harness = Self::new(config);
        harness.manager.activate().await;
        harness
    }

    pub fn partition(&self, kind: PartitionKind) -> String {
        self.manager.names().name(kind).to_string()
    }

    pub async fn seed(&self, kind: PartitionKind, url: &Url, body: &str) {
        self.storage
            .put(&self.partition(kind), RequestKey::get(url.clone()), html(body))
            .await
            .expect("seed entry");
    }

    pub async fn cached_body(&self, kind: PartitionKind, url: &Url) -> Option<String> {
        self.storage
            .get(&self.partition(kind), &RequestKey::get(url.clone()))
            .await
            .expect("read entry")
            .map(|response| String::from_utf8_lossy(&response.body).into_owned())
    }
}

pub fn body_text(response: &CachedResponse) -> String {
    String::from_utf8_lossy(&response.body).into_owned()
}
