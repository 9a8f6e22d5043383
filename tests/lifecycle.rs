mod common;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use pwa_cache::cache::{
    CacheConfig, CacheStorage, CacheStoreError, CachedResponse, DiskCacheStorage, EntryMeta,
    MemoryCacheStorage, PartitionKind, PartitionPolicy, RequestKey,
};
use pwa_cache::fetch::CacheRequest;
use pwa_cache::worker::{
    CacheManager, DeferredExecutor, ManualTrigger, MessageReply, ResponseSource, TokioExecutor,
    WorkerMessage, WorkerState, run_sweeper,
};
use tempfile::TempDir;
use url::Url;

use common::{Harness, ORIGIN, ScriptedFetcher, config, html, url};

async fn seed_old_release(storage: &MemoryCacheStorage, version: &str) {
    for kind in ["static", "dynamic", "api"] {
        let partition = format!("salon-booking-{kind}-v{version}");
        storage
            .put(&partition, RequestKey::get(url("/")), html("old shell"))
            .await
            .expect("seed old release");
    }
}

#[tokio::test]
async fn activation_replaces_previous_release_partitions() {
    let storage = Arc::new(MemoryCacheStorage::new());
    seed_old_release(&storage, "1.3.0").await;
    let harness = Harness::with_storage(config("1.4.0"), storage);

    let report = harness.manager.activate().await;

    let names = harness.storage.partition_names().await.expect("names");
    assert!(names.iter().all(|name| !name.ends_with("-v1.3.0")));
    assert_eq!(
        names,
        vec![
            "salon-booking-api-v1.4.0".to_string(),
            "salon-booking-dynamic-v1.4.0".to_string(),
            "salon-booking-static-v1.4.0".to_string(),
        ]
    );
    assert_eq!(report.deleted.len(), 3);
    assert_eq!(report.live.len(), 3);
    assert_eq!(harness.manager.state(), WorkerState::Activated);
}

#[tokio::test]
async fn activation_keeps_unrelated_live_entries() {
    let harness = Harness::new(config("1.4.0"));
    harness
        .seed(PartitionKind::Static, &url("/offline.html"), "offline")
        .await;

    let report = harness.manager.activate().await;

    assert!(report.deleted.is_empty());
    assert_eq!(
        harness
            .cached_body(PartitionKind::Static, &url("/offline.html"))
            .await
            .as_deref(),
        Some("offline")
    );
}

#[tokio::test]
async fn install_precaches_reachable_manifest_entries() {
    let harness = Harness::new(config("1.0.0"));
    harness.fetcher.respond(&url("/"), 200, "shell");
    harness.fetcher.respond(&url("/offline.html"), 200, "offline");
    harness.fetcher.respond(&url("/manifest.json"), 200, "{}");
    harness.fetcher.respond(&url("/favicon.ico"), 404, "missing");

    let report = harness.manager.install().await;

    assert_eq!(report.opened.len(), 3);
    assert_eq!(report.precached, vec!["/", "/offline.html", "/manifest.json"]);
    let failed: Vec<&str> = report.failed.iter().map(|f| f.path.as_str()).collect();
    assert_eq!(
        failed,
        vec![
            "/favicon.ico",
            "/icons/icon-192x192.png",
            "/icons/icon-512x512.png"
        ]
    );
    assert_eq!(harness.manager.state(), WorkerState::Installed);

    let stored = harness
        .storage
        .entries(&harness.partition(PartitionKind::Static))
        .await
        .expect("entries");
    assert_eq!(stored.len(), 3);
    assert_eq!(
        harness.cached_body(PartitionKind::Static, &url("/favicon.ico")).await,
        None
    );
}

fn tight_config() -> CacheConfig {
    CacheConfig {
        static_policy: PartitionPolicy::new(60 * 60 * 1000, 3),
        ..config("1.0.0")
    }
}

#[tokio::test]
async fn sweep_trims_static_partition_to_limit() {
    let harness = Harness::activated(tight_config()).await;
    for path in ["/icons/d.png", "/icons/c.png", "/icons/b.png"] {
        harness.seed(PartitionKind::Static, &url(path), path).await;
    }

    let at_limit = harness.manager.sweep().await;
    assert_eq!(at_limit.removed(), 0);

    harness
        .seed(PartitionKind::Static, &url("/icons/a.png"), "a")
        .await;
    let over = harness.manager.sweep().await;
    assert_eq!(over.removed(), 1);
    assert!(over.failures.is_empty());
    assert_eq!(
        harness.cached_body(PartitionKind::Static, &url("/icons/a.png")).await,
        None
    );

    let again = harness.manager.sweep().await;
    assert_eq!(again.removed(), 0);
    assert_eq!(
        harness
            .storage
            .entries(&harness.partition(PartitionKind::Static))
            .await
            .expect("entries")
            .len(),
        3
    );
}

#[tokio::test]
async fn sweep_expires_old_entries() {
    let harness = Harness::activated(tight_config()).await;
    let mut stale = html("stale");
    stale.stored_at -= time::Duration::hours(2);
    harness
        .storage
        .put(
            &harness.partition(PartitionKind::Static),
            RequestKey::get(url("/icons/old.png")),
            stale,
        )
        .await
        .expect("seed stale");
    harness
        .seed(PartitionKind::Static, &url("/icons/new.png"), "new")
        .await;

    let report = harness.manager.sweep().await;

    let static_sweep = report
        .partitions
        .iter()
        .find(|sweep| sweep.partition == harness.partition(PartitionKind::Static))
        .expect("static sweep");
    assert_eq!(static_sweep.expired, 1);
    assert_eq!(static_sweep.after, 1);
}

#[tokio::test]
async fn messages_drive_the_worker() {
    let harness = Harness::new(config("1.4.0"));

    let reply = harness
        .manager
        .handle_message(WorkerMessage::GetVersion)
        .await;
    assert_eq!(
        reply,
        MessageReply::Version {
            version: "1.4.0".to_string()
        }
    );

    let reply = harness
        .manager
        .handle_message(WorkerMessage::SkipWaiting)
        .await;
    assert_eq!(
        reply,
        MessageReply::State {
            state: WorkerState::Parsed
        }
    );

    harness.manager.install().await;
    let reply = harness
        .manager
        .handle_message(WorkerMessage::SkipWaiting)
        .await;
    assert_eq!(
        reply,
        MessageReply::State {
            state: WorkerState::Activated
        }
    );

    harness
        .seed(PartitionKind::Dynamic, &url("/bookings"), "list")
        .await;
    let reply = harness
        .manager
        .handle_message(WorkerMessage::ClearCache)
        .await;
    assert!(matches!(reply, MessageReply::Cleared { ref partitions } if partitions.len() == 3));
    assert_eq!(
        harness.cached_body(PartitionKind::Dynamic, &url("/bookings")).await,
        None
    );
    assert_eq!(
        harness.storage.partition_names().await.expect("names").len(),
        3
    );

    let reply = harness
        .manager
        .handle_message(WorkerMessage::BackgroundSync {
            tag: "cache-cleanup".to_string(),
        })
        .await;
    assert!(matches!(reply, MessageReply::Synced { ref tag, .. } if tag == "cache-cleanup"));
}

#[tokio::test]
async fn disk_storage_survives_restart() {
    let dir = TempDir::new().expect("tempdir");
    let fetcher = ScriptedFetcher::new();
    for path in ["/", "/offline.html"] {
        fetcher.respond(&url(path), 200, path);
    }

    let build = |version: &str| {
        CacheManager::new(
            config(version),
            Url::parse(ORIGIN).expect("origin"),
            Arc::new(DiskCacheStorage::new(dir.path())),
            fetcher.clone(),
            Arc::new(TokioExecutor),
        )
    };

    let first = build("1.0.0");
    first.install().await;
    first.activate().await;

    // Fresh process, same directory, network gone.
    fetcher.set_offline(true);
    let second = build("1.0.0");
    second.activate().await;
    let outcome = second
        .handle(&CacheRequest::document(url("/missing")))
        .await
        .expect("offline fallback");
    assert_eq!(outcome.source, ResponseSource::Offline);
    assert_eq!(outcome.response.body.as_ref(), b"/offline.html");

    // Next release drops everything the first one stored.
    let third = build("1.1.0");
    let report = third.activate().await;
    assert_eq!(report.deleted.len(), 3);
    let status = third.status_report().await.expect("status");
    assert!(status.partitions.iter().all(|stat| stat.live && stat.entries == 0));
}

#[tokio::test]
async fn status_reports_partition_counts() {
    let harness = Harness::activated(config("2.0.0")).await;
    harness
        .storage
        .put(
            &harness.partition(PartitionKind::Api),
            RequestKey::get(common::api_url("/slots")),
            CachedResponse::new(200, vec![], "[]"),
        )
        .await
        .expect("seed");

    let status = harness.manager.status_report().await.expect("status");
    assert_eq!(status.version, "2.0.0");
    assert_eq!(status.state, Some(WorkerState::Activated));
    let api = status
        .partitions
        .iter()
        .find(|stat| stat.name == "salon-booking-api-v2.0.0")
        .expect("api partition");
    assert_eq!(api.entries, 1);
    assert!(api.live);
}

#[tokio::test]
async fn storage_only_status_omits_state() {
    let harness = Harness::new(config("2.0.0"));
    harness.manager.install().await;

    let status = harness
        .manager
        .status_report()
        .await
        .expect("status")
        .without_state();
    let json = serde_json::to_value(&status).expect("serialize");

    assert!(json.get("state").is_none());
    assert_eq!(json["version"], "2.0.0");
    assert_eq!(json["partitions"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn sweeper_loop_runs_on_request_and_stops_with_its_handle() {
    let mut config = config("1.0.0");
    config.dynamic_policy.max_entries = 1;
    let harness = Harness::activated(config).await;
    harness.seed(PartitionKind::Dynamic, &url("/b"), "b").await;
    harness.seed(PartitionKind::Dynamic, &url("/a"), "a").await;

    let (trigger, handle) = ManualTrigger::new();
    let sweeper = tokio::spawn(run_sweeper(harness.manager.clone(), trigger));
    assert!(handle.request());
    drop(handle);
    sweeper.await.expect("sweeper task");

    assert_eq!(
        harness.cached_body(PartitionKind::Dynamic, &url("/a")).await,
        None
    );
    assert_eq!(
        harness
            .cached_body(PartitionKind::Dynamic, &url("/b"))
            .await
            .as_deref(),
        Some("b")
    );
}

/// Memory storage whose listing and deletes fail for one partition on demand.
struct FailingPartition {
    inner: MemoryCacheStorage,
    partition: String,
    failing: AtomicBool,
}

impl FailingPartition {
    fn check(&self, partition: &str) -> Result<(), CacheStoreError> {
        if self.failing.load(Ordering::SeqCst) && partition == self.partition {
            return Err(CacheStoreError::Io {
                path: PathBuf::from(partition),
                source: io::Error::other("disk unavailable"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for FailingPartition {
    async fn open(&self, partition: &str) -> Result<(), CacheStoreError> {
        self.inner.open(partition).await
    }

    async fn get(
        &self,
        partition: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, CacheStoreError> {
        self.inner.get(partition, key).await
    }

    async fn put(
        &self,
        partition: &str,
        key: RequestKey,
        response: CachedResponse,
    ) -> Result<(), CacheStoreError> {
        self.inner.put(partition, key, response).await
    }

    async fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool, CacheStoreError> {
        self.check(partition)?;
        self.inner.delete(partition, key).await
    }

    async fn entries(&self, partition: &str) -> Result<Vec<EntryMeta>, CacheStoreError> {
        self.check(partition)?;
        self.inner.entries(partition).await
    }

    async fn partition_names(&self) -> Result<Vec<String>, CacheStoreError> {
        self.inner.partition_names().await
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool, CacheStoreError> {
        self.inner.delete_partition(partition).await
    }
}

#[tokio::test]
async fn failed_partition_is_reported_and_retried_next_sweep() {
    let mut config = config("1.0.0");
    config.dynamic_policy.max_entries = 1;
    config.api_policy.max_entries = 1;
    let names = config.partition_names();
    let dynamic = names.name(PartitionKind::Dynamic).to_string();
    let api = names.name(PartitionKind::Api).to_string();

    let storage = Arc::new(FailingPartition {
        inner: MemoryCacheStorage::new(),
        partition: dynamic.clone(),
        failing: AtomicBool::new(true),
    });
    for partition in [&dynamic, &api] {
        for path in ["/b", "/a"] {
            storage
                .put(partition, RequestKey::get(url(path)), html(path))
                .await
                .expect("seed");
        }
    }
    let manager = CacheManager::new(
        config,
        Url::parse(ORIGIN).expect("origin"),
        storage.clone(),
        ScriptedFetcher::new(),
        Arc::new(DeferredExecutor::new()),
    );

    let report = manager.sweep().await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].partition, dynamic);
    let api_sweep = report
        .partitions
        .iter()
        .find(|sweep| sweep.partition == api)
        .expect("api swept");
    assert_eq!(api_sweep.trimmed, 1);
    assert_eq!(storage.inner.entries(&dynamic).await.expect("entries").len(), 2);

    storage.failing.store(false, Ordering::SeqCst);
    let report = manager.sweep().await;
    assert!(report.failures.is_empty());
    assert_eq!(report.removed(), 1);
    let remaining = storage.inner.entries(&dynamic).await.expect("entries");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].key, RequestKey::get(url("/b")));
}
