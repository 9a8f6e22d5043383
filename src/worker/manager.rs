//! The cache manager.
//!
//! Built once at startup. Owns the partition names, policies, router and the
//! strategy context; request handling, sweeps, lifecycle hooks and control
//! messages all go through it.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use metrics::histogram;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cache::{
    CacheConfig, CacheStorage, CacheStoreError, PartitionKind, PartitionNames, mutex_lock,
};
use crate::fetch::{CacheRequest, Fetcher};

use super::lifecycle::WorkerState;
use super::router::CacheRouter;
use super::strategy::{ResponseSource, StrategyContext, StrategyError, StrategyOutcome};
use super::sweeper::{SweepFailure, SweepReport, sweep_partition};
use super::tasks::TaskExecutor;

const SOURCE: &str = "worker::manager";
const METRIC_SWEEP_MS: &str = "pwa_cache_sweep_ms";

/// Entry count of one stored partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStat {
    pub name: String,
    pub entries: usize,
    /// Whether the name belongs to the current version.
    pub live: bool,
}

/// What `status` reports: identity, lifecycle state and stored partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub app_name: String,
    pub version: String,
    /// Lifecycle state of the running manager. The state lives in memory, so
    /// reports read from storage alone leave it out.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<WorkerState>,
    pub partitions: Vec<PartitionStat>,
}

impl StatusReport {
    pub fn without_state(self) -> Self {
        Self {
            state: None,
            ..self
        }
    }
}

pub struct CacheManager {
    config: CacheConfig,
    router: CacheRouter,
    strategies: StrategyContext,
    state: Mutex<WorkerState>,
}

impl CacheManager {
    pub fn new(
        config: CacheConfig,
        app_origin: Url,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let router = CacheRouter::from_config(&config);
        let strategies = StrategyContext {
            storage,
            fetcher,
            executor,
            names: config.partition_names(),
            app_origin,
            offline_path: config.offline_path.clone(),
        };
        Self {
            config,
            router,
            strategies,
            state: Mutex::new(WorkerState::Parsed),
        }
    }

    /// Replace the routing table built from config.
    pub fn with_router(mut self, router: CacheRouter) -> Self {
        self.router = router;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn names(&self) -> &PartitionNames {
        &self.strategies.names
    }

    pub fn app_origin(&self) -> &Url {
        &self.strategies.app_origin
    }

    pub fn router(&self) -> &CacheRouter {
        &self.router
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.strategies.storage
    }

    pub(super) fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.strategies.fetcher
    }

    pub fn state(&self) -> WorkerState {
        *mutex_lock(&self.state, SOURCE, "state")
    }

    pub(super) fn set_state(&self, state: WorkerState) {
        *mutex_lock(&self.state, SOURCE, "set_state") = state;
    }

    /// Serve a request. Until activation, requests go straight to the network.
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    pub async fn handle(&self, request: &CacheRequest) -> Result<StrategyOutcome, StrategyError> {
        if self.state() != WorkerState::Activated {
            debug!("not controlling clients yet; passing through");
            let response = self.strategies.fetcher.fetch(request).await?;
            return Ok(StrategyOutcome {
                response,
                source: ResponseSource::Network,
            });
        }

        let rule = self.router.route(request);
        debug!(
            rule = rule.name,
            strategy = rule.strategy.as_str(),
            partition = rule.partition.as_str(),
            "routed request"
        );
        let outcome = self
            .strategies
            .run(rule.strategy, rule.partition, request)
            .await?;
        debug!(
            outcome = outcome.source.as_str(),
            status = outcome.response.status,
            "request served"
        );
        Ok(outcome)
    }

    /// Trim every live partition to its policy. Per-partition failures are
    /// reported, not raised.
    #[instrument(skip_all)]
    pub async fn sweep(&self) -> SweepReport {
        let started = Instant::now();
        let now = OffsetDateTime::now_utc();
        let mut report = SweepReport::default();

        for kind in PartitionKind::ALL {
            let name = self.names().name(kind);
            match sweep_partition(
                self.storage().as_ref(),
                name,
                self.config.policy(kind),
                self.config.expire_by_age,
                now,
            )
            .await
            {
                Ok(sweep) => report.partitions.push(sweep),
                Err(err) => {
                    warn!(partition = name, error = %err, "partition sweep failed");
                    report.failures.push(SweepFailure {
                        partition: name.to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }

        histogram!(METRIC_SWEEP_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        info!(
            removed = report.removed(),
            failed = report.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "cache sweep finished"
        );
        report
    }

    /// Background-sync routine; cache maintenance is its only job here.
    pub async fn background_sync(&self, tag: &str) -> SweepReport {
        info!(tag, "background sync requested");
        self.sweep().await
    }

    /// Every stored partition with its entry count, sorted by name.
    pub async fn partition_stats(&self) -> Result<Vec<PartitionStat>, CacheStoreError> {
        let mut stats = Vec::new();
        for name in self.storage().partition_names().await? {
            let entries = self.storage().entries(&name).await?.len();
            let live = self.names().contains(&name);
            stats.push(PartitionStat {
                name,
                entries,
                live,
            });
        }
        Ok(stats)
    }

    pub async fn status_report(&self) -> Result<StatusReport, CacheStoreError> {
        Ok(StatusReport {
            app_name: self.config.app_name.clone(),
            version: self.config.version.clone(),
            state: Some(self.state()),
            partitions: self.partition_stats().await?,
        })
    }
}
