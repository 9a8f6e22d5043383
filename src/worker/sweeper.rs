//! Partition eviction.
//!
//! A sweep trims each live partition to its `max_entries`, deleting the keys
//! that sort first by URL. With age expiry on, entries older than `max_age`
//! go first. Sweeps are driven by a [`SweepTrigger`] rather than a bare timer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::cache::{CacheStorage, CacheStoreError, PartitionPolicy};

use super::manager::CacheManager;

const METRIC_CACHE_EVICT: &str = "pwa_cache_evict_total";

/// What one partition looked like around a sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionSweep {
    pub partition: String,
    pub before: usize,
    pub expired: usize,
    pub trimmed: usize,
    pub after: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub partition: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub partitions: Vec<PartitionSweep>,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    /// Entries removed across all partitions.
    pub fn removed(&self) -> usize {
        self.partitions
            .iter()
            .map(|sweep| sweep.expired + sweep.trimmed)
            .sum()
    }
}

/// Sweep a single partition.
///
/// Returns early on the first storage error; entries deleted before it stay
/// deleted and the rest is retried on the next sweep.
pub async fn sweep_partition(
    storage: &dyn CacheStorage,
    partition: &str,
    policy: PartitionPolicy,
    expire_by_age: bool,
    now: OffsetDateTime,
) -> Result<PartitionSweep, CacheStoreError> {
    let entries = storage.entries(partition).await?;
    let before = entries.len();

    let max_age = policy.max_age();
    let (stale, mut fresh): (Vec<_>, Vec<_>) = entries.into_iter().partition(|meta| {
        expire_by_age && Duration::try_from(now - meta.stored_at).is_ok_and(|age| age > max_age)
    });

    let mut expired = 0;
    for meta in &stale {
        if storage.delete(partition, &meta.key).await? {
            expired += 1;
        }
    }

    let mut trimmed = 0;
    if fresh.len() > policy.max_entries {
        fresh.sort_by(|a, b| a.key.sweep_order(&b.key));
        let excess = fresh.len() - policy.max_entries;
        for meta in fresh.iter().take(excess) {
            if storage.delete(partition, &meta.key).await? {
                trimmed += 1;
            }
        }
    }

    if expired > 0 {
        counter!(METRIC_CACHE_EVICT, "partition" => partition.to_string(), "reason" => "age")
            .increment(expired as u64);
    }
    if trimmed > 0 {
        counter!(METRIC_CACHE_EVICT, "partition" => partition.to_string(), "reason" => "count")
            .increment(trimmed as u64);
    }

    Ok(PartitionSweep {
        partition: partition.to_string(),
        before,
        expired,
        trimmed,
        after: before - expired - trimmed,
    })
}

/// Decides when the next sweep happens.
#[async_trait]
pub trait SweepTrigger: Send {
    /// Resolves when a sweep is due; `false` stops the sweeper.
    async fn next(&mut self) -> bool;
}

/// Fires on a fixed period. The first tick comes one period after creation.
pub struct IntervalTrigger {
    interval: Interval,
}

impl IntervalTrigger {
    pub fn new(period: Duration) -> Self {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl SweepTrigger for IntervalTrigger {
    async fn next(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Fires whenever its [`SweepHandle`] asks; stops once every handle is dropped.
pub struct ManualTrigger {
    rx: mpsc::UnboundedReceiver<()>,
}

#[derive(Clone)]
pub struct SweepHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl SweepHandle {
    /// Returns `false` once the sweeper has stopped.
    pub fn request(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

impl ManualTrigger {
    pub fn new() -> (Self, SweepHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, SweepHandle { tx })
    }
}

#[async_trait]
impl SweepTrigger for ManualTrigger {
    async fn next(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

/// Sweep every time `trigger` fires, until it stops.
pub async fn run_sweeper<T: SweepTrigger>(manager: Arc<CacheManager>, mut trigger: T) {
    info!("cache sweeper started");
    while trigger.next().await {
        let report = manager.sweep().await;
        for failure in &report.failures {
            warn!(partition = %failure.partition, error = %failure.error, "partition sweep failed; will retry next run");
        }
    }
    info!("cache sweeper stopped");
}
