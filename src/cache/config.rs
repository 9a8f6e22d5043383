//! Cache configuration.
//!
//! Partition naming, per-partition eviction policies, the static manifest and
//! the routing inputs. Loaded from the `[cache]` table of `pwa-cache.toml`.

use std::time::Duration;

use super::keys::{PartitionKind, PartitionNames};

// Default values for cache configuration
const DEFAULT_APP_NAME: &str = "salon-booking";
const DEFAULT_VERSION: &str = "1.0.0";
const DEFAULT_OFFLINE_PATH: &str = "/offline.html";
const DEFAULT_API_HOST: &str = "localhost";
const DEFAULT_STATIC_MAX_AGE_MS: u64 = 30 * 24 * 60 * 60 * 1000;
const DEFAULT_STATIC_MAX_ENTRIES: usize = 100;
const DEFAULT_DYNAMIC_MAX_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1000;
const DEFAULT_DYNAMIC_MAX_ENTRIES: usize = 50;
const DEFAULT_API_MAX_AGE_MS: u64 = 5 * 60 * 1000;
const DEFAULT_API_MAX_ENTRIES: usize = 100;

/// Shell routes and icons fetched into the static partition at install.
const DEFAULT_STATIC_MANIFEST: &[&str] = &[
    "/",
    "/offline.html",
    "/manifest.json",
    "/favicon.ico",
    "/icons/icon-192x192.png",
    "/icons/icon-512x512.png",
];

const DEFAULT_STATIC_PREFIXES: &[&str] = &["/icons/"];

/// Eviction policy for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPolicy {
    /// Entries older than this are dropped by the sweeper when age expiry is on.
    pub max_age_ms: u64,
    /// Upper bound on entries left after a sweep.
    pub max_entries: usize,
}

impl PartitionPolicy {
    pub const fn new(max_age_ms: u64, max_entries: usize) -> Self {
        Self {
            max_age_ms,
            max_entries,
        }
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

/// Cache configuration from `pwa-cache.toml`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix of every partition name.
    pub app_name: String,
    /// Version tag embedded in partition names. Bumping it invalidates all prior entries.
    pub version: String,
    pub static_policy: PartitionPolicy,
    pub dynamic_policy: PartitionPolicy,
    pub api_policy: PartitionPolicy,
    /// Paths pre-fetched into the static partition at install.
    pub static_manifest: Vec<String>,
    /// Path prefixes routed to the static partition.
    pub static_prefixes: Vec<String>,
    /// Document served when a navigation fails with nothing cached.
    pub offline_path: String,
    /// Host whose requests use stale-while-revalidate.
    pub api_host: String,
    /// Drop entries older than their partition's `max_age` during sweeps.
    pub expire_by_age: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            version: DEFAULT_VERSION.to_string(),
            static_policy: PartitionPolicy::new(
                DEFAULT_STATIC_MAX_AGE_MS,
                DEFAULT_STATIC_MAX_ENTRIES,
            ),
            dynamic_policy: PartitionPolicy::new(
                DEFAULT_DYNAMIC_MAX_AGE_MS,
                DEFAULT_DYNAMIC_MAX_ENTRIES,
            ),
            api_policy: PartitionPolicy::new(DEFAULT_API_MAX_AGE_MS, DEFAULT_API_MAX_ENTRIES),
            static_manifest: DEFAULT_STATIC_MANIFEST
                .iter()
                .map(|path| (*path).to_string())
                .collect(),
            static_prefixes: DEFAULT_STATIC_PREFIXES
                .iter()
                .map(|prefix| (*prefix).to_string())
                .collect(),
            offline_path: DEFAULT_OFFLINE_PATH.to_string(),
            api_host: DEFAULT_API_HOST.to_string(),
            expire_by_age: true,
        }
    }
}

impl CacheConfig {
    /// Partition names for the configured app name and version.
    pub fn partition_names(&self) -> PartitionNames {
        PartitionNames::new(&self.app_name, &self.version)
    }

    /// Eviction policy for a partition kind.
    pub fn policy(&self, kind: PartitionKind) -> PartitionPolicy {
        match kind {
            PartitionKind::Static => self.static_policy,
            PartitionKind::Dynamic => self.dynamic_policy,
            PartitionKind::Api => self.api_policy,
        }
    }
}
