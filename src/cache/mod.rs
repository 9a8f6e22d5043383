//! Partitioned response cache.
//!
//! Three named partitions (static, dynamic, api) carry the app name and a
//! version tag in their names, so bumping the version invalidates everything
//! written by an earlier release.
//!
//! ## Configuration
//!
//! Controlled via `pwa-cache.toml`:
//!
//! ```toml
//! [cache]
//! app_name = "salon-booking"
//! version = "1.4.0"
//! api_host = "api.example.com"
//!
//! [cache.dynamic]
//! max_age_ms = 604800000
//! max_entries = 50
//! ```

mod config;
mod disk;
mod keys;
mod lock;
mod memory;
mod store;

pub use config::{CacheConfig, PartitionPolicy};
pub use disk::DiskCacheStorage;
pub use keys::{PartitionKind, PartitionNames, RequestKey};
pub use memory::MemoryCacheStorage;
pub use store::{CacheStorage, CacheStoreError, CachedResponse, EntryMeta};

pub(crate) use lock::mutex_lock;
pub(crate) use store::validate_partition_name;
