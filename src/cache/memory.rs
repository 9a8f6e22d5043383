//! In-process partition storage.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use lru::LruCache;

use super::keys::RequestKey;
use super::lock::{rw_read, rw_write};
use super::store::{
    CacheStorage, CacheStoreError, CachedResponse, EntryMeta, validate_partition_name,
};

const SOURCE: &str = "cache::memory";

struct Inner {
    // Unbounded: the sweeper owns eviction. LRU order doubles as insertion order
    // because reads go through `peek`.
    partitions: HashMap<String, LruCache<RequestKey, CachedResponse>>,
    used_bytes: u64,
}

/// Partitions held in memory, optionally capped by a byte quota.
pub struct MemoryCacheStorage {
    inner: RwLock<Inner>,
    quota_bytes: Option<u64>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::with_quota(None)
    }

    /// Writes that would push total usage above `quota_bytes` fail with
    /// [`CacheStoreError::QuotaExceeded`].
    pub fn with_quota(quota_bytes: Option<u64>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                partitions: HashMap::new(),
                used_bytes: 0,
            }),
            quota_bytes,
        }
    }

    /// Bytes currently charged against the quota.
    pub fn used_bytes(&self) -> u64 {
        rw_read(&self.inner, SOURCE, "used_bytes").used_bytes
    }
}

impl Default for MemoryCacheStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, partition: &str) -> Result<(), CacheStoreError> {
        validate_partition_name(partition)?;
        rw_write(&self.inner, SOURCE, "open")
            .partitions
            .entry(partition.to_string())
            .or_insert_with(LruCache::unbounded);
        Ok(())
    }

    async fn get(
        &self,
        partition: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, CacheStoreError> {
        let inner = rw_read(&self.inner, SOURCE, "get");
        Ok(inner
            .partitions
            .get(partition)
            .and_then(|entries| entries.peek(key))
            .cloned())
    }

    async fn put(
        &self,
        partition: &str,
        key: RequestKey,
        response: CachedResponse,
    ) -> Result<(), CacheStoreError> {
        validate_partition_name(partition)?;
        let mut inner = rw_write(&self.inner, SOURCE, "put");
        let incoming = response.byte_size();
        let replaced = inner
            .partitions
            .get(partition)
            .and_then(|entries| entries.peek(&key))
            .map_or(0, CachedResponse::byte_size);

        let projected = inner.used_bytes - replaced + incoming;
        if let Some(limit_bytes) = self.quota_bytes
            && projected > limit_bytes
        {
            return Err(CacheStoreError::QuotaExceeded {
                partition: partition.to_string(),
                limit_bytes,
            });
        }

        inner.used_bytes = projected;
        inner
            .partitions
            .entry(partition.to_string())
            .or_insert_with(LruCache::unbounded)
            .push(key, response);
        Ok(())
    }

    async fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool, CacheStoreError> {
        let mut inner = rw_write(&self.inner, SOURCE, "delete");
        let removed = inner
            .partitions
            .get_mut(partition)
            .and_then(|entries| entries.pop(key));
        match removed {
            Some(response) => {
                inner.used_bytes -= response.byte_size();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn entries(&self, partition: &str) -> Result<Vec<EntryMeta>, CacheStoreError> {
        let inner = rw_read(&self.inner, SOURCE, "entries");
        Ok(inner
            .partitions
            .get(partition)
            .map(|entries| {
                // LruCache iterates most-recent first.
                entries
                    .iter()
                    .rev()
                    .map(|(key, response)| EntryMeta {
                        key: key.clone(),
                        stored_at: response.stored_at,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn partition_names(&self) -> Result<Vec<String>, CacheStoreError> {
        let inner = rw_read(&self.inner, SOURCE, "partition_names");
        let mut names: Vec<String> = inner.partitions.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool, CacheStoreError> {
        let mut inner = rw_write(&self.inner, SOURCE, "delete_partition");
        match inner.partitions.remove(partition) {
            Some(entries) => {
                let freed: u64 = entries.iter().map(|(_, response)| response.byte_size()).sum();
                inner.used_bytes -= freed;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
