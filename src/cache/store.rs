//! Cache storage contract.
//!
//! Partitions are opened by name and hold `RequestKey` → `CachedResponse`
//! entries in insertion order. Backends live in `memory` and `disk`.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

use super::keys::RequestKey;

/// Captured response: status, headers and body, plus when it was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub stored_at: OffsetDateTime,
}

impl CachedResponse {
    pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            stored_at: OffsetDateTime::now_utc(),
        }
    }

    /// Only HTTP 200 responses are written to a partition.
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Bytes charged against a storage quota.
    pub fn byte_size(&self) -> u64 {
        let header_bytes: usize = self
            .headers
            .iter()
            .map(|(name, value)| name.len() + value.len())
            .sum();
        (self.body.len() + header_bytes) as u64
    }

    /// Age relative to `now`; zero when `stored_at` lies in the future.
    pub fn age_at(&self, now: OffsetDateTime) -> Duration {
        Duration::try_from(now - self.stored_at).unwrap_or(Duration::ZERO)
    }
}

/// Key plus insertion timestamp, as listed by [`CacheStorage::entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    pub key: RequestKey,
    pub stored_at: OffsetDateTime,
}

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("storage quota of {limit_bytes} bytes exceeded while writing to `{partition}`")]
    QuotaExceeded { partition: String, limit_bytes: u64 },
    #[error("invalid partition name `{0}`")]
    InvalidName(String),
    #[error("i/o failure on `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("corrupt cache entry at `{path}`: {detail}")]
    Corrupt { path: PathBuf, detail: String },
}

impl CacheStoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

/// Named key-value partitions of captured responses.
///
/// Every call is individually atomic; callers get no cross-call transaction.
/// Reads on a partition that does not exist behave as an empty partition,
/// writes create it.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the partition if it does not exist yet.
    async fn open(&self, partition: &str) -> Result<(), CacheStoreError>;

    async fn get(
        &self,
        partition: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, CacheStoreError>;

    /// Insert or replace. A replaced entry moves to the end of insertion order.
    async fn put(
        &self,
        partition: &str,
        key: RequestKey,
        response: CachedResponse,
    ) -> Result<(), CacheStoreError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool, CacheStoreError>;

    /// Entries in insertion order, oldest first.
    async fn entries(&self, partition: &str) -> Result<Vec<EntryMeta>, CacheStoreError>;

    async fn partition_names(&self) -> Result<Vec<String>, CacheStoreError>;

    /// Returns whether the partition existed.
    async fn delete_partition(&self, partition: &str) -> Result<bool, CacheStoreError>;

    /// First hit for `key` across `partitions`, searched in order.
    async fn match_any(
        &self,
        partitions: &[&str],
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, CacheStoreError> {
        for partition in partitions {
            if let Some(found) = self.get(partition, key).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

/// Partition names become directory names on disk, so keep them plain.
pub(crate) fn validate_partition_name(name: &str) -> Result<(), CacheStoreError> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CacheStoreError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let response = CachedResponse::new(
            200,
            vec![("Content-Type".to_string(), "text/html".to_string())],
            "<p>hi</p>",
        );
        assert_eq!(response.header("content-type"), Some("text/html"));
        assert_eq!(response.header("etag"), None);
    }

    #[test]
    fn only_200_is_ok() {
        assert!(CachedResponse::new(200, vec![], "").is_ok());
        assert!(!CachedResponse::new(204, vec![], "").is_ok());
        assert!(!CachedResponse::new(304, vec![], "").is_ok());
    }

    #[test]
    fn age_never_negative() {
        let mut response = CachedResponse::new(200, vec![], "");
        response.stored_at = datetime!(2026-01-01 12:00 UTC);
        assert_eq!(
            response.age_at(datetime!(2026-01-01 12:05 UTC)),
            Duration::from_secs(300)
        );
        assert_eq!(response.age_at(datetime!(2026-01-01 11:00 UTC)), Duration::ZERO);
    }

    #[test]
    fn partition_name_validation() {
        assert!(validate_partition_name("salon-static-v1.4.0").is_ok());
        assert!(validate_partition_name("").is_err());
        assert!(validate_partition_name("..").is_err());
        assert!(validate_partition_name("a/b").is_err());
    }
}
