//! Durable partition storage on the local filesystem.
//!
//! Layout: `<root>/<partition>/<sha256(key)>.json` holds the key and response
//! metadata, `<sha256(key)>.body` the raw body. Listing a partition reads only
//! the metadata files. Both files land in a temp file first and are renamed
//! into place, body before metadata, so an entry is visible only once whole.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::fs;
use tracing::warn;
use url::Url;

use super::keys::RequestKey;
use super::store::{
    CacheStorage, CacheStoreError, CachedResponse, EntryMeta, validate_partition_name,
};

const META_EXTENSION: &str = "json";
const BODY_EXTENSION: &str = "body";

#[derive(Debug, Serialize, Deserialize)]
struct DiskEntry {
    method: String,
    url: String,
    seq: u64,
    stored_at_ms: i64,
    status: u16,
    headers: Vec<(String, String)>,
}

impl DiskEntry {
    fn new(key: &RequestKey, seq: u64, response: &CachedResponse) -> Self {
        Self {
            method: key.method().as_str().to_string(),
            url: key.url().as_str().to_string(),
            seq,
            stored_at_ms: (response.stored_at.unix_timestamp_nanos() / 1_000_000) as i64,
            status: response.status,
            headers: response.headers.clone(),
        }
    }

    fn key(&self, path: &Path) -> Result<RequestKey, CacheStoreError> {
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|err| CacheStoreError::corrupt(path, format!("bad method: {err}")))?;
        let url = Url::parse(&self.url)
            .map_err(|err| CacheStoreError::corrupt(path, format!("bad url: {err}")))?;
        Ok(RequestKey::new(method, url))
    }

    fn stored_at(&self, path: &Path) -> Result<OffsetDateTime, CacheStoreError> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.stored_at_ms) * 1_000_000)
            .map_err(|err| CacheStoreError::corrupt(path, format!("bad timestamp: {err}")))
    }

    fn into_response(self, path: &Path, body: Vec<u8>) -> Result<CachedResponse, CacheStoreError> {
        let stored_at = self.stored_at(path)?;
        Ok(CachedResponse {
            status: self.status,
            headers: self.headers,
            body: body.into(),
            stored_at,
        })
    }
}

/// Partitions persisted as directories under `root`.
pub struct DiskCacheStorage {
    root: PathBuf,
    seq: AtomicU64,
}

impl DiskCacheStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        // Seeded from the clock so insertion order survives restarts.
        let seed = OffsetDateTime::now_utc().unix_timestamp_nanos().max(0) as u64;
        Self {
            root: root.into(),
            seq: AtomicU64::new(seed),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, partition: &str) -> Result<PathBuf, CacheStoreError> {
        validate_partition_name(partition)?;
        Ok(self.root.join(partition))
    }

    /// Metadata path; the body sits next to it under [`BODY_EXTENSION`].
    fn entry_path(&self, partition: &str, key: &RequestKey) -> Result<PathBuf, CacheStoreError> {
        let mut hasher = Sha256::new();
        hasher.update(key.to_string().as_bytes());
        let file = format!("{}.{META_EXTENSION}", hex::encode(hasher.finalize()));
        Ok(self.partition_dir(partition)?.join(file))
    }

    async fn read_file(path: &Path) -> Result<Option<Vec<u8>>, CacheStoreError> {
        match fs::read(path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheStoreError::io(path, err)),
        }
    }

    async fn read_entry(path: &Path) -> Result<Option<DiskEntry>, CacheStoreError> {
        let Some(raw) = Self::read_file(path).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| CacheStoreError::corrupt(path, err.to_string()))
    }

    async fn write_atomic(path: &Path, seq: u64, contents: &[u8]) -> Result<(), CacheStoreError> {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(".tmp-{seq}"));
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, contents)
            .await
            .map_err(|err| CacheStoreError::io(&tmp, err))?;
        if let Err(err) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(CacheStoreError::io(path, err));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, partition: &str) -> Result<(), CacheStoreError> {
        let dir = self.partition_dir(partition)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|err| CacheStoreError::io(&dir, err))
    }

    async fn get(
        &self,
        partition: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedResponse>, CacheStoreError> {
        let path = self.entry_path(partition, key)?;
        let Some(entry) = Self::read_entry(&path).await? else {
            return Ok(None);
        };
        if entry.key(&path)? != *key {
            return Ok(None);
        }
        let body_path = path.with_extension(BODY_EXTENSION);
        let Some(body) = Self::read_file(&body_path).await? else {
            warn!(partition, path = %body_path.display(), "cache entry body missing; treating as miss");
            return Ok(None);
        };
        entry.into_response(&path, body).map(Some)
    }

    async fn put(
        &self,
        partition: &str,
        key: RequestKey,
        response: CachedResponse,
    ) -> Result<(), CacheStoreError> {
        self.open(partition).await?;
        let path = self.entry_path(partition, &key)?;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let encoded = serde_json::to_vec(&DiskEntry::new(&key, seq, &response))
            .map_err(|err| CacheStoreError::corrupt(&path, err.to_string()))?;

        Self::write_atomic(&path.with_extension(BODY_EXTENSION), seq, &response.body).await?;
        Self::write_atomic(&path, seq, &encoded).await
    }

    async fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool, CacheStoreError> {
        let path = self.entry_path(partition, key)?;
        let removed = match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(CacheStoreError::io(&path, err)),
        };
        let body_path = path.with_extension(BODY_EXTENSION);
        match fs::remove_file(&body_path).await {
            Ok(()) => Ok(removed),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(removed),
            Err(err) => Err(CacheStoreError::io(&body_path, err)),
        }
    }

    async fn entries(&self, partition: &str) -> Result<Vec<EntryMeta>, CacheStoreError> {
        let dir = self.partition_dir(partition)?;
        let mut listing = match fs::read_dir(&dir).await {
            Ok(listing) => listing,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(CacheStoreError::io(&dir, err)),
        };

        let mut found = Vec::new();
        while let Some(item) = listing
            .next_entry()
            .await
            .map_err(|err| CacheStoreError::io(&dir, err))?
        {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(META_EXTENSION) {
                continue;
            }
            let parsed = match Self::read_entry(&path).await {
                Ok(Some(entry)) => entry.key(&path).and_then(|key| {
                    entry
                        .stored_at(&path)
                        .map(|stored_at| (entry.seq, key, stored_at))
                }),
                // Deleted between listing and reading.
                Ok(None) => continue,
                Err(err) => Err(err),
            };
            match parsed {
                Ok(meta) => found.push(meta),
                Err(err) => {
                    warn!(partition, path = %path.display(), error = %err, "Skipping unreadable cache entry");
                }
            }
        }

        found.sort_by_key(|(seq, _, _)| *seq);
        Ok(found
            .into_iter()
            .map(|(_, key, stored_at)| EntryMeta { key, stored_at })
            .collect())
    }

    async fn partition_names(&self) -> Result<Vec<String>, CacheStoreError> {
        let mut listing = match fs::read_dir(&self.root).await {
            Ok(listing) => listing,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(CacheStoreError::io(&self.root, err)),
        };

        let mut names = Vec::new();
        while let Some(item) = listing
            .next_entry()
            .await
            .map_err(|err| CacheStoreError::io(&self.root, err))?
        {
            let is_dir = item
                .file_type()
                .await
                .map_err(|err| CacheStoreError::io(item.path(), err))?
                .is_dir();
            if is_dir && let Some(name) = item.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool, CacheStoreError> {
        let dir = self.partition_dir(partition)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(CacheStoreError::io(&dir, err)),
        }
    }
}
