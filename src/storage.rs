//! Key-value persistence for tool state
//!
//! Tools address one record per call through a composite key
//! `"<namespace>:<caller>[:<session>]"`. The raw store only knows strings;
//! `RecordStore` layers JSON records and the read-modify-write policy on top.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::errors::AppError;

pub const KEY_SEPARATOR: char = ':';

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("stored record under {key} is not valid JSON: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("record serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::internal(err.to_string())
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

pub fn storage_key(namespace: &str, caller: &str, session: Option<&str>) -> String {
    match session {
        Some(session) => format!("{namespace}{KEY_SEPARATOR}{caller}{KEY_SEPARATOR}{session}"),
        None => format!("{namespace}{KEY_SEPARATOR}{caller}"),
    }
}

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}

/// Keeps every entry in memory and rewrites the whole JSON file on each
/// mutation. The file is replaced through a sibling temp file, and the
/// in-memory map only changes once that write succeeded.
#[derive(Debug)]
pub struct JsonFileKvStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, String>>,
}

impl JsonFileKvStore {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => HashMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                key: path.display().to_string(),
                source,
            })?,
            Err(source) if source.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        debug!(path = %path.display(), entries = entries.len(), "file store opened");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    async fn flush(&self, entries: &HashMap<String, String>) -> Result<(), StoreError> {
        let raw = serde_json::to_vec_pretty(entries).map_err(StoreError::Serialize)?;
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, raw)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp_path.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait]
impl KvStore for JsonFileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        next.insert(key.to_string(), value);
        self.flush(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) {
            return Ok(false);
        }

        let mut next = entries.clone();
        next.remove(key);
        self.flush(&next).await?;
        *entries = next;
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Per-key lock held across read, modify and write.
    Serialized,
    /// Plain read then write; concurrent updates of one key are last-write-wins.
    Unsynchronized,
}

#[derive(Debug, Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop locks nobody else is holding or waiting on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[derive(Clone)]
pub struct RecordStore {
    kv: Arc<dyn KvStore>,
    locks: Arc<KeyedLocks>,
    policy: UpdatePolicy,
}

impl RecordStore {
    pub fn new(kv: Arc<dyn KvStore>, policy: UpdatePolicy) -> Self {
        Self {
            kv,
            locks: Arc::new(KeyedLocks::default()),
            policy,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()), UpdatePolicy::Serialized)
    }

    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(None);
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                key: key.to_string(),
                source,
            })
    }

    pub async fn save<T: Serialize>(&self, key: &str, record: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(record).map_err(StoreError::Serialize)?;
        self.kv.put(key, raw).await
    }

    /// Reads the record under `key` (or its default), applies `apply` and
    /// writes the result back. Nothing is written when `apply` fails.
    pub async fn update<T, R, E, F>(&self, key: &str, apply: F) -> Result<R, E>
    where
        T: Serialize + DeserializeOwned + Default,
        E: From<StoreError>,
        F: FnOnce(&mut T) -> Result<R, E>,
    {
        let _guard = match self.policy {
            UpdatePolicy::Serialized => Some(self.locks.acquire(key).await),
            UpdatePolicy::Unsynchronized => None,
        };

        let mut record = self.load::<T>(key).await?.unwrap_or_default();
        let outcome = apply(&mut record)?;
        self.save(key, &record).await?;
        Ok(outcome)
    }
}
