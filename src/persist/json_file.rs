//! String-store backend: one JSON object file of JSON-encoded strings.
//!
//! Mirrors a browser local-storage layout — every value is stored as its
//! JSON string form under the record key. The whole map is rewritten on
//! each mutation; the synchronous file work runs on the blocking pool.

use crate::error::{MessengerError, Result};
use crate::persist::KvStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// File-backed string store.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes the read-modify-write cycle; last write wins across
    // overlapping keys, as the widget contract allows.
    lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    /// Create a store persisting to `path`. Parent directories are created
    /// eagerly so the first write cannot fail on a missing directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Arc::new(Mutex::new(())),
        })
    }

    fn read_map(path: &Path) -> Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(path) {
            Ok(body) if body.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(body) => Ok(serde_json::from_str(&body)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_map(path: &Path, map: &BTreeMap<String, String>) -> Result<()> {
        let body = serde_json::to_string(map)?;
        std::fs::write(path, body)?;
        Ok(())
    }

    async fn with_map<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let _guard = self.lock.clone().lock_owned().await;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || op(&path))
            .await
            .map_err(|e| MessengerError::Persistence(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl KvStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_owned();
        self.with_map(move |path| {
            let map = Self::read_map(path)?;
            match map.get(&key) {
                Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_owned();
        self.with_map(move |path| {
            let mut map = Self::read_map(path)?;
            map.insert(key, serde_json::to_string(&value)?);
            Self::write_map(path, &map)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_owned();
        self.with_map(move |path| {
            let mut map = Self::read_map(path)?;
            if map.remove(&key).is_some() {
                Self::write_map(path, &map)?;
            }
            Ok(())
        })
        .await
    }
}
