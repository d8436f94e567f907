//! Owning-record persistence.
//!
//! An [`AssetRecordStore`] maps each [`OwnerKey`] to at most one
//! [`PointerSet`]. `swap` replaces the whole set in one step and hands back
//! the previous one; there is no partial update, so a reader sees either
//! the old generation or the new one and never a mix.

use crate::error::AssetError;
use crate::model::{OwnerKey, PointerSet};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::sync::Mutex;

/// Store of owning records.
#[async_trait]
pub trait AssetRecordStore: Send + Sync {
    /// Current pointer set for `key`, if any.
    async fn load(&self, key: &OwnerKey) -> Result<Option<PointerSet>, AssetError>;

    /// Atomically set (or clear, with `None`) the pointer set for `key` and
    /// return what was there before.
    async fn swap(
        &self,
        key: &OwnerKey,
        next: Option<PointerSet>,
    ) -> Result<Option<PointerSet>, AssetError>;
}

fn persist_failure(key: &OwnerKey, detail: impl Into<String>) -> AssetError {
    AssetError::RecordPersistFailure {
        owner: key.to_string(),
        detail: detail.into(),
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

/// Records held in a map. `fail_swaps` makes every swap fail without
/// touching the map.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<OwnerKey, PointerSet>>,
    fail_swaps: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_swaps(&self, fail: bool) {
        self.fail_swaps.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl AssetRecordStore for MemoryRecordStore {
    async fn load(&self, key: &OwnerKey) -> Result<Option<PointerSet>, AssetError> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn swap(
        &self,
        key: &OwnerKey,
        next: Option<PointerSet>,
    ) -> Result<Option<PointerSet>, AssetError> {
        if self.fail_swaps.load(Ordering::SeqCst) {
            return Err(persist_failure(key, "injected write failure"));
        }
        let mut records = self.records.lock().await;
        Ok(match next {
            Some(set) => records.insert(key.clone(), set),
            None => records.remove(key),
        })
    }
}

// ── JSON files ───────────────────────────────────────────────────────────────

/// One JSON file per key under `{root}/{kind}/{sha256(owner)}.json`.
///
/// Owner ids are hashed, not sanitised, so distinct owners can never share
/// a file.
///
/// Writes go to a temp file in the same directory and are renamed over the
/// target, so a crash leaves either the old record or the new one. A single
/// lock serializes swaps within this process.
pub struct JsonRecordStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonRecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, key: &OwnerKey) -> PathBuf {
        self.root
            .join(key.kind.as_str())
            .join(format!("{}.json", hex::encode(Sha256::digest(key.owner_id.as_bytes()))))
    }

    async fn read(&self, key: &OwnerKey) -> Result<Option<PointerSet>, AssetError> {
        let path = self.record_path(key);
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(persist_failure(key, format!("read {}: {}", path.display(), e))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| persist_failure(key, format!("corrupt record {}: {}", path.display(), e)))
    }

    async fn write(&self, key: &OwnerKey, set: &PointerSet) -> Result<(), AssetError> {
        let path = self.record_path(key);
        let dir = path
            .parent()
            .ok_or_else(|| persist_failure(key, "record path has no parent"))?;
        fs::create_dir_all(dir)
            .await
            .map_err(|e| persist_failure(key, e.to_string()))?;

        let json = serde_json::to_vec_pretty(set).map_err(|e| persist_failure(key, e.to_string()))?;
        let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        if let Err(e) = fs::write(&tmp, &json).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(persist_failure(key, e.to_string()));
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(persist_failure(key, e.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AssetRecordStore for JsonRecordStore {
    async fn load(&self, key: &OwnerKey) -> Result<Option<PointerSet>, AssetError> {
        self.read(key).await
    }

    async fn swap(
        &self,
        key: &OwnerKey,
        next: Option<PointerSet>,
    ) -> Result<Option<PointerSet>, AssetError> {
        let _guard = self.write_lock.lock().await;
        let previous = self.read(key).await?;
        match &next {
            Some(set) => self.write(key, set).await?,
            None => match fs::remove_file(self.record_path(key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(persist_failure(key, e.to_string())),
            },
        }
        Ok(previous)
    }
}
