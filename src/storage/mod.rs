//! Object storage: durable homes for staged and rendered files.
//!
//! [`ObjectStore`] is the only seam between the pipeline and a remote
//! provider. Three implementations ship with the crate:
//!
//! * [`cloudinary::CloudinaryStore`] — the production provider, over HTTP.
//! * [`filesystem::FilesystemObjectStore`] — a local directory behind a
//!   static file server; for development and self-hosting.
//! * [`memory::MemoryObjectStore`] — in-process, with call counters and
//!   fault injection; for tests.
//!
//! Deletes go through [`delete_with_fallback`], which tries each resource
//! kind in a caller-supplied order. Providers key objects by
//! `(resource kind, id)`, so deleting with the wrong kind reports
//! "not found" and would otherwise leak the object forever.

pub mod cloudinary;
pub mod filesystem;
pub mod memory;

use crate::config::{PipelineConfig, StorageBackend, StorageSettings};
use crate::error::AssetError;
use crate::model::{ResourceKind, StoredObject};
use crate::pipeline::deadline::bounded_call;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where and how to store one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    /// Folder namespace, e.g. `portfolio-cms/resume-images`.
    pub folder: String,
    pub resource_kind: ResourceKind,
    /// Requested object name inside `folder`. Generated if `None`.
    pub public_id: Option<String>,
    /// Provider-side transformation applied once, at upload time.
    /// Stores without an image pipeline ignore it.
    pub transformation: Option<String>,
    /// Target delivery format (`jpg`, ...). Ignored like `transformation`.
    pub format: Option<String>,
}

/// Upload-time limit for user images: fit inside 1200×800, automatic quality.
pub const IMAGE_TRANSFORMATION: &str = "c_limit,h_800,q_auto,w_1200";

/// Upload-time optimisation for rendered resume pages.
pub const PAGE_TRANSFORMATION: &str = "q_auto";

/// Delivery format of rendered resume pages.
pub const PAGE_FORMAT: &str = "jpg";

impl PutOptions {
    pub fn new(folder: impl Into<String>, resource_kind: ResourceKind) -> Self {
        Self {
            folder: folder.into(),
            resource_kind,
            public_id: None,
            transformation: None,
            format: None,
        }
    }

    pub fn public_id(mut self, id: impl Into<String>) -> Self {
        self.public_id = Some(id.into());
        self
    }

    pub fn transformation(mut self, t: impl Into<String>) -> Self {
        self.transformation = Some(t.into());
        self
    }

    pub fn format(mut self, f: impl Into<String>) -> Self {
        self.format = Some(f.into());
        self
    }
}

/// Durable store/delete of binary assets.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    /// Upload the file at `local_path`; returns its URL and storage id.
    async fn put(&self, local_path: &Path, opts: &PutOptions) -> Result<StoredObject, AssetError>;

    /// Delete an object stored under `kind`.
    ///
    /// Returns [`AssetError::AssetNotFound`] if no such object exists under
    /// that kind.
    async fn delete(&self, storage_id: &str, kind: ResourceKind) -> Result<(), AssetError>;
}

/// Result of a fallback delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Deleted under this kind.
    Deleted(ResourceKind),
    /// Every attempt reported not-found; the object is already gone.
    AlreadyGone,
}

/// Delete `storage_id`, trying each kind in `attempts` in order.
///
/// Stops at the first success. A not-found answer moves on to the next
/// kind; so does any other error, but that error is returned if no later
/// attempt succeeds. Each call is bounded by `call_timeout`; nothing is
/// retried.
pub async fn delete_with_fallback(
    store: &dyn ObjectStore,
    storage_id: &str,
    attempts: &[ResourceKind],
    call_timeout: Duration,
) -> Result<DeleteOutcome, AssetError> {
    let mut last_err: Option<AssetError> = None;

    for &kind in attempts {
        match bounded_call(call_timeout, "delete", store.delete(storage_id, kind)).await {
            Ok(()) => {
                debug!("Deleted {} as {} from {}", storage_id, kind, store.name());
                return Ok(DeleteOutcome::Deleted(kind));
            }
            Err(AssetError::AssetNotFound { .. }) => {
                debug!("{} not found as {}", storage_id, kind);
            }
            Err(e) => {
                warn!("Delete of {} as {} failed: {}", storage_id, kind, e);
                last_err = Some(e);
            }
        }
    }

    match last_err {
        Some(e) => Err(e),
        None => Ok(DeleteOutcome::AlreadyGone),
    }
}

static RE_UNSAFE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_-]+").unwrap());

/// Make `raw` safe for use inside a storage id.
pub fn sanitize_id(raw: &str) -> String {
    let s = RE_UNSAFE_ID.replace_all(raw.trim(), "_");
    let s = s.trim_matches('_');
    if s.is_empty() {
        "asset".to_string()
    } else {
        s.to_string()
    }
}

/// Build the store selected by `settings`.
pub fn build_store(
    settings: &StorageSettings,
    config: &PipelineConfig,
) -> Result<Arc<dyn ObjectStore>, AssetError> {
    match &settings.backend {
        StorageBackend::Cloudinary(creds) => Ok(Arc::new(cloudinary::CloudinaryStore::new(
            creds.clone(),
            config.upload_timeout(),
        )?)),
        StorageBackend::Filesystem {
            root,
            public_base_url,
        } => Ok(Arc::new(filesystem::FilesystemObjectStore::new(
            root.clone(),
            public_base_url.clone(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryObjectStore;
    use super::*;

    async fn stored(store: &MemoryObjectStore, kind: ResourceKind) -> StoredObject {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), b"data").unwrap();
        store
            .put(tmp.path(), &PutOptions::new("test", kind))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn deletes_with_primary_kind() {
        let store = MemoryObjectStore::new();
        let obj = stored(&store, ResourceKind::Raw).await;
        let out = delete_with_fallback(
            &store,
            &obj.storage_id,
            &[ResourceKind::Raw, ResourceKind::Image],
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(out, DeleteOutcome::Deleted(ResourceKind::Raw));
        assert_eq!(store.delete_calls(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_alternate_kind() {
        let store = MemoryObjectStore::new();
        let obj = stored(&store, ResourceKind::Image).await;
        let out = delete_with_fallback(
            &store,
            &obj.storage_id,
            &[ResourceKind::Raw, ResourceKind::Image],
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(out, DeleteOutcome::Deleted(ResourceKind::Image));
        assert_eq!(store.delete_calls(), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn missing_everywhere_is_already_gone() {
        let store = MemoryObjectStore::new();
        let out = delete_with_fallback(
            &store,
            "nope",
            &[ResourceKind::Image, ResourceKind::Raw],
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(out, DeleteOutcome::AlreadyGone);
    }

    #[tokio::test]
    async fn unavailable_store_surfaces_error() {
        let store = MemoryObjectStore::new();
        let obj = stored(&store, ResourceKind::Image).await;
        store.fail_deletes(true);
        let err = delete_with_fallback(
            &store,
            &obj.storage_id,
            &[ResourceKind::Image, ResourceKind::Raw],
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AssetError::StorageUnavailable { .. }));
        assert!(store.contains(&obj.storage_id));
    }

    #[test]
    fn sanitize_replaces_unsafe_runs() {
        assert_eq!(sanitize_id("user 42/../x"), "user_42_x");
        assert_eq!(sanitize_id("ok-id_1"), "ok-id_1");
        assert_eq!(sanitize_id("///"), "asset");
    }
}
