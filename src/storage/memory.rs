//! In-process [`ObjectStore`] with counters and fault injection.
//!
//! Objects are keyed by `(resource kind, storage id)` exactly like the remote
//! provider, so a delete with the wrong kind reports not-found.

use super::{ObjectStore, PutOptions};
use crate::error::AssetError;
use crate::model::{ResourceKind, StoredObject};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(ResourceKind, String), Vec<u8>>,
    /// Options each stored object was uploaded with, by storage id.
    options: BTreeMap<String, PutOptions>,
    put_calls: usize,
    in_flight: usize,
    max_in_flight: usize,
    delete_calls: usize,
    /// 1-based put call number that fails with `StorageUnavailable`.
    fail_put_at: Option<usize>,
    fail_deletes: bool,
    put_delay: Option<Duration>,
}

#[derive(Default)]
pub struct MemoryObjectStore {
    inner: Mutex<Inner>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-call.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Make the `n`-th put from now (1-based) fail.
    pub fn fail_put_number(&self, n: usize) {
        let mut inner = self.lock();
        inner.fail_put_at = Some(inner.put_calls + n);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.lock().fail_deletes = fail;
    }

    /// Sleep before storing each object.
    pub fn set_put_delay(&self, delay: Option<Duration>) {
        self.lock().put_delay = delay;
    }

    pub fn put_calls(&self) -> usize {
        self.lock().put_calls
    }

    /// Highest number of puts that were in progress at the same time.
    pub fn max_concurrent_puts(&self) -> usize {
        self.lock().max_in_flight
    }

    /// Options the object `storage_id` was uploaded with.
    pub fn options(&self, storage_id: &str) -> Option<PutOptions> {
        self.lock().options.get(storage_id).cloned()
    }

    pub fn delete_calls(&self) -> usize {
        self.lock().delete_calls
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `storage_id` exists under either kind.
    pub fn contains(&self, storage_id: &str) -> bool {
        self.lock().objects.keys().any(|(_, id)| id == storage_id)
    }

    /// Storage ids starting with `prefix`, sorted.
    pub fn list(&self, prefix: &str) -> Vec<String> {
        self.lock()
            .objects
            .keys()
            .filter(|(_, id)| id.starts_with(prefix))
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Stored bytes for `storage_id` under `kind`.
    pub fn get(&self, storage_id: &str, kind: ResourceKind) -> Option<Vec<u8>> {
        self.lock()
            .objects
            .get(&(kind, storage_id.to_string()))
            .cloned()
    }
}

/// Counts one put as finished on every exit path.
struct InFlight<'a>(&'a MemoryObjectStore);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().in_flight -= 1;
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, local_path: &Path, opts: &PutOptions) -> Result<StoredObject, AssetError> {
        let (call, delay) = {
            let mut inner = self.lock();
            inner.put_calls += 1;
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
            (inner.put_calls, inner.put_delay)
        };
        let _in_flight = InFlight(self);
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if self.lock().fail_put_at == Some(call) {
            return Err(AssetError::StorageUnavailable {
                operation: "upload",
                detail: format!("injected failure on put #{}", call),
            });
        }

        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| AssetError::staging(local_path, e))?;
        let name = opts
            .public_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let storage_id = format!("{}/{}", opts.folder, name);

        {
            let mut inner = self.lock();
            inner
                .objects
                .insert((opts.resource_kind, storage_id.clone()), data);
            inner.options.insert(storage_id.clone(), opts.clone());
        }

        Ok(StoredObject {
            url: format!("memory://{}/{}", opts.resource_kind, storage_id),
            storage_id,
            resource_kind: opts.resource_kind,
        })
    }

    async fn delete(&self, storage_id: &str, kind: ResourceKind) -> Result<(), AssetError> {
        let mut inner = self.lock();
        inner.delete_calls += 1;
        if inner.fail_deletes {
            return Err(AssetError::StorageUnavailable {
                operation: "delete",
                detail: "injected delete failure".into(),
            });
        }
        match inner.objects.remove(&(kind, storage_id.to_string())) {
            Some(_) => {
                inner.options.remove(storage_id);
                Ok(())
            }
            None => Err(AssetError::AssetNotFound {
                storage_id: storage_id.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(bytes: &[u8]) -> tempfile::NamedTempFile {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), bytes).unwrap();
        tmp
    }

    #[tokio::test]
    async fn put_then_delete() {
        let store = MemoryObjectStore::new();
        let f = file(b"hello");
        let obj = store
            .put(
                f.path(),
                &PutOptions::new("docs", ResourceKind::Raw).public_id("cv"),
            )
            .await
            .unwrap();
        assert_eq!(obj.storage_id, "docs/cv");
        assert_eq!(obj.url, "memory://raw/docs/cv");
        assert_eq!(store.get("docs/cv", ResourceKind::Raw).unwrap(), b"hello");

        let err = store.delete("docs/cv", ResourceKind::Image).await.unwrap_err();
        assert!(matches!(err, AssetError::AssetNotFound { .. }));
        store.delete("docs/cv", ResourceKind::Raw).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.delete_calls(), 2);
    }

    #[tokio::test]
    async fn injected_put_failure_hits_only_that_call() {
        let store = MemoryObjectStore::new();
        let f = file(b"x");
        let opts = PutOptions::new("imgs", ResourceKind::Image);
        store.fail_put_number(2);

        assert!(store.put(f.path(), &opts).await.is_ok());
        assert!(matches!(
            store.put(f.path(), &opts).await,
            Err(AssetError::StorageUnavailable { .. })
        ));
        assert!(store.put(f.path(), &opts).await.is_ok());
        assert_eq!(store.put_calls(), 3);
        assert_eq!(store.list("imgs/").len(), 2);
    }

    #[tokio::test]
    async fn concurrent_puts_are_counted() {
        let store = MemoryObjectStore::new();
        store.set_put_delay(Some(Duration::from_millis(20)));
        let f = file(b"x");
        let opts = PutOptions::new("imgs", ResourceKind::Image);

        let (a, b, c) = tokio::join!(
            store.put(f.path(), &opts),
            store.put(f.path(), &opts),
            store.put(f.path(), &opts),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(store.max_concurrent_puts(), 3);

        // Failed puts release their slot too.
        store.fail_put_number(1);
        assert!(store.put(f.path(), &opts).await.is_err());
        store.put(f.path(), &opts).await.unwrap();
        assert_eq!(store.max_concurrent_puts(), 3);
    }

    #[tokio::test]
    async fn upload_options_are_kept_per_object() {
        let store = MemoryObjectStore::new();
        let f = file(b"x");
        let opts = PutOptions::new("imgs", ResourceKind::Image)
            .public_id("a")
            .transformation("q_auto");
        store.put(f.path(), &opts).await.unwrap();
        assert_eq!(store.options("imgs/a"), Some(opts));

        store.delete("imgs/a", ResourceKind::Image).await.unwrap();
        assert_eq!(store.options("imgs/a"), None);
    }

    #[tokio::test]
    async fn missing_local_file_is_a_staging_error() {
        let store = MemoryObjectStore::new();
        let err = store
            .put(
                Path::new("/definitely/not/here.jpg"),
                &PutOptions::new("imgs", ResourceKind::Image),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AssetError::Staging { .. }));
        assert!(store.is_empty());
    }
}
