//! [`ObjectStore`] over a local directory.
//!
//! Layout: `{root}/{resource kind}/{folder}/{name}{ext}`. The storage id is
//! `{folder}/{name}{ext}` and the public URL is
//! `{public_base_url}/{resource kind}/{storage id}`, so `root` can be served
//! as-is by any static file server.
//!
//! Writes go to `{root}/.tmp` first and are renamed into place, so readers
//! never see a half-written object.

use super::{ObjectStore, PutOptions};
use crate::error::AssetError;
use crate::model::{ResourceKind, StoredObject};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

pub struct FilesystemObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl FilesystemObjectStore {
    pub fn new(root: PathBuf, public_base_url: impl Into<String>) -> Self {
        Self {
            root,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a stored object, refusing ids that escape the root.
    fn object_path(&self, storage_id: &str, kind: ResourceKind) -> Result<PathBuf, AssetError> {
        let rel = Path::new(storage_id);
        let safe = !storage_id.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(AssetError::AssetNotFound {
                storage_id: storage_id.to_string(),
            });
        }
        Ok(self.root.join(kind.as_str()).join(rel))
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }
}

fn unavailable(operation: &'static str, e: std::io::Error) -> AssetError {
    AssetError::StorageUnavailable {
        operation,
        detail: e.to_string(),
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn put(&self, local_path: &Path, opts: &PutOptions) -> Result<StoredObject, AssetError> {
        let name = opts
            .public_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let ext = local_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_ascii_lowercase()))
            .unwrap_or_default();
        let storage_id = format!("{}/{}{}", opts.folder.trim_matches('/'), name, ext);
        let dest = self.object_path(&storage_id, opts.resource_kind)?;

        let temp_path = self.temp_path();
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable("upload", e))?;
        }
        if let Err(e) = fs::copy(local_path, &temp_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(AssetError::staging(local_path, e));
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable("upload", e))?;
        }
        if let Err(e) = fs::rename(&temp_path, &dest).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(unavailable("upload", e));
        }

        Ok(StoredObject {
            url: format!(
                "{}/{}/{}",
                self.public_base_url, opts.resource_kind, storage_id
            ),
            storage_id,
            resource_kind: opts.resource_kind,
        })
    }

    async fn delete(&self, storage_id: &str, kind: ResourceKind) -> Result<(), AssetError> {
        let path = self.object_path(storage_id, kind)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AssetError::AssetNotFound {
                storage_id: storage_id.to_string(),
            }),
            Err(e) => Err(unavailable("delete", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (FilesystemObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path().join("assets"), "http://localhost/assets/");
        (store, dir)
    }

    #[tokio::test]
    async fn put_places_file_under_kind_and_folder() {
        let (store, dir) = temp_store();
        let src = dir.path().join("cv.PDF");
        std::fs::write(&src, b"%PDF-1.4").unwrap();

        let obj = store
            .put(
                &src,
                &PutOptions::new("portfolio-cms/resumes", ResourceKind::Raw).public_id("resume_u1"),
            )
            .await
            .unwrap();

        assert_eq!(obj.storage_id, "portfolio-cms/resumes/resume_u1.pdf");
        assert_eq!(
            obj.url,
            "http://localhost/assets/raw/portfolio-cms/resumes/resume_u1.pdf"
        );
        let on_disk = store.root().join("raw").join(&obj.storage_id);
        assert_eq!(std::fs::read(on_disk).unwrap(), b"%PDF-1.4");
    }

    #[tokio::test]
    async fn delete_wrong_kind_is_not_found() {
        let (store, dir) = temp_store();
        let src = dir.path().join("p.jpg");
        std::fs::write(&src, b"jpg").unwrap();
        let obj = store
            .put(&src, &PutOptions::new("imgs", ResourceKind::Image))
            .await
            .unwrap();

        let err = store.delete(&obj.storage_id, ResourceKind::Raw).await.unwrap_err();
        assert!(matches!(err, AssetError::AssetNotFound { .. }));
        store.delete(&obj.storage_id, ResourceKind::Image).await.unwrap();
        assert!(!store.root().join("image").join(&obj.storage_id).exists());
    }

    #[tokio::test]
    async fn traversal_ids_are_rejected() {
        let (store, _dir) = temp_store();
        let err = store
            .delete("../../etc/passwd", ResourceKind::Raw)
            .await
            .unwrap_err();
        assert!(matches!(err, AssetError::AssetNotFound { .. }));
    }
}
