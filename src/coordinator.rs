//! Asset lifecycle coordinator: the only place a pointer set is replaced.
//!
//! Every replace runs the same state machine:
//!
//! ```text
//! START → STAGED → RENDERED (documents only) → UPLOADED → PERSISTED → CLEANED
//!   └──────────────────────── any error ───────────────────────→ FAILED
//! ```
//!
//! Ordering rules:
//!
//! 1. Validation happens before any disk or network side effect.
//! 2. If one upload of a batch fails, every object already uploaded by the
//!    same run is deleted before the run fails.
//! 3. The record is swapped to the new set in one step. If that write fails
//!    the new uploads are deleted too.
//! 4. Only after the swap succeeds is the previous generation deleted, on a
//!    best-effort basis: failures are logged, reported to the observer and
//!    counted, never retried and never rolled back.
//! 5. Staged files and render scratch directories are removed on every exit
//!    path (they are owned by drop guards).
//!
//! Runs for the same [`OwnerKey`] are serialized by an in-process lock table;
//! runs for different keys proceed concurrently.

use crate::config::{FolderLayout, PipelineConfig};
use crate::error::AssetError;
use crate::model::{
    AssetKind, AssetRef, LifecycleStats, OwnerKey, Outcome, PointerSet, ResourceKind,
    ResumeRecord, StoredObject,
};
use crate::pipeline::deadline::{bounded_call, run_until_stopped, CancelFlag};
use crate::pipeline::render::DocumentRenderer;
use crate::pipeline::staging::{validate_batch, IncomingFile, StagedFile, StagingArea, UploadKind};
use crate::progress::{LifecycleObserver, NoopObserver, SharedObserver, Stage};
use crate::records::AssetRecordStore;
use crate::storage::{
    delete_with_fallback, sanitize_id, ObjectStore, PutOptions, IMAGE_TRANSFORMATION, PAGE_FORMAT,
    PAGE_TRANSFORMATION,
};
use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Tracks the stage of one run and reports transitions.
struct Run<'a> {
    key: &'a OwnerKey,
    observer: &'a dyn LifecycleObserver,
    stage: Stage,
    started: Instant,
    stats: LifecycleStats,
}

impl<'a> Run<'a> {
    fn start(key: &'a OwnerKey, observer: &'a dyn LifecycleObserver) -> Self {
        info!("{}: {}", key, Stage::Start);
        observer.on_stage(key, Stage::Start);
        Self {
            key,
            observer,
            stage: Stage::Start,
            started: Instant::now(),
            stats: LifecycleStats::default(),
        }
    }

    fn advance(&mut self, stage: Stage) {
        debug!("{}: {} → {}", self.key, self.stage, stage);
        self.stage = stage;
        self.observer.on_stage(self.key, stage);
    }

    /// Close the run: `Cleaned` is already reported on success, `Failed` is
    /// reported here on error.
    fn finish<T>(mut self, result: Result<T, AssetError>) -> Result<Outcome<T>, AssetError> {
        self.stats.total_duration_ms = self.started.elapsed().as_millis() as u64;
        match result {
            Ok(value) => {
                info!(
                    "{}: {} in {}ms ({} uploaded, {} previous deleted, {} cleanup failures)",
                    self.key,
                    self.stage,
                    self.stats.total_duration_ms,
                    self.stats.uploaded,
                    self.stats.previous_deleted,
                    self.stats.cleanup_failures
                );
                Ok(Outcome {
                    value,
                    stats: self.stats,
                })
            }
            Err(e) => {
                warn!("{}: {} during {}: {}", self.key, Stage::Failed, self.stage, e);
                self.stage = Stage::Failed;
                self.observer.on_stage(self.key, Stage::Failed);
                Err(e)
            }
        }
    }
}

/// One object to upload.
struct UploadJob {
    path: PathBuf,
    opts: PutOptions,
}

/// Per-key async locks. An entry lives only while some run holds or waits
/// for its key.
#[derive(Default)]
struct OwnerLocks {
    table: DashMap<OwnerKey, Arc<Mutex<()>>>,
}

impl OwnerLocks {
    /// Run `work` while holding the lock for `key`. The entry is released
    /// even if the returned future is dropped before completion.
    async fn run<T>(&self, key: &OwnerKey, work: impl Future<Output = T>) -> T {
        let lease = LockLease {
            table: &self.table,
            key: key.clone(),
            lock: Arc::clone(self.table.entry(key.clone()).or_default().value()),
        };
        let _guard = lease.lock.lock().await;
        work.await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.table.len()
    }
}

/// One holder (or waiter) of a table entry.
struct LockLease<'t> {
    table: &'t DashMap<OwnerKey, Arc<Mutex<()>>>,
    key: OwnerKey,
    lock: Arc<Mutex<()>>,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        // Only the table and this lease hold it: nobody else is waiting.
        self.table.remove_if(&self.key, |_, m| {
            Arc::ptr_eq(m, &self.lock) && Arc::strong_count(m) == 2
        });
    }
}

/// Orchestrates staging, rendering, uploads, record swaps and cleanup.
pub struct AssetCoordinator {
    config: PipelineConfig,
    staging: StagingArea,
    renderer: Arc<dyn DocumentRenderer>,
    store: Arc<dyn ObjectStore>,
    records: Arc<dyn AssetRecordStore>,
    folders: FolderLayout,
    locks: OwnerLocks,
    observer: SharedObserver,
}

impl AssetCoordinator {
    pub fn new(
        config: PipelineConfig,
        renderer: Arc<dyn DocumentRenderer>,
        store: Arc<dyn ObjectStore>,
        records: Arc<dyn AssetRecordStore>,
        folders: FolderLayout,
    ) -> Self {
        Self {
            staging: StagingArea::new(config.staging_dir.clone()),
            config,
            renderer,
            store,
            records,
            folders,
            locks: OwnerLocks::default(),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn folders(&self) -> &FolderLayout {
        &self.folders
    }

    // ── Resume ───────────────────────────────────────────────────────────────

    /// Replace the owner's resume with `file`.
    ///
    /// On success the record holds the new PDF and exactly one page image per
    /// page, in page order, and the previous generation has been deleted
    /// (best-effort).
    pub async fn replace_resume(
        &self,
        owner_id: &str,
        file: IncomingFile,
    ) -> Result<Outcome<ResumeRecord>, AssetError> {
        let key = OwnerKey::new(owner_id, AssetKind::Resume);
        let mut run = Run::start(&key, self.observer.as_ref());
        let result = self
            .locks
            .run(&key, self.replace_resume_locked(&key, file, &mut run))
            .await;
        run.finish(result)
    }

    async fn replace_resume_locked(
        &self,
        key: &OwnerKey,
        file: IncomingFile,
        run: &mut Run<'_>,
    ) -> Result<ResumeRecord, AssetError> {
        let staged = self
            .staging
            .stage(&file, UploadKind::Document, &self.config)
            .await?;
        drop(file);
        run.advance(Stage::Staged);

        // ── Render under deadline ────────────────────────────────────────────
        // The renderer writes into `scratch`; on timeout it is waited for so
        // the directory is never removed under a page still being written.
        let scratch = self.staging.scratch_dir().await?;
        let render_start = Instant::now();
        let cancel = CancelFlag::new();
        let rendered = run_until_stopped(
            self.config.render_timeout(),
            &cancel,
            self.renderer
                .render(staged.path(), scratch.path(), cancel.clone()),
        )
        .await
        .into_result(|| AssetError::ConversionTimeout {
            secs: self.config.render_timeout_secs,
        })?;
        run.stats.render_duration_ms = render_start.elapsed().as_millis() as u64;

        if rendered.page_count == 0 || rendered.page_paths.len() != rendered.page_count {
            return Err(AssetError::DocumentCorrupt {
                path: staged.path().to_path_buf(),
                detail: format!(
                    "renderer produced {} images for {} pages",
                    rendered.page_paths.len(),
                    rendered.page_count
                ),
            });
        }
        info!(
            "{}: rendered {} pages in {}ms",
            key, rendered.page_count, run.stats.render_duration_ms
        );
        run.advance(Stage::Rendered);

        // ── Upload document first, then pages in order ───────────────────────
        let base = generation_id("resume", &key.owner_id);
        let mut jobs = Vec::with_capacity(rendered.page_count + 1);
        jobs.push(UploadJob {
            path: staged.path().to_path_buf(),
            opts: PutOptions::new(self.folders.documents(), ResourceKind::Raw)
                .public_id(base.clone()),
        });
        for (idx, path) in rendered.page_paths.iter().enumerate() {
            jobs.push(UploadJob {
                path: path.clone(),
                opts: PutOptions::new(self.folders.page_images(), ResourceKind::Image)
                    .public_id(format!("{}_page-{}", base, idx + 1))
                    .transformation(PAGE_TRANSFORMATION)
                    .format(PAGE_FORMAT),
            });
        }

        let mut stored = self.upload_all(key, jobs, run).await?;
        run.advance(Stage::Uploaded);

        let pages: Vec<AssetRef> = stored.split_off(1).into_iter().map(AssetRef::from).collect();
        let document = stored
            .pop()
            .map(AssetRef::from)
            .ok_or_else(|| AssetError::Internal("document upload missing".into()))?;
        let record = ResumeRecord {
            owner_id: key.owner_id.clone(),
            original_file_name: staged.original_name().to_string(),
            file_size: staged.size(),
            page_count: rendered.page_count,
            document,
            pages,
            uploaded_at: Utc::now(),
        };

        let uploaded = PointerSet::Resume(record.clone())
            .assets()
            .into_iter()
            .map(|(a, _)| a.clone())
            .collect();
        self.persist_and_clean(
            key,
            PointerSet::Resume(record.clone()),
            uploaded,
            run,
            vec![staged],
            Some(scratch),
        )
        .await?;
        Ok(record)
    }

    /// Current resume of the owner.
    pub async fn get_resume(&self, owner_id: &str) -> Result<ResumeRecord, AssetError> {
        let key = OwnerKey::new(owner_id, AssetKind::Resume);
        match self.records.load(&key).await? {
            Some(PointerSet::Resume(r)) => Ok(r),
            _ => Err(not_found(&key)),
        }
    }

    /// Delete the owner's resume and all of its remote objects.
    pub async fn delete_resume(&self, owner_id: &str) -> Result<LifecycleStats, AssetError> {
        self.remove_slot(OwnerKey::new(owner_id, AssetKind::Resume))
            .await
            .map(|o| o.stats)
    }

    // ── Single-image slots ───────────────────────────────────────────────────

    /// Replace a user's profile image.
    pub async fn replace_profile_image(
        &self,
        user_id: &str,
        file: IncomingFile,
    ) -> Result<Outcome<AssetRef>, AssetError> {
        self.replace_single_image(OwnerKey::new(user_id, AssetKind::ProfileImage), file)
            .await
    }

    pub async fn remove_profile_image(&self, user_id: &str) -> Result<LifecycleStats, AssetError> {
        self.remove_slot(OwnerKey::new(user_id, AssetKind::ProfileImage))
            .await
            .map(|o| o.stats)
    }

    /// Replace a blog post's featured image.
    pub async fn replace_featured_image(
        &self,
        blog_id: &str,
        file: IncomingFile,
    ) -> Result<Outcome<AssetRef>, AssetError> {
        self.replace_single_image(OwnerKey::new(blog_id, AssetKind::FeaturedImage), file)
            .await
    }

    pub async fn remove_featured_image(&self, blog_id: &str) -> Result<LifecycleStats, AssetError> {
        self.remove_slot(OwnerKey::new(blog_id, AssetKind::FeaturedImage))
            .await
            .map(|o| o.stats)
    }

    async fn replace_single_image(
        &self,
        key: OwnerKey,
        file: IncomingFile,
    ) -> Result<Outcome<AssetRef>, AssetError> {
        let mut run = Run::start(&key, self.observer.as_ref());
        let result = self
            .locks
            .run(&key, self.replace_single_image_locked(&key, file, &mut run))
            .await;
        run.finish(result)
    }

    async fn replace_single_image_locked(
        &self,
        key: &OwnerKey,
        file: IncomingFile,
        run: &mut Run<'_>,
    ) -> Result<AssetRef, AssetError> {
        let staged = self
            .staging
            .stage(&file, UploadKind::Image, &self.config)
            .await?;
        run.advance(Stage::Staged);

        let job = UploadJob {
            path: staged.path().to_path_buf(),
            opts: PutOptions::new(self.folders.images(), ResourceKind::Image)
                .public_id(generation_id(image_prefix(key.kind), &key.owner_id))
                .transformation(IMAGE_TRANSFORMATION),
        };
        let image = self
            .upload_all(key, vec![job], run)
            .await?
            .pop()
            .map(AssetRef::from)
            .ok_or_else(|| AssetError::Internal("image upload missing".into()))?;
        run.advance(Stage::Uploaded);

        self.persist_and_clean(
            key,
            PointerSet::images(vec![image.clone()]),
            vec![image.clone()],
            run,
            vec![staged],
            None,
        )
        .await?;
        Ok(image)
    }

    // ── Project images ───────────────────────────────────────────────────────

    /// Append a batch of images to a project's gallery.
    ///
    /// Returns the full gallery after the append. The batch is all-or-nothing:
    /// if any file is rejected or any upload fails, the gallery is unchanged.
    pub async fn add_project_images(
        &self,
        project_id: &str,
        files: Vec<IncomingFile>,
    ) -> Result<Outcome<Vec<AssetRef>>, AssetError> {
        let key = OwnerKey::new(project_id, AssetKind::ProjectImages);
        let mut run = Run::start(&key, self.observer.as_ref());
        let result = self
            .locks
            .run(&key, self.add_project_images_locked(&key, files, &mut run))
            .await;
        run.finish(result)
    }

    async fn add_project_images_locked(
        &self,
        key: &OwnerKey,
        files: Vec<IncomingFile>,
        run: &mut Run<'_>,
    ) -> Result<Vec<AssetRef>, AssetError> {
        validate_batch(&files, &self.config)?;

        let mut staged = Vec::with_capacity(files.len());
        for file in &files {
            staged.push(
                self.staging
                    .stage(file, UploadKind::Image, &self.config)
                    .await?,
            );
        }
        drop(files);
        run.advance(Stage::Staged);

        let prefix = generation_id("project", &key.owner_id);
        let jobs = staged
            .iter()
            .enumerate()
            .map(|(i, s)| UploadJob {
                path: s.path().to_path_buf(),
                opts: PutOptions::new(self.folders.images(), ResourceKind::Image)
                    .public_id(format!("{}_{}", prefix, i + 1))
                    .transformation(IMAGE_TRANSFORMATION),
            })
            .collect();
        let added: Vec<AssetRef> = self
            .upload_all(key, jobs, run)
            .await?
            .into_iter()
            .map(AssetRef::from)
            .collect();
        run.advance(Stage::Uploaded);

        let current = match self.records.load(key).await {
            Ok(set) => set,
            Err(e) => {
                self.rollback(key, &added, run).await;
                return Err(e);
            }
        };
        let mut gallery = current
            .as_ref()
            .map(|s| s.image_refs().to_vec())
            .unwrap_or_default();
        gallery.extend(added.iter().cloned());

        self.persist_and_clean(key, PointerSet::images(gallery.clone()), added, run, staged, None)
            .await?;
        Ok(gallery)
    }

    /// Remove one image, by storage id, from a project's gallery.
    ///
    /// Returns the remaining gallery.
    pub async fn remove_project_image(
        &self,
        project_id: &str,
        storage_id: &str,
    ) -> Result<Outcome<Vec<AssetRef>>, AssetError> {
        let key = OwnerKey::new(project_id, AssetKind::ProjectImages);
        let mut run = Run::start(&key, self.observer.as_ref());
        let result = self
            .locks
            .run(&key, async {
                let current = self
                    .records
                    .load(&key)
                    .await?
                    .ok_or_else(|| not_found(&key))?;
                if !current.image_refs().iter().any(|i| i.storage_id == storage_id) {
                    return Err(AssetError::AssetNotFound {
                        storage_id: storage_id.to_string(),
                    });
                }
                let remaining: Vec<AssetRef> = current
                    .image_refs()
                    .iter()
                    .filter(|i| i.storage_id != storage_id)
                    .cloned()
                    .collect();
                let next = if remaining.is_empty() {
                    None
                } else {
                    Some(PointerSet::images(remaining.clone()))
                };
                let previous = self.records.swap(&key, next).await?;
                run.advance(Stage::Persisted);
                self.clean_previous(&key, previous, &remaining, &mut run).await;
                run.advance(Stage::Cleaned);
                Ok::<_, AssetError>(remaining)
            })
            .await;
        run.finish(result)
    }

    /// Delete all images of a project that is being removed.
    ///
    /// A project with no images is not an error.
    pub async fn delete_project_assets(
        &self,
        project_id: &str,
    ) -> Result<LifecycleStats, AssetError> {
        match self
            .remove_slot(OwnerKey::new(project_id, AssetKind::ProjectImages))
            .await
        {
            Ok(o) => Ok(o.stats),
            Err(AssetError::RecordNotFound { .. }) => Ok(LifecycleStats::default()),
            Err(e) => Err(e),
        }
    }

    /// Current images for `owner_id` in an image slot; empty if none.
    pub async fn images(&self, owner_id: &str, kind: AssetKind) -> Result<Vec<AssetRef>, AssetError> {
        let key = OwnerKey::new(owner_id, kind);
        Ok(self
            .records
            .load(&key)
            .await?
            .map(|s| s.image_refs().to_vec())
            .unwrap_or_default())
    }

    // ── Account deletion ─────────────────────────────────────────────────────

    /// Delete every asset owned by a user account: resume, profile image,
    /// and the images of the given projects and blog posts.
    ///
    /// Slots that hold nothing are skipped. Every slot is attempted even if
    /// an earlier one fails; the first error is returned afterwards.
    pub async fn purge_owner(
        &self,
        user_id: &str,
        project_ids: &[String],
        blog_ids: &[String],
    ) -> Result<LifecycleStats, AssetError> {
        let mut keys = vec![
            OwnerKey::new(user_id, AssetKind::Resume),
            OwnerKey::new(user_id, AssetKind::ProfileImage),
        ];
        keys.extend(
            project_ids
                .iter()
                .map(|p| OwnerKey::new(p.as_str(), AssetKind::ProjectImages)),
        );
        keys.extend(
            blog_ids
                .iter()
                .map(|b| OwnerKey::new(b.as_str(), AssetKind::FeaturedImage)),
        );

        let mut total = LifecycleStats::default();
        let mut first_err = None;
        for key in keys {
            match self.remove_slot(key).await {
                Ok(o) => {
                    total.previous_deleted += o.stats.previous_deleted;
                    total.cleanup_failures += o.stats.cleanup_failures;
                    total.total_duration_ms += o.stats.total_duration_ms;
                }
                Err(AssetError::RecordNotFound { .. }) => {}
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        info!(
            "Purged assets of {}: {} deleted, {} left behind",
            user_id, total.previous_deleted, total.cleanup_failures
        );
        match first_err {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    // ── Shared steps ─────────────────────────────────────────────────────────

    /// Deletion-only run: clear the record, then delete what it referenced.
    async fn remove_slot(&self, key: OwnerKey) -> Result<Outcome<()>, AssetError> {
        let mut run = Run::start(&key, self.observer.as_ref());
        let result = self
            .locks
            .run(&key, async {
                let previous = self.records.swap(&key, None).await?;
                if previous.is_none() {
                    return Err(not_found(&key));
                }
                run.advance(Stage::Persisted);
                self.clean_previous(&key, previous, &[], &mut run).await;
                run.advance(Stage::Cleaned);
                Ok::<_, AssetError>(())
            })
            .await;
        run.finish(result)
    }

    /// Upload every job, at most `upload_concurrency` at a time.
    ///
    /// Results come back in job order. If any upload fails, the ones that
    /// succeeded are deleted and the first failure (in job order) returned.
    async fn upload_all(
        &self,
        key: &OwnerKey,
        jobs: Vec<UploadJob>,
        run: &mut Run<'_>,
    ) -> Result<Vec<StoredObject>, AssetError> {
        let total = jobs.len();
        let done = Arc::new(AtomicUsize::new(0));
        let timeout = self.config.upload_timeout();
        let upload_start = Instant::now();

        // Each upload owns what it touches, so the run stays `Send`.
        let mut uploads = Vec::with_capacity(total);
        for (idx, job) in jobs.into_iter().enumerate() {
            let store = Arc::clone(&self.store);
            let observer = Arc::clone(&self.observer);
            let done = Arc::clone(&done);
            let key = key.clone();
            uploads.push(async move {
                let result = bounded_call(timeout, "upload", store.put(&job.path, &job.opts)).await;
                if result.is_ok() {
                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    observer.on_asset_uploaded(&key, n, total);
                }
                (idx, result)
            });
        }
        let mut results: Vec<(usize, Result<StoredObject, AssetError>)> = stream::iter(uploads)
            .buffer_unordered(self.config.upload_concurrency)
            .collect()
            .await;
        results.sort_by_key(|(idx, _)| *idx);
        run.stats.upload_duration_ms = upload_start.elapsed().as_millis() as u64;

        let mut stored = Vec::with_capacity(total);
        let mut first_err = None;
        for (_, result) in results {
            match result {
                Ok(obj) => stored.push(obj),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_err {
            warn!(
                "{}: {} of {} uploads failed, rolling back",
                key,
                total - stored.len(),
                total
            );
            let refs: Vec<AssetRef> = stored.into_iter().map(AssetRef::from).collect();
            self.rollback(key, &refs, run).await;
            return Err(e);
        }

        run.stats.uploaded = stored.len();
        debug!("{}: uploaded {} objects", key, total);
        Ok(stored)
    }

    /// Swap the record to `next`, then release local files and delete the
    /// previous generation. `uploaded` lists the objects of `next` created by
    /// this run; they are deleted if the swap fails.
    async fn persist_and_clean(
        &self,
        key: &OwnerKey,
        next: PointerSet,
        uploaded: Vec<AssetRef>,
        run: &mut Run<'_>,
        staged: Vec<StagedFile>,
        scratch: Option<tempfile::TempDir>,
    ) -> Result<(), AssetError> {
        let keep: Vec<AssetRef> = next.assets().into_iter().map(|(a, _)| a.clone()).collect();

        let previous = match self.records.swap(key, Some(next)).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!("{}: record write failed, deleting new uploads: {}", key, e);
                self.rollback(key, &uploaded, run).await;
                return Err(e);
            }
        };
        run.advance(Stage::Persisted);

        for file in staged {
            file.remove().await;
        }
        drop(scratch);

        self.clean_previous(key, previous, &keep, run).await;
        run.advance(Stage::Cleaned);
        Ok(())
    }

    /// Delete objects uploaded by a run that is about to fail.
    async fn rollback(&self, key: &OwnerKey, uploaded: &[AssetRef], run: &mut Run<'_>) {
        if uploaded.is_empty() {
            return;
        }
        let targets = uploaded
            .iter()
            .map(|a| (a.storage_id.clone(), a.delete_attempts(ResourceKind::Image)))
            .collect();
        let (deleted, failed) = self.delete_objects(key, targets).await;
        run.stats.cleanup_failures += failed;
        info!(
            "{}: rolled back {} of {} uploads",
            key,
            deleted,
            uploaded.len()
        );
    }

    /// Best-effort delete of the previous generation, except objects still
    /// referenced by `keep`.
    async fn clean_previous(
        &self,
        key: &OwnerKey,
        previous: Option<PointerSet>,
        keep: &[AssetRef],
        run: &mut Run<'_>,
    ) {
        let Some(previous) = previous else {
            return;
        };
        let keep: HashSet<&str> = keep.iter().map(|a| a.storage_id.as_str()).collect();
        let targets: Vec<_> = previous
            .assets()
            .into_iter()
            .filter(|(a, _)| !keep.contains(a.storage_id.as_str()))
            .map(|(a, likely)| (a.storage_id.clone(), a.delete_attempts(likely)))
            .collect();
        if targets.is_empty() {
            return;
        }
        let (deleted, failed) = self.delete_objects(key, targets).await;
        run.stats.previous_deleted += deleted;
        run.stats.cleanup_failures += failed;
    }

    /// Delete each target with the fallback policy. Returns
    /// `(deleted or already gone, failed)`.
    async fn delete_objects(
        &self,
        key: &OwnerKey,
        targets: Vec<(String, [ResourceKind; 2])>,
    ) -> (usize, usize) {
        let timeout = self.config.upload_timeout();
        let mut deletes = Vec::with_capacity(targets.len());
        for (id, attempts) in targets {
            let store = Arc::clone(&self.store);
            deletes.push(async move {
                let result = delete_with_fallback(store.as_ref(), &id, &attempts, timeout).await;
                (id, result)
            });
        }
        let results: Vec<(String, Result<_, AssetError>)> = stream::iter(deletes)
            .buffer_unordered(self.config.upload_concurrency)
            .collect()
            .await;

        let mut deleted = 0;
        let mut failed = 0;
        for (id, result) in results {
            match result {
                Ok(_) => deleted += 1,
                Err(e) => {
                    warn!("{}: could not delete {}: {}", key, id, e);
                    self.observer.on_cleanup_failure(key, &id, &e.to_string());
                    failed += 1;
                }
            }
        }
        (deleted, failed)
    }
}

fn not_found(key: &OwnerKey) -> AssetError {
    AssetError::RecordNotFound {
        owner: key.owner_id.clone(),
        kind: key.kind.label(),
    }
}

fn image_prefix(kind: AssetKind) -> &'static str {
    match kind {
        AssetKind::ProfileImage => "profile",
        AssetKind::FeaturedImage => "featured",
        AssetKind::ProjectImages => "project",
        AssetKind::Resume => "resume",
    }
}

/// Storage-id stem unique to one run: `{prefix}_{owner}_{millis}_{random}`.
fn generation_id(prefix: &str, owner_id: &str) -> String {
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}_{}",
        prefix,
        sanitize_id(owner_id),
        Utc::now().timestamp_millis(),
        &nonce[..8]
    )
}
