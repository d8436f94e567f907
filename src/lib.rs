//! # portfolio-assets
//!
//! Resume rendering and binary-asset lifecycle management for a portfolio
//! site.
//!
//! ## Why this crate?
//!
//! A portfolio page shows an uploaded resume as a strip of page images, plus
//! profile pictures, blog featured images and project galleries, all served
//! from a remote object store. The hard part is not the upload itself but
//! keeping the owning records and the store in step: replacing a resume must
//! never leave the record pointing at deleted objects, and must not leak the
//! previous generation into the store forever. This crate owns that
//! sequencing.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Stage    validate type/size/magic, write to a request-unique file
//!  ├─ 2. Render   PDF pages → page-N.jpg via pdfium (spawn_blocking, deadline)
//!  ├─ 3. Upload   document + pages to the object store (bounded concurrency)
//!  ├─ 4. Persist  swap the owner's pointer set in one write
//!  └─ 5. Clean    delete the previous generation, remove local files
//! ```
//!
//! Any failure before step 4 deletes what this run uploaded; the owner's
//! record is untouched. See [`coordinator`] for the full ordering rules.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use portfolio_assets::{
//!     build_store, AssetCoordinator, IncomingFile, JsonRecordStore, PdfiumRenderer,
//!     PipelineConfig, StorageSettings,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     // Fails fast when credentials are missing.
//!     let settings = StorageSettings::from_env()?;
//!
//!     let coordinator = AssetCoordinator::new(
//!         config.clone(),
//!         Arc::new(PdfiumRenderer::new(&config)),
//!         build_store(&settings, &config)?,
//!         Arc::new(JsonRecordStore::new("./data")),
//!         settings.folders.clone(),
//!     );
//!
//!     let file = IncomingFile::from_path("resume.pdf".as_ref()).await?;
//!     let out = coordinator.replace_resume("user-42", file).await?;
//!     println!("{} pages: {:?}", out.value.page_count, out.value.page_image_urls());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `portfolio-assets` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! portfolio-assets = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod api;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod progress;
pub mod records;
pub mod storage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    CloudinaryCredentials, FolderLayout, PipelineConfig, PipelineConfigBuilder,
    SignatureAlgorithm, StorageBackend, StorageSettings,
};
pub use coordinator::AssetCoordinator;
pub use error::{AssetError, ErrorClass};
pub use model::{
    AssetKind, AssetRef, LifecycleStats, OwnerKey, Outcome, PointerSet, ResourceKind,
    ResumeRecord, StoredObject,
};
pub use pipeline::deadline::{run_until_stopped, run_with_deadline, CancelFlag, DeadlineOutcome};
pub use pipeline::render::{
    inspect_document, DocumentInfo, DocumentRenderer, PdfiumRenderer, RenderedDocument,
};
pub use pipeline::staging::{IncomingFile, StagedFile, StagingArea, UploadKind};
pub use progress::{LifecycleObserver, NoopObserver, SharedObserver, Stage};
pub use records::{AssetRecordStore, JsonRecordStore, MemoryRecordStore};
pub use storage::memory::MemoryObjectStore;
pub use storage::{build_store, delete_with_fallback, DeleteOutcome, ObjectStore, PutOptions};
