//! Local staging: validate an incoming upload and land it on disk.
//!
//! pdfium needs a file-system path, and object-store uploads stream from
//! disk, so every upload passes through a uniquely named file in the staging
//! directory. [`StagedFile`] owns that path and deletes it on drop, so a
//! staged file cannot outlive the request on any exit path, panics included.
//! Render output goes into a [`tempfile::TempDir`] under the same directory
//! with the same guarantee.
//!
//! Validation (type, size, batch count, `%PDF` magic) runs before anything
//! is written, so a rejected upload has no side effects at all.

use crate::config::PipelineConfig;
use crate::error::AssetError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Mime types accepted for documents.
pub const DOCUMENT_MIME_TYPES: &[&str] = &["application/pdf"];

/// Mime types accepted for images.
pub const IMAGE_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
];

/// What an upload is going to become.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// A PDF to be rendered into page images.
    Document,
    /// A single image stored as-is.
    Image,
}

impl UploadKind {
    pub fn label(&self) -> &'static str {
        match self {
            UploadKind::Document => "document",
            UploadKind::Image => "image",
        }
    }

    pub fn allowed_mime_types(&self) -> &'static [&'static str] {
        match self {
            UploadKind::Document => DOCUMENT_MIME_TYPES,
            UploadKind::Image => IMAGE_MIME_TYPES,
        }
    }

    pub fn size_limit(&self, config: &PipelineConfig) -> u64 {
        match self {
            UploadKind::Document => config.max_document_bytes,
            UploadKind::Image => config.max_image_bytes,
        }
    }

    fn file_prefix(&self) -> &'static str {
        match self {
            UploadKind::Document => "resume",
            UploadKind::Image => "image",
        }
    }
}

/// A file received from a client, before staging.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    /// Client-supplied name; only used for display and the extension.
    pub file_name: String,
    /// Declared mime type.
    pub content_type: String,
    pub data: Vec<u8>,
}

impl IncomingFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    /// Read a local file, guessing its mime type from the extension.
    pub async fn from_path(path: &Path) -> Result<Self, AssetError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| AssetError::staging(path, e))?;
        let content_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self {
            file_name,
            content_type,
            data,
        })
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Mime type with parameters stripped and case folded.
    fn essence(&self) -> String {
        self.content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase()
    }
}

/// Check one upload against the type and size rules for `kind`.
pub fn validate_upload(
    file: &IncomingFile,
    kind: UploadKind,
    config: &PipelineConfig,
) -> Result<(), AssetError> {
    if file.data.is_empty() {
        return Err(AssetError::EmptyUpload);
    }

    let mime = file.essence();
    if !kind.allowed_mime_types().contains(&mime.as_str()) {
        return Err(AssetError::UnsupportedMediaType {
            mime,
            kind: kind.label(),
            allowed: kind.allowed_mime_types().join(", "),
        });
    }

    let limit = kind.size_limit(config);
    if file.size() > limit {
        return Err(AssetError::FileTooLarge {
            file_name: file.file_name.clone(),
            kind: kind.label(),
            size: file.size(),
            limit,
        });
    }

    if kind == UploadKind::Document && !file.data.starts_with(b"%PDF") {
        let mut magic = [0u8; 4];
        let n = file.data.len().min(4);
        magic[..n].copy_from_slice(&file.data[..n]);
        return Err(AssetError::DocumentCorrupt {
            path: PathBuf::from(&file.file_name),
            detail: format!("not a PDF (first bytes: {magic:?})"),
        });
    }

    Ok(())
}

/// Check an image batch: count first, then every file.
pub fn validate_batch(files: &[IncomingFile], config: &PipelineConfig) -> Result<(), AssetError> {
    if files.is_empty() {
        return Err(AssetError::EmptyUpload);
    }
    if files.len() > config.max_batch_images {
        return Err(AssetError::TooManyFiles {
            count: files.len(),
            limit: config.max_batch_images,
        });
    }
    files
        .iter()
        .try_for_each(|f| validate_upload(f, UploadKind::Image, config))
}

/// The shared on-disk holding area.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn ensure_dir(&self) -> Result<(), AssetError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AssetError::staging(&self.dir, e))
    }

    /// Validate `file` and write it to a request-unique path.
    pub async fn stage(
        &self,
        file: &IncomingFile,
        kind: UploadKind,
        config: &PipelineConfig,
    ) -> Result<StagedFile, AssetError> {
        validate_upload(file, kind, config)?;
        self.ensure_dir().await?;

        let name = format!(
            "{}-{}{}",
            kind.file_prefix(),
            uuid::Uuid::new_v4().simple(),
            extension_for(file, kind)
        );
        let path = self.dir.join(name);

        // Constructed before the write so a partial file is removed on error.
        let staged = StagedFile {
            path,
            original_name: file.file_name.clone(),
            content_type: file.essence(),
            size: file.size(),
            released: false,
        };
        tokio::fs::write(&staged.path, &file.data)
            .await
            .map_err(|e| AssetError::staging(&staged.path, e))?;

        debug!(
            "Staged {} ({} bytes) at {}",
            staged.original_name,
            staged.size,
            staged.path.display()
        );
        Ok(staged)
    }

    /// Create a fresh scratch directory for render output.
    pub async fn scratch_dir(&self) -> Result<TempDir, AssetError> {
        self.ensure_dir().await?;
        tempfile::Builder::new()
            .prefix("render-")
            .tempdir_in(&self.dir)
            .map_err(|e| AssetError::staging(&self.dir, e))
    }
}

/// Pick a short, safe extension: the client's if plain, else the kind's.
fn extension_for(file: &IncomingFile, kind: UploadKind) -> String {
    let from_name = Path::new(&file.file_name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|e| e.to_ascii_lowercase());

    match (from_name, kind) {
        (Some(ext), _) => format!(".{ext}"),
        (None, UploadKind::Document) => ".pdf".to_string(),
        (None, UploadKind::Image) => mime_guess::get_mime_extensions_str(&file.essence())
            .and_then(|exts| exts.first())
            .map(|e| format!(".{e}"))
            .unwrap_or_default(),
    }
}

/// An upload on disk. Deleted when dropped unless already released.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    original_name: String,
    content_type: String,
    size: u64,
    released: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Delete the file now, asynchronously.
    pub async fn remove(mut self) {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!("Removed staged file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged file {}: {}", self.path.display(), e),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staged file {} on drop", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged file {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf(bytes: usize) -> IncomingFile {
        let mut data = b"%PDF-1.7\n".to_vec();
        data.resize(bytes.max(data.len()), b' ');
        IncomingFile::new("cv.pdf", "application/pdf", data)
    }

    fn staging_config(dir: &Path) -> PipelineConfig {
        PipelineConfig::builder().staging_dir(dir).build().unwrap()
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn rejects_wrong_mime_for_document() {
        let f = IncomingFile::new("cv.png", "image/png", vec![1, 2, 3]);
        let err = validate_upload(&f, UploadKind::Document, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, AssetError::UnsupportedMediaType { kind: "document", .. }));
    }

    #[test]
    fn accepts_mime_with_parameters() {
        let f = IncomingFile::new("a.png", "Image/PNG; charset=binary", vec![1]);
        validate_upload(&f, UploadKind::Image, &PipelineConfig::default()).unwrap();
    }

    #[test]
    fn rejects_oversized_image() {
        let config = PipelineConfig::builder().max_image_bytes(4).build().unwrap();
        let f = IncomingFile::new("a.jpg", "image/jpeg", vec![0; 5]);
        let err = validate_upload(&f, UploadKind::Image, &config).unwrap_err();
        assert!(matches!(err, AssetError::FileTooLarge { size: 5, limit: 4, .. }));
    }

    #[test]
    fn rejects_pdf_without_magic() {
        let f = IncomingFile::new("cv.pdf", "application/pdf", b"<html>".to_vec());
        let err = validate_upload(&f, UploadKind::Document, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, AssetError::DocumentCorrupt { .. }));
    }

    #[test]
    fn rejects_empty_upload() {
        let f = IncomingFile::new("cv.pdf", "application/pdf", Vec::new());
        let err = validate_upload(&f, UploadKind::Document, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, AssetError::EmptyUpload));
    }

    #[test]
    fn batch_limit_checked_before_files() {
        let files: Vec<_> = (0..11)
            .map(|i| IncomingFile::new(format!("{i}.txt"), "text/plain", vec![1]))
            .collect();
        let err = validate_batch(&files, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, AssetError::TooManyFiles { count: 11, limit: 10 }));
    }

    #[tokio::test]
    async fn staged_file_is_removed_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("staging");
        let config = staging_config(&dir);
        let area = StagingArea::new(&dir);

        let staged = area.stage(&pdf(64), UploadKind::Document, &config).await.unwrap();
        let path = staged.path().to_path_buf();
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "pdf");
        drop(staged);
        assert!(!path.exists());
        assert_eq!(entries(&dir), 0);
    }

    #[tokio::test]
    async fn explicit_remove_deletes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = staging_config(tmp.path());
        let area = StagingArea::new(tmp.path());

        let staged = area.stage(&pdf(16), UploadKind::Document, &config).await.unwrap();
        let path = staged.path().to_path_buf();
        staged.remove().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn concurrent_stages_get_distinct_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let config = staging_config(tmp.path());
        let area = StagingArea::new(tmp.path());
        let file = pdf(16);

        let (a, b) = tokio::join!(
            area.stage(&file, UploadKind::Document, &config),
            area.stage(&file, UploadKind::Document, &config)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn rejected_upload_creates_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("never-created");
        let config = staging_config(&dir);
        let area = StagingArea::new(&dir);

        let bad = IncomingFile::new("x.exe", "application/x-msdownload", vec![1]);
        assert!(area.stage(&bad, UploadKind::Image, &config).await.is_err());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn scratch_dir_is_cleaned_on_drop() {
        let tmp = tempfile::tempdir().unwrap();
        let area = StagingArea::new(tmp.path());
        let scratch = area.scratch_dir().await.unwrap();
        let p = scratch.path().to_path_buf();
        std::fs::write(p.join("page-1.jpg"), b"x").unwrap();
        drop(scratch);
        assert!(!p.exists());
        assert_eq!(entries(tmp.path()), 0);
    }

    #[test]
    fn extension_falls_back_to_mime() {
        let f = IncomingFile::new("photo", "image/png", vec![1]);
        assert_eq!(extension_for(&f, UploadKind::Image), ".png");
        let weird = IncomingFile::new("cv.p d f", "application/pdf", vec![1]);
        assert_eq!(extension_for(&weird, UploadKind::Document), ".pdf");
    }
}
