//! Error types for the portfolio-assets library.
//!
//! Every failure the asset pipeline can produce is an [`AssetError`]. Each
//! variant belongs to one [`ErrorClass`], which is what a request handler
//! needs to decide between "fix your input" and "try again later":
//!
//! * [`ErrorClass::UserFixable`] — bad size/type, unreadable PDF. Resubmitting
//!   the same file will fail the same way.
//! * [`ErrorClass::Retryable`] — render timeout, remote store down, record
//!   write failed. The same request may succeed later.
//! * [`ErrorClass::NotFound`] — the owner has nothing stored for that slot.
//!
//! [`AssetError::AssetNotFound`] is special: the coordinator swallows it when
//! deleting, because an already-gone remote object is the desired end state.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the portfolio-assets library.
#[derive(Debug, Error)]
pub enum AssetError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// Declared mime type is not allowed for the target upload kind.
    #[error("Unsupported media type '{mime}' for {kind} upload (allowed: {allowed})")]
    UnsupportedMediaType {
        mime: String,
        kind: &'static str,
        allowed: String,
    },

    /// Upload exceeds the per-file size limit.
    #[error("File '{file_name}' is {size} bytes; the {kind} limit is {limit} bytes")]
    FileTooLarge {
        file_name: String,
        kind: &'static str,
        size: u64,
        limit: u64,
    },

    /// Batch upload contains more files than allowed.
    #[error("Too many files: {count} submitted, at most {limit} per batch")]
    TooManyFiles { count: usize, limit: usize },

    /// No file was supplied, or the file is zero bytes.
    #[error("No file uploaded")]
    EmptyUpload,

    // ── Document errors ───────────────────────────────────────────────────
    /// PDF is unreadable, not a PDF, or has zero pages.
    #[error("Document '{path}' is corrupt: {detail}")]
    DocumentCorrupt { path: PathBuf, detail: String },

    /// Encrypted PDFs are not supported.
    #[error("Document '{path}' is password-protected; encrypted PDFs are not supported")]
    PasswordProtected { path: PathBuf },

    /// Rendering did not finish before the deadline.
    #[error("Document conversion exceeded {secs}s and was cancelled")]
    ConversionTimeout { secs: u64 },

    // ── Storage errors ────────────────────────────────────────────────────
    /// Remote store unreachable, timed out, or rejected the request.
    #[error("Object storage unavailable during {operation}: {detail}")]
    StorageUnavailable {
        operation: &'static str,
        detail: String,
    },

    /// Delete target does not exist in the remote store.
    #[error("Stored asset '{storage_id}' not found")]
    AssetNotFound { storage_id: String },

    // ── Record errors ─────────────────────────────────────────────────────
    /// Writing the owner's pointer set failed after uploads succeeded.
    #[error("Failed to persist asset record for {owner}: {detail}")]
    RecordPersistFailure { owner: String, detail: String },

    /// The owner has no record for the requested slot.
    #[error("No {kind} found for {owner}")]
    RecordNotFound { owner: String, kind: &'static str },

    // ── Local I/O ─────────────────────────────────────────────────────────
    /// Staging or scratch directory I/O failed.
    #[error("Staging I/O failed at '{path}': {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A required environment variable is absent or empty.
    #[error("Missing required environment variable {name}\n{hint}")]
    MissingEnv { name: &'static str, hint: String },

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install libpdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used to pick a status code and message tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The caller must change the input.
    UserFixable,
    /// The same request may succeed later.
    Retryable,
    /// Nothing stored for that owner and slot.
    NotFound,
}

impl AssetError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AssetError::UnsupportedMediaType { .. }
            | AssetError::FileTooLarge { .. }
            | AssetError::TooManyFiles { .. }
            | AssetError::EmptyUpload
            | AssetError::DocumentCorrupt { .. }
            | AssetError::PasswordProtected { .. } => ErrorClass::UserFixable,
            AssetError::AssetNotFound { .. } | AssetError::RecordNotFound { .. } => {
                ErrorClass::NotFound
            }
            AssetError::ConversionTimeout { .. }
            | AssetError::StorageUnavailable { .. }
            | AssetError::RecordPersistFailure { .. }
            | AssetError::Staging { .. }
            | AssetError::InvalidConfig(_)
            | AssetError::MissingEnv { .. }
            | AssetError::PdfiumBindingFailed(_)
            | AssetError::Internal(_) => ErrorClass::Retryable,
        }
    }

    /// HTTP status a request handler should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            AssetError::UnsupportedMediaType { .. } => 415,
            AssetError::FileTooLarge { .. } => 413,
            AssetError::TooManyFiles { .. }
            | AssetError::EmptyUpload
            | AssetError::DocumentCorrupt { .. }
            | AssetError::PasswordProtected { .. } => 400,
            AssetError::AssetNotFound { .. } | AssetError::RecordNotFound { .. } => 404,
            AssetError::ConversionTimeout { .. } => 504,
            AssetError::StorageUnavailable { .. } => 503,
            AssetError::RecordPersistFailure { .. }
            | AssetError::Staging { .. }
            | AssetError::InvalidConfig(_)
            | AssetError::MissingEnv { .. }
            | AssetError::PdfiumBindingFailed(_)
            | AssetError::Internal(_) => 500,
        }
    }

    /// Short, client-safe sentence. Never includes paths or provider detail.
    pub fn user_message(&self) -> String {
        match self {
            AssetError::UnsupportedMediaType { kind, .. } => match *kind {
                "document" => "Only PDF files are allowed".to_string(),
                _ => "Only image files (JPEG, PNG, GIF, WebP) are allowed".to_string(),
            },
            AssetError::FileTooLarge { .. } => "File too large".to_string(),
            AssetError::TooManyFiles { .. } => "Too many files".to_string(),
            AssetError::EmptyUpload => "No file uploaded".to_string(),
            AssetError::DocumentCorrupt { .. } => {
                "PDF processing failed. Please ensure the file is a valid PDF.".to_string()
            }
            AssetError::PasswordProtected { .. } => {
                "Password-protected PDFs are not supported. Please upload an unlocked copy."
                    .to_string()
            }
            AssetError::ConversionTimeout { .. } => {
                "PDF processing timeout. Please try with a smaller file.".to_string()
            }
            AssetError::StorageUnavailable { .. } => {
                "File storage is temporarily unavailable. Please try again later.".to_string()
            }
            AssetError::AssetNotFound { .. } => "File not found".to_string(),
            AssetError::RecordNotFound { kind, .. } => format!("No {kind} found"),
            AssetError::RecordPersistFailure { .. }
            | AssetError::Staging { .. }
            | AssetError::InvalidConfig(_)
            | AssetError::MissingEnv { .. }
            | AssetError::PdfiumBindingFailed(_)
            | AssetError::Internal(_) => {
                "Something went wrong on our side. Please try again later.".to_string()
            }
        }
    }

    pub(crate) fn staging(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AssetError::Staging {
            path: path.into(),
            source,
        }
    }
}
