//! Configuration types for the asset pipeline.
//!
//! Two structs, two lifetimes:
//!
//! * [`PipelineConfig`] — limits and tuning knobs (size caps, timeouts,
//!   render quality, concurrency). Built with [`PipelineConfigBuilder`];
//!   every field has a default suited to a typical deployment.
//! * [`StorageSettings`] — where assets go and the credentials to get
//!   them there. Read once from the environment at startup via
//!   [`StorageSettings::from_env`]; a missing variable is an error *then*,
//!   not a 500 on the first upload.

use crate::error::AssetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Limits and tuning for the asset pipeline.
///
/// # Example
/// ```rust
/// use portfolio_assets::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .render_timeout_secs(20)
///     .upload_concurrency(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_document_bytes, 10 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory for staged uploads and render scratch space. Created lazily.
    /// Default: `$TMPDIR/portfolio-assets`.
    pub staging_dir: PathBuf,

    /// Largest accepted PDF in bytes. Default: 10 MiB.
    pub max_document_bytes: u64,

    /// Largest accepted image in bytes, per file. Default: 5 MiB.
    pub max_image_bytes: u64,

    /// Most images accepted in one project batch. Default: 10.
    pub max_batch_images: usize,

    /// Longest edge of a rendered page image in pixels. Default: 2000.
    ///
    /// Caps memory regardless of physical page size; an A0 page rendered by
    /// DPI alone would allocate hundreds of megabytes.
    pub max_rendered_pixels: u32,

    /// JPEG quality for page images, 1–100. Default: 100.
    pub jpeg_quality: u8,

    /// Upper bound on the whole render step in seconds. Default: 30.
    pub render_timeout_secs: u64,

    /// Upper bound on each individual upload or delete call. Default: 60.
    pub upload_timeout_secs: u64,

    /// Concurrent uploads within one batch. Default: 4.
    pub upload_concurrency: usize,

    /// Explicit pdfium library path. If None, `PDFIUM_LIB_PATH`, then the
    /// working directory, then the system library search path are tried.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir().join("portfolio-assets"),
            max_document_bytes: 10 * MIB,
            max_image_bytes: 5 * MIB,
            max_batch_images: 10,
            max_rendered_pixels: 2000,
            jpeg_quality: 100,
            render_timeout_secs: 30,
            upload_timeout_secs: 60,
            upload_concurrency: 4,
            pdfium_lib_path: None,
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.staging_dir = dir.into();
        self
    }

    pub fn max_document_bytes(mut self, n: u64) -> Self {
        self.config.max_document_bytes = n;
        self
    }

    pub fn max_image_bytes(mut self, n: u64) -> Self {
        self.config.max_image_bytes = n;
        self
    }

    pub fn max_batch_images(mut self, n: usize) -> Self {
        self.config.max_batch_images = n;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q;
        self
    }

    pub fn render_timeout_secs(mut self, secs: u64) -> Self {
        self.config.render_timeout_secs = secs;
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs;
        self
    }

    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.config.upload_concurrency = n.max(1);
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, AssetError> {
        let c = &self.config;
        if c.jpeg_quality == 0 || c.jpeg_quality > 100 {
            return Err(AssetError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if c.render_timeout_secs == 0 || c.upload_timeout_secs == 0 {
            return Err(AssetError::InvalidConfig(
                "Timeouts must be at least 1 second".into(),
            ));
        }
        if c.max_document_bytes == 0 || c.max_image_bytes == 0 {
            return Err(AssetError::InvalidConfig("Size limits must be > 0".into()));
        }
        if c.max_batch_images == 0 {
            return Err(AssetError::InvalidConfig(
                "Batch image limit must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Storage settings ─────────────────────────────────────────────────────

/// Folder namespaces inside the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderLayout {
    pub prefix: String,
}

impl Default for FolderLayout {
    fn default() -> Self {
        Self {
            prefix: "portfolio-cms".to_string(),
        }
    }
}

impl FolderLayout {
    /// Original resume PDFs.
    pub fn documents(&self) -> String {
        format!("{}/resumes", self.prefix)
    }

    /// Rendered resume pages.
    pub fn page_images(&self) -> String {
        format!("{}/resume-images", self.prefix)
    }

    /// Profile, blog and project images.
    pub fn images(&self) -> String {
        format!("{}/images", self.prefix)
    }
}

/// Digest used to sign Cloudinary API requests.
///
/// Accounts sign with SHA-1 unless switched to SHA-256 in their security
/// settings; the client must use the same one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl FromStr for SignatureAlgorithm {
    type Err = AssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(AssetError::InvalidConfig(format!(
                "Unknown CLOUDINARY_SIGNATURE_ALGORITHM '{other}' (expected sha1 or sha256)"
            ))),
        }
    }
}

/// Credentials for the Cloudinary upload API.
#[derive(Clone)]
pub struct CloudinaryCredentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub signature_algorithm: SignatureAlgorithm,
}

impl fmt::Debug for CloudinaryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudinaryCredentials")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("signature_algorithm", &self.signature_algorithm)
            .finish()
    }
}

/// Which object store backs the pipeline.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    Cloudinary(CloudinaryCredentials),
    /// Local directory served under `public_base_url`.
    Filesystem {
        root: PathBuf,
        public_base_url: String,
    },
}

/// Object-store location and credentials, injected from the environment.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub folders: FolderLayout,
}

impl StorageSettings {
    /// Read settings from process environment variables.
    ///
    /// | Variable | Required | Meaning |
    /// |----------|----------|---------|
    /// | `PORTFOLIO_STORAGE_BACKEND` | no | `cloudinary` (default) or `filesystem` |
    /// | `CLOUDINARY_CLOUD_NAME` / `_API_KEY` / `_API_SECRET` | cloudinary | credentials |
    /// | `CLOUDINARY_SIGNATURE_ALGORITHM` | no | `sha1` (default) or `sha256` |
    /// | `PORTFOLIO_STORAGE_DIR` | filesystem | root directory |
    /// | `PORTFOLIO_PUBLIC_BASE_URL` | filesystem | URL prefix serving that directory |
    /// | `PORTFOLIO_FOLDER_PREFIX` | no | namespace, default `portfolio-cms` |
    pub fn from_env() -> Result<Self, AssetError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AssetError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());
        let require = |name: &'static str, hint: &str| {
            get(name).ok_or_else(|| AssetError::MissingEnv {
                name,
                hint: hint.to_string(),
            })
        };

        let folders = FolderLayout {
            prefix: get("PORTFOLIO_FOLDER_PREFIX")
                .map(|p| p.trim_matches('/').to_string())
                .unwrap_or_else(|| FolderLayout::default().prefix),
        };

        let backend_name = get("PORTFOLIO_STORAGE_BACKEND")
            .unwrap_or_else(|| "cloudinary".to_string())
            .to_lowercase();

        let backend = match backend_name.as_str() {
            "cloudinary" => {
                let hint = "Cloudinary credentials are required when PORTFOLIO_STORAGE_BACKEND=cloudinary.";
                StorageBackend::Cloudinary(CloudinaryCredentials {
                    cloud_name: require("CLOUDINARY_CLOUD_NAME", hint)?,
                    api_key: require("CLOUDINARY_API_KEY", hint)?,
                    api_secret: require("CLOUDINARY_API_SECRET", hint)?,
                    signature_algorithm: get("CLOUDINARY_SIGNATURE_ALGORITHM")
                        .map(|v| v.parse::<SignatureAlgorithm>())
                        .transpose()?
                        .unwrap_or_default(),
                })
            }
            "filesystem" | "fs" => {
                let hint = "Set the storage root and the URL it is served from.";
                StorageBackend::Filesystem {
                    root: PathBuf::from(require("PORTFOLIO_STORAGE_DIR", hint)?),
                    public_base_url: require("PORTFOLIO_PUBLIC_BASE_URL", hint)?
                        .trim_end_matches('/')
                        .to_string(),
                }
            }
            other => {
                return Err(AssetError::InvalidConfig(format!(
                    "Unknown PORTFOLIO_STORAGE_BACKEND '{other}' (expected cloudinary or filesystem)"
                )))
            }
        };

        Ok(Self { backend, folders })
    }
}
