//! PDF rasterisation: render every page of a document to a JPEG file.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so
//! Tokio worker threads keep serving other requests during a render.
//!
//! A blocking task cannot be aborted from outside, so the render loop checks
//! a [`CancelFlag`] between pages; when the caller's deadline fires the task
//! stops at the next page boundary. Output goes to a caller-owned directory
//! that the caller removes regardless of outcome.
//!
//! ## Output contract
//!
//! Page `n` (1-based) is written to `page-{n}.jpg`, and
//! [`RenderedDocument::page_paths`] lists them in page order. Consumers map
//! `page_paths[i]` to `pageImageUrls[i]`, so this order is load-bearing.

use crate::config::PipelineConfig;
use crate::error::AssetError;
use crate::pipeline::deadline::CancelFlag;
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the image file for a 1-based page number.
pub fn page_file_name(page: usize) -> String {
    format!("page-{page}.jpg")
}

/// Pages written by a successful render, in page order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub page_count: usize,
    pub page_paths: Vec<PathBuf>,
}

/// Basic facts about a PDF, read without rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub page_count: usize,
    pub title: Option<String>,
    pub author: Option<String>,
    pub producer: Option<String>,
    pub pdf_version: String,
}

/// Converts a PDF into one raster image per page.
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// Render all pages of `pdf_path` into `out_dir`.
    ///
    /// Fails with [`AssetError::DocumentCorrupt`] for unreadable or zero-page
    /// documents and [`AssetError::PasswordProtected`] for encrypted ones.
    /// Implementations should stop early once `cancel` is raised.
    async fn render(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
        cancel: CancelFlag,
    ) -> Result<RenderedDocument, AssetError>;
}

/// [`DocumentRenderer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    lib_path: Option<PathBuf>,
    max_rendered_pixels: u32,
    jpeg_quality: u8,
}

impl PdfiumRenderer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            lib_path: config.pdfium_lib_path.clone(),
            max_rendered_pixels: config.max_rendered_pixels,
            jpeg_quality: config.jpeg_quality,
        }
    }

    /// Check that a pdfium library can be bound. Call at startup.
    pub fn check_binding(&self) -> Result<(), AssetError> {
        bind_pdfium(self.lib_path.as_deref()).map(|_| ())
    }
}

#[async_trait]
impl DocumentRenderer for PdfiumRenderer {
    async fn render(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
        cancel: CancelFlag,
    ) -> Result<RenderedDocument, AssetError> {
        let pdf = pdf_path.to_path_buf();
        let out = out_dir.to_path_buf();
        let this = self.clone();

        tokio::task::spawn_blocking(move || this.render_blocking(&pdf, &out, &cancel))
            .await
            .map_err(|e| AssetError::Internal(format!("Render task panicked: {}", e)))?
    }
}

impl PdfiumRenderer {
    /// Blocking implementation of page rendering.
    fn render_blocking(
        &self,
        pdf_path: &Path,
        out_dir: &Path,
        cancel: &CancelFlag,
    ) -> Result<RenderedDocument, AssetError> {
        let pdfium = bind_pdfium(self.lib_path.as_deref())?;
        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| classify_load_error(pdf_path, e))?;

        let pages = document.pages();
        let page_count = pages.len() as usize;
        if page_count == 0 {
            return Err(AssetError::DocumentCorrupt {
                path: pdf_path.to_path_buf(),
                detail: "document has no pages".into(),
            });
        }
        info!("PDF loaded: {} pages", page_count);

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32);

        let mut page_paths = Vec::with_capacity(page_count);
        for (idx, page) in pages.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(AssetError::Internal(format!(
                    "render of {} cancelled after {} pages",
                    pdf_path.display(),
                    idx
                )));
            }

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                AssetError::DocumentCorrupt {
                    path: pdf_path.to_path_buf(),
                    detail: format!("page {}: {:?}", idx + 1, e),
                }
            })?;

            let image = bitmap.as_image();
            let path = out_dir.join(page_file_name(idx + 1));
            write_jpeg(&image, &path, self.jpeg_quality)?;
            debug!(
                "Rendered page {} → {}x{} px at {}",
                idx + 1,
                image.width(),
                image.height(),
                path.display()
            );
            page_paths.push(path);
        }

        Ok(RenderedDocument {
            page_count,
            page_paths,
        })
    }
}

/// Bind pdfium: explicit path, then `PDFIUM_LIB_PATH`, then the working
/// directory, then the system library path.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, AssetError> {
    let env_path = std::env::var("PDFIUM_LIB_PATH")
        .ok()
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);

    let bindings = match lib_path.map(Path::to_path_buf).or(env_path) {
        Some(path) => Pdfium::bind_to_library(&path),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| AssetError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

fn classify_load_error(pdf_path: &Path, e: PdfiumError) -> AssetError {
    let err_str = format!("{:?}", e);
    if err_str.contains("Password") || err_str.contains("password") {
        AssetError::PasswordProtected {
            path: pdf_path.to_path_buf(),
        }
    } else {
        AssetError::DocumentCorrupt {
            path: pdf_path.to_path_buf(),
            detail: err_str,
        }
    }
}

fn write_jpeg(image: &DynamicImage, path: &Path, quality: u8) -> Result<(), AssetError> {
    let file = std::fs::File::create(path).map_err(|e| AssetError::staging(path, e))?;
    let mut writer = BufWriter::new(file);
    // JPEG has no alpha channel; flatten first.
    DynamicImage::ImageRgb8(image.to_rgb8())
        .write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))
        .map_err(|e| AssetError::Internal(format!("JPEG encoding failed: {}", e)))?;
    writer.flush().map_err(|e| AssetError::staging(path, e))
}

/// Read page count and metadata from a PDF without rendering pages.
pub async fn inspect_document(
    pdf_path: &Path,
    lib_path: Option<&Path>,
) -> Result<DocumentInfo, AssetError> {
    let path = pdf_path.to_path_buf();
    let lib = lib_path.map(Path::to_path_buf);

    tokio::task::spawn_blocking(move || inspect_blocking(&path, lib.as_deref()))
        .await
        .map_err(|e| AssetError::Internal(format!("Inspect task panicked: {}", e)))?
}

/// Blocking implementation of document inspection.
fn inspect_blocking(pdf_path: &Path, lib_path: Option<&Path>) -> Result<DocumentInfo, AssetError> {
    let pdfium = bind_pdfium(lib_path)?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| classify_load_error(pdf_path, e))?;

    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    Ok(DocumentInfo {
        page_count: document.pages().len() as usize,
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        pdf_version: format!("{:?}", document.version()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn page_files_are_one_based() {
        assert_eq!(page_file_name(1), "page-1.jpg");
        assert_eq!(page_file_name(12), "page-12.jpg");
    }

    #[test]
    fn write_jpeg_flattens_alpha() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(page_file_name(1));
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 128])));
        write_jpeg(&img, &path, 90).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8], "JPEG SOI marker");
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
    }

    #[test]
    fn renderer_takes_limits_from_config() {
        let config = PipelineConfig::builder()
            .max_rendered_pixels(1200)
            .jpeg_quality(80)
            .build()
            .unwrap();
        let r = PdfiumRenderer::new(&config);
        assert_eq!(r.max_rendered_pixels, 1200);
        assert_eq!(r.jpeg_quality, 80);
    }
}
