//! Local processing stages that run before anything reaches remote storage.
//!
//! ## Data Flow
//!
//! ```text
//! staging ──▶ render
//! (disk)      (pdfium, under deadline)
//! ```
//!
//! 1. [`staging`]  — validate an upload and give it a request-unique path;
//!    the file is removed when its guard drops
//! 2. [`render`]   — rasterise every page to `page-N.jpg`; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`deadline`] — tagged-outcome timeouts shared by rendering and every
//!    remote call

pub mod deadline;
pub mod render;
pub mod staging;
