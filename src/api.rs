//! JSON shapes returned to HTTP clients.
//!
//! No routing lives here, only the envelope: a success body is
//! `{ "<entity>": {...}, "message": "..." }` and a failure body is
//! `{ "message": "..." }` with the status from [`AssetError::status_code`].
//! Field names match what existing front-end clients read, including the
//! duplicated aliases (`pdfUrl`/`originalUrl`, `imageUrls`/`images`).

use crate::error::AssetError;
use crate::model::{AssetKind, AssetRef, ResumeRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Multipart field carrying a resume PDF.
pub const FIELD_RESUME: &str = "resume";
/// Multipart field carrying a single image (profile picture).
pub const FIELD_IMAGE: &str = "image";
/// Multipart field carrying a project's image batch.
pub const FIELD_IMAGES: &str = "images";
/// Multipart field carrying a blog post's featured image.
pub const FIELD_FEATURED_IMAGE: &str = "featuredImage";

/// The multipart field an upload for `kind` arrives under.
pub fn upload_field(kind: AssetKind) -> &'static str {
    match kind {
        AssetKind::Resume => FIELD_RESUME,
        AssetKind::ProfileImage => FIELD_IMAGE,
        AssetKind::FeaturedImage => FIELD_FEATURED_IMAGE,
        AssetKind::ProjectImages => FIELD_IMAGES,
    }
}

/// Client view of a resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeView {
    pub original_name: String,
    pub original_file_name: String,
    pub document_url: String,
    pub pdf_url: String,
    pub original_url: String,
    pub page_image_urls: Vec<String>,
    pub image_urls: Vec<String>,
    pub images: Vec<String>,
    pub page_count: usize,
    pub file_size: u64,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&ResumeRecord> for ResumeView {
    fn from(r: &ResumeRecord) -> Self {
        let urls = r.page_image_urls();
        Self {
            original_name: r.original_file_name.clone(),
            original_file_name: r.original_file_name.clone(),
            document_url: r.document_url().to_string(),
            pdf_url: r.document_url().to_string(),
            original_url: r.document_url().to_string(),
            page_image_urls: urls.clone(),
            image_urls: urls.clone(),
            images: urls,
            page_count: r.page_count,
            file_size: r.file_size,
            uploaded_at: r.uploaded_at,
        }
    }
}

/// A success body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    /// HTTP status to send with the body.
    #[serde(skip)]
    pub status: u16,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    pub message: String,
}

impl ApiResponse {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            payload: Map::new(),
            message: message.into(),
        }
    }

    /// Attach an entity under `field`.
    pub fn with(mut self, field: &str, value: Value) -> Self {
        self.payload.insert(field.to_string(), value);
        self
    }

    pub fn resume_uploaded(record: &ResumeRecord) -> Self {
        Self::new(201, "Resume uploaded successfully")
            .with("resume", json!(ResumeView::from(record)))
    }

    pub fn resume(record: &ResumeRecord) -> Self {
        Self::new(200, "Resume retrieved successfully")
            .with("resume", json!(ResumeView::from(record)))
    }

    pub fn resume_deleted() -> Self {
        Self::new(200, "Resume deleted successfully")
    }

    pub fn profile_image(user_id: &str, image: &AssetRef) -> Self {
        Self::new(200, "Profile image updated successfully")
            .with("user", json!({ "id": user_id, "profileImage": image }))
    }

    pub fn featured_image(blog_id: &str, image: &AssetRef) -> Self {
        Self::new(200, "Featured image updated successfully")
            .with("blog", json!({ "id": blog_id, "featuredImage": image }))
    }

    pub fn project_images(project_id: &str, images: &[AssetRef]) -> Self {
        Self::new(200, "Project images updated successfully")
            .with("project", json!({ "id": project_id, "images": images }))
    }

    pub fn removed(kind: AssetKind) -> Self {
        let message = match kind {
            AssetKind::Resume => "Resume deleted successfully",
            AssetKind::ProfileImage => "Profile image removed successfully",
            AssetKind::FeaturedImage => "Featured image removed successfully",
            AssetKind::ProjectImages => "Project images deleted successfully",
        };
        Self::new(200, message)
    }
}

/// A failure body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

impl From<&AssetError> for ErrorBody {
    fn from(e: &AssetError) -> Self {
        Self {
            message: e.user_message(),
        }
    }
}

/// Status code and body for a failed operation.
pub fn error_response(e: &AssetError) -> (u16, ErrorBody) {
    (e.status_code(), ErrorBody::from(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceKind;

    fn asset(id: &str, kind: ResourceKind) -> AssetRef {
        AssetRef {
            url: format!("https://cdn.test/{id}"),
            caption: None,
            storage_id: id.to_string(),
            resource_kind: Some(kind),
        }
    }

    fn record() -> ResumeRecord {
        ResumeRecord {
            owner_id: "u1".into(),
            original_file_name: "cv.pdf".into(),
            file_size: 2048,
            page_count: 2,
            document: asset("doc", ResourceKind::Raw),
            pages: vec![asset("p1", ResourceKind::Image), asset("p2", ResourceKind::Image)],
            uploaded_at: Utc::now(),
        }
    }

    #[test]
    fn resume_body_carries_all_aliases() {
        let resp = ApiResponse::resume_uploaded(&record());
        assert_eq!(resp.status, 201);

        let body = serde_json::to_value(&resp).unwrap();
        assert_eq!(body["message"], "Resume uploaded successfully");
        let r = &body["resume"];
        assert_eq!(r["documentUrl"], "https://cdn.test/doc");
        assert_eq!(r["pdfUrl"], r["documentUrl"]);
        assert_eq!(r["pageCount"], 2);
        assert_eq!(r["pageImageUrls"][1], "https://cdn.test/p2");
        assert_eq!(r["imageUrls"], r["pageImageUrls"]);
        assert!(body.get("status").is_none());
    }

    #[test]
    fn project_body_lists_images() {
        let images = vec![asset("a", ResourceKind::Image)];
        let body = serde_json::to_value(ApiResponse::project_images("p9", &images)).unwrap();
        assert_eq!(body["project"]["id"], "p9");
        assert_eq!(body["project"]["images"][0]["storageId"], "a");
    }

    #[test]
    fn errors_map_to_status_and_short_message() {
        let err = AssetError::RecordNotFound {
            owner: "u1".into(),
            kind: "resume",
        };
        let (status, body) = error_response(&err);
        assert_eq!(status, 404);
        assert_eq!(body.message, "No resume found");
    }

    #[test]
    fn upload_fields_match_clients() {
        assert_eq!(upload_field(AssetKind::Resume), "resume");
        assert_eq!(upload_field(AssetKind::FeaturedImage), "featuredImage");
        assert_eq!(upload_field(AssetKind::ProjectImages), "images");
    }
}
