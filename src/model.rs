//! Domain types: owners, pointer sets, and the records that hold them.
//!
//! A *pointer set* is everything an owning record references in remote
//! storage for one slot. Replacing a slot swaps the whole set at once; the
//! types here are values, never patched in place, so a record can only ever
//! hold one complete generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which asset slot on an owner a pointer set fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetKind {
    /// A user's resume: original PDF plus one image per page.
    Resume,
    /// A user's profile picture.
    ProfileImage,
    /// A blog post's featured image.
    FeaturedImage,
    /// The image gallery of a project.
    ProjectImages,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Resume => "resume",
            AssetKind::ProfileImage => "profile-image",
            AssetKind::FeaturedImage => "featured-image",
            AssetKind::ProjectImages => "project-images",
        }
    }

    /// Human label used in not-found messages.
    pub fn label(&self) -> &'static str {
        match self {
            AssetKind::Resume => "resume",
            AssetKind::ProfileImage => "profile image",
            AssetKind::FeaturedImage => "featured image",
            AssetKind::ProjectImages => "project images",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owner identity plus slot. The unit of serialization for replace operations.
///
/// `owner_id` is the user id for resume and profile images, the blog id for
/// featured images, and the project id for project images.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerKey {
    pub owner_id: String,
    pub kind: AssetKind,
}

impl OwnerKey {
    pub fn new(owner_id: impl Into<String>, kind: AssetKind) -> Self {
        Self {
            owner_id: owner_id.into(),
            kind,
        }
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.kind)
    }
}

/// Delivery class in the remote store.
///
/// Documents go up as `Raw` so they download byte-for-byte; images go up as
/// `Image` so the provider may optimise them. Delete calls must name the
/// same kind the object was uploaded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Raw,
    Image,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Raw => "raw",
            ResourceKind::Image => "image",
        }
    }

    /// The other kind; used as the second delete attempt.
    pub fn alternate(&self) -> Self {
        match self {
            ResourceKind::Raw => ResourceKind::Image,
            ResourceKind::Image => ResourceKind::Raw,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an object store hands back after a successful `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub url: String,
    pub storage_id: String,
    pub resource_kind: ResourceKind,
}

/// A reference from an owning record to one remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub storage_id: String,
    /// Kind used at upload time. `None` for records written before the kind
    /// was tracked; deletes then fall back across both kinds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_kind: Option<ResourceKind>,
}

impl AssetRef {
    pub fn from_stored(obj: StoredObject) -> Self {
        Self {
            url: obj.url,
            caption: None,
            storage_id: obj.storage_id,
            resource_kind: Some(obj.resource_kind),
        }
    }

    /// Ordered delete attempts: recorded kind (or `likely`) first, then the other.
    pub fn delete_attempts(&self, likely: ResourceKind) -> [ResourceKind; 2] {
        let primary = self.resource_kind.unwrap_or(likely);
        [primary, primary.alternate()]
    }
}

impl From<StoredObject> for AssetRef {
    fn from(obj: StoredObject) -> Self {
        AssetRef::from_stored(obj)
    }
}

/// One user's resume: original PDF plus ordered page images.
///
/// `pages[i]` is page `i + 1`; `pages.len() == page_count` always holds for
/// records produced by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    pub owner_id: String,
    pub original_file_name: String,
    pub file_size: u64,
    pub page_count: usize,
    pub document: AssetRef,
    pub pages: Vec<AssetRef>,
    pub uploaded_at: DateTime<Utc>,
}

impl ResumeRecord {
    pub fn document_url(&self) -> &str {
        &self.document.url
    }

    pub fn storage_id(&self) -> &str {
        &self.document.storage_id
    }

    pub fn page_image_urls(&self) -> Vec<String> {
        self.pages.iter().map(|p| p.url.clone()).collect()
    }
}

/// The complete set of remote references held for one [`OwnerKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PointerSet {
    Resume(ResumeRecord),
    Images { images: Vec<AssetRef> },
}

impl PointerSet {
    pub fn images(images: Vec<AssetRef>) -> Self {
        PointerSet::Images { images }
    }

    /// Every remote object this set references, with the kind to try first
    /// when deleting it.
    pub fn assets(&self) -> Vec<(&AssetRef, ResourceKind)> {
        match self {
            PointerSet::Resume(r) => std::iter::once((&r.document, ResourceKind::Raw))
                .chain(r.pages.iter().map(|p| (p, ResourceKind::Image)))
                .collect(),
            PointerSet::Images { images } => {
                images.iter().map(|i| (i, ResourceKind::Image)).collect()
            }
        }
    }

    pub fn as_resume(&self) -> Option<&ResumeRecord> {
        match self {
            PointerSet::Resume(r) => Some(r),
            PointerSet::Images { .. } => None,
        }
    }

    pub fn image_refs(&self) -> &[AssetRef] {
        match self {
            PointerSet::Images { images } => images,
            PointerSet::Resume(_) => &[],
        }
    }
}

/// Timing and counters for one coordinator run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleStats {
    pub render_duration_ms: u64,
    pub upload_duration_ms: u64,
    pub total_duration_ms: u64,
    /// Remote objects written by this run.
    pub uploaded: usize,
    /// Previous-generation objects removed (or already gone).
    pub previous_deleted: usize,
    /// Previous-generation objects whose delete failed and were left behind.
    pub cleanup_failures: usize,
}

/// Result of a coordinator operation plus its stats.
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub value: T,
    pub stats: LifecycleStats,
}
