//! Cloudinary upload API client.
//!
//! Uses the signed REST endpoints directly:
//!
//! * `POST {api}/{cloud}/{resource_type}/upload` — multipart file upload.
//! * `POST {api}/{cloud}/{resource_type}/destroy` — delete by public id.
//!
//! A request is signed by sorting its parameters by name, joining them as
//! `k=v&k=v`, appending the API secret and taking the hex digest with the
//! account's [`SignatureAlgorithm`] (SHA-1 unless configured otherwise).
//! The file, `api_key` and `resource_type` are never part of the signature.

use super::{ObjectStore, PutOptions};
use crate::config::{CloudinaryCredentials, SignatureAlgorithm};
use crate::error::AssetError;
use crate::model::{ResourceKind, StoredObject};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

const DEFAULT_API_BASE: &str = "https://api.cloudinary.com/v1_1";

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

pub struct CloudinaryStore {
    client: Client,
    creds: CloudinaryCredentials,
    api_base: String,
}

impl CloudinaryStore {
    /// Build a client whose every request gives up after `timeout`.
    pub fn new(creds: CloudinaryCredentials, timeout: Duration) -> Result<Self, AssetError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AssetError::InvalidConfig(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            creds,
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Point at a different API host (proxies, test servers).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, kind: ResourceKind, action: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.api_base, self.creds.cloud_name, kind, action
        )
    }

    fn signed_params(&self, mut params: BTreeMap<&'static str, String>) -> BTreeMap<&'static str, String> {
        params.insert("timestamp", chrono::Utc::now().timestamp().to_string());
        let signature = sign(&params, &self.creds.api_secret, self.creds.signature_algorithm);
        params.insert("signature", signature);
        params.insert("api_key", self.creds.api_key.clone());
        params
    }
}

/// Signature over sorted `params` and `secret`.
pub(crate) fn sign(
    params: &BTreeMap<&'static str, String>,
    secret: &str,
    algorithm: SignatureAlgorithm,
) -> String {
    let joined = params
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    match algorithm {
        SignatureAlgorithm::Sha1 => digest::<Sha1>(&joined, secret),
        SignatureAlgorithm::Sha256 => digest::<Sha256>(&joined, secret),
    }
}

fn digest<D: Digest>(joined: &str, secret: &str) -> String {
    let mut hasher = D::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Unsigned upload parameters for `opts`.
fn upload_params(opts: &PutOptions) -> BTreeMap<&'static str, String> {
    let mut params = BTreeMap::new();
    params.insert("folder", opts.folder.clone());
    if let Some(id) = &opts.public_id {
        params.insert("public_id", id.clone());
    }
    if let Some(t) = &opts.transformation {
        params.insert("transformation", t.clone());
    }
    if let Some(f) = &opts.format {
        params.insert("format", f.clone());
    }
    if opts.resource_kind == ResourceKind::Raw {
        // Raw uploads default to authenticated delivery on some plans.
        params.insert("access_mode", "public".to_string());
        params.insert("type", "upload".to_string());
    }
    params
}

fn unavailable(operation: &'static str, detail: impl Into<String>) -> AssetError {
    AssetError::StorageUnavailable {
        operation,
        detail: detail.into(),
    }
}

fn transport_error(operation: &'static str, e: reqwest::Error) -> AssetError {
    if e.is_timeout() {
        unavailable(operation, "request timed out")
    } else {
        unavailable(operation, e.to_string())
    }
}

/// Turn a non-2xx response into an error, keeping Cloudinary's message.
async fn error_from_response(operation: &'static str, resp: reqwest::Response) -> AssetError {
    let status = resp.status();
    let message = match resp.json::<ErrorResponse>().await {
        Ok(body) => body.error.message,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    unavailable(operation, format!("HTTP {}: {}", status.as_u16(), message))
}

#[async_trait]
impl ObjectStore for CloudinaryStore {
    fn name(&self) -> &'static str {
        "cloudinary"
    }

    async fn put(&self, local_path: &Path, opts: &PutOptions) -> Result<StoredObject, AssetError> {
        let data = tokio::fs::read(local_path)
            .await
            .map_err(|e| AssetError::staging(local_path, e))?;
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let mime = mime_guess::from_path(local_path).first_or_octet_stream();

        let mut form = Form::new();
        for (k, v) in self.signed_params(upload_params(opts)) {
            form = form.text(k, v);
        }
        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str(mime.essence_str())
            .map_err(|e| unavailable("upload", e.to_string()))?;
        form = form.part("file", part);

        debug!(
            "Uploading {} to cloudinary folder {} as {}",
            local_path.display(),
            opts.folder,
            opts.resource_kind
        );
        let resp = self
            .client
            .post(self.endpoint(opts.resource_kind, "upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| transport_error("upload", e))?;

        if !resp.status().is_success() {
            return Err(error_from_response("upload", resp).await);
        }

        let body: UploadResponse = resp
            .json()
            .await
            .map_err(|e| unavailable("upload", format!("unreadable response: {}", e)))?;

        Ok(StoredObject {
            url: body.secure_url,
            storage_id: body.public_id,
            resource_kind: opts.resource_kind,
        })
    }

    async fn delete(&self, storage_id: &str, kind: ResourceKind) -> Result<(), AssetError> {
        let mut params = BTreeMap::new();
        params.insert("public_id", storage_id.to_string());
        params.insert("invalidate", "true".to_string());

        let resp = self
            .client
            .post(self.endpoint(kind, "destroy"))
            .form(&self.signed_params(params))
            .send()
            .await
            .map_err(|e| transport_error("delete", e))?;

        if !resp.status().is_success() {
            return Err(error_from_response("delete", resp).await);
        }

        let body: DestroyResponse = resp
            .json()
            .await
            .map_err(|e| unavailable("delete", format!("unreadable response: {}", e)))?;

        match body.result.as_str() {
            "ok" => Ok(()),
            "not found" => Err(AssetError::AssetNotFound {
                storage_id: storage_id.to_string(),
            }),
            other => Err(unavailable("delete", format!("unexpected result {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{PAGE_FORMAT, PAGE_TRANSFORMATION};

    fn creds() -> CloudinaryCredentials {
        CloudinaryCredentials {
            cloud_name: "demo".into(),
            api_key: "1234".into(),
            api_secret: "secret".into(),
            signature_algorithm: SignatureAlgorithm::default(),
        }
    }

    fn documented_example() -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        params.insert("timestamp", "1315060510".to_string());
        params.insert("public_id", "sample_image".to_string());
        params.insert("eager", "w_400,h_300,c_pad|w_260,h_200,c_crop".to_string());
        params
    }

    #[test]
    fn default_signature_is_sha1() {
        assert_eq!(
            sign(&documented_example(), "abcd", SignatureAlgorithm::default()),
            "bfd09f95f331f558cbd1320e67aa8d488770583e"
        );
    }

    #[test]
    fn sha256_signature_when_configured() {
        assert_eq!(
            sign(&documented_example(), "abcd", SignatureAlgorithm::Sha256),
            "cc927e1290f9e3ae4c1a741eda21a4630b4ce80f9ce0bc0296337d25cf40f91e"
        );
    }

    #[test]
    fn signature_sorts_and_skips_empty_values() {
        let mut params = BTreeMap::new();
        params.insert("timestamp", "1700000000".to_string());
        params.insert("public_id", "resume_u1".to_string());
        params.insert("folder", "portfolio-cms/resumes".to_string());
        params.insert("tags", String::new());
        assert_eq!(
            sign(&params, "secret", SignatureAlgorithm::Sha1),
            "81f841573072d2f92d3fe4055f8f426f4a2997d4"
        );
        assert_eq!(
            sign(&params, "secret", SignatureAlgorithm::Sha256),
            "255009438e7805037cee32431c1743d67c27ee4ab58e4718abf0c00ac7eee298"
        );
    }

    #[test]
    fn signed_params_carry_key_but_do_not_sign_it() {
        let store = CloudinaryStore::new(creds(), Duration::from_secs(5)).unwrap();
        let mut params = BTreeMap::new();
        params.insert("public_id", "x".to_string());
        let signed = store.signed_params(params);

        assert_eq!(signed["api_key"], "1234");
        let mut unsigned = signed.clone();
        let sig = unsigned.remove("signature").unwrap();
        unsigned.remove("api_key");
        assert_eq!(sign(&unsigned, "secret", SignatureAlgorithm::Sha1), sig);
        assert_eq!(sig.len(), 40);
    }

    #[test]
    fn image_uploads_carry_transformation_and_format() {
        let opts = PutOptions::new("portfolio-cms/resume-images", ResourceKind::Image)
            .public_id("resume_u1_page-1")
            .transformation(PAGE_TRANSFORMATION)
            .format(PAGE_FORMAT);
        let params = upload_params(&opts);
        assert_eq!(params["transformation"], "q_auto");
        assert_eq!(params["format"], "jpg");
        assert!(!params.contains_key("access_mode"));

        // Both end up under the signature.
        let store = CloudinaryStore::new(creds(), Duration::from_secs(5)).unwrap();
        let mut signed = store.signed_params(params);
        let sig = signed.remove("signature").unwrap();
        signed.remove("api_key");
        assert!(signed.contains_key("transformation"));
        assert_eq!(sign(&signed, "secret", SignatureAlgorithm::Sha1), sig);
    }

    #[test]
    fn documents_go_up_public_without_transformation() {
        let params = upload_params(
            &PutOptions::new("portfolio-cms/resumes", ResourceKind::Raw).public_id("resume_u1"),
        );
        assert_eq!(params["access_mode"], "public");
        assert_eq!(params["type"], "upload");
        assert!(!params.contains_key("transformation"));
        assert!(!params.contains_key("format"));
    }

    #[test]
    fn endpoints_include_cloud_and_kind() {
        let store = CloudinaryStore::new(creds(), Duration::from_secs(5))
            .unwrap()
            .with_api_base("http://localhost:9000/v1_1/");
        assert_eq!(
            store.endpoint(ResourceKind::Raw, "upload"),
            "http://localhost:9000/v1_1/demo/raw/upload"
        );
        assert_eq!(
            store.endpoint(ResourceKind::Image, "destroy"),
            "http://localhost:9000/v1_1/demo/image/destroy"
        );
    }
}
