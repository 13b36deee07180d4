//! Backblaze B2 object-store backend.
//!
//! Implements the `ObjectStore` seam over the B2 native API:
//! authorize the account, fetch an upload URL, upload with a SHA-1
//! content header; download by file name, with 404 meaning "absent".
//!
//! Credentials are handed over once at construction and never logged or
//! written anywhere; the uploaded payloads are committed shard files,
//! opaque to the remote.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use sha1::{Digest, Sha1};

use crate::credentials::RemoteCredentials;
use crate::errors::{CofferError, Result};
use crate::sync::remote::ObjectStore;

/// Account authorization endpoint (fixed per B2 API v2).
const AUTH_URL: &str = "https://api.backblazeb2.com/b2api/v2/b2_authorize_account";

#[derive(Deserialize)]
struct AuthResponse {
    #[serde(rename = "authorizationToken")]
    authorization_token: String,
    #[serde(rename = "apiUrl")]
    api_url: String,
    #[serde(rename = "downloadUrl")]
    download_url: String,
    allowed: Allowed,
}

#[derive(Deserialize)]
struct Allowed {
    #[serde(rename = "bucketId")]
    bucket_id: String,
    #[serde(rename = "bucketName")]
    bucket_name: String,
}

#[derive(Deserialize)]
struct UploadUrlResponse {
    #[serde(rename = "uploadUrl")]
    upload_url: String,
    #[serde(rename = "authorizationToken")]
    authorization_token: String,
}

/// B2-backed object store.
pub struct B2Client {
    credentials: RemoteCredentials,
}

impl B2Client {
    /// Create a client from provider-supplied credentials.
    ///
    /// The application key must be restricted to a single bucket; the
    /// authorize response then carries that bucket's id and name, so no
    /// bucket configuration lives on this side.
    pub fn new(credentials: RemoteCredentials) -> Self {
        Self { credentials }
    }

    /// Authorize the account and return the per-session endpoints.
    fn authorize(&self) -> Result<AuthResponse> {
        let basic = BASE64.encode(format!(
            "{}:{}",
            self.credentials.key_id, self.credentials.secret
        ));
        let mut response = ureq::get(AUTH_URL)
            .header("Authorization", &format!("Basic {basic}"))
            .call()
            .map_err(|e| CofferError::Sync(format!("B2 authorization failed: {e}")))?;
        response
            .body_mut()
            .read_json::<AuthResponse>()
            .map_err(|e| CofferError::Sync(format!("B2 authorization response invalid: {e}")))
    }
}

impl ObjectStore for B2Client {
    fn put(&self, name: &str, data: &[u8]) -> Result<()> {
        let session = self.authorize()?;

        let mut response = ureq::post(&format!(
            "{}/b2api/v2/b2_get_upload_url",
            session.api_url
        ))
        .header("Authorization", &session.authorization_token)
        .send_json(serde_json::json!({ "bucketId": session.allowed.bucket_id }))
        .map_err(|e| CofferError::Sync(format!("B2 get_upload_url failed: {e}")))?;
        let upload = response
            .body_mut()
            .read_json::<UploadUrlResponse>()
            .map_err(|e| CofferError::Sync(format!("B2 upload URL response invalid: {e}")))?;

        let content_sha1 = hex::encode(Sha1::digest(data));
        ureq::post(&upload.upload_url)
            .header("Authorization", &upload.authorization_token)
            .header("X-Bz-File-Name", name)
            .header("Content-Type", "b2/x-auto")
            .header("X-Bz-Content-Sha1", &content_sha1)
            .send(data)
            .map_err(|e| CofferError::Sync(format!("B2 upload failed: {e}")))?;

        Ok(())
    }

    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let session = self.authorize()?;

        let url = format!(
            "{}/file/{}/{}",
            session.download_url, session.allowed.bucket_name, name
        );
        match ureq::get(&url)
            .header("Authorization", &session.authorization_token)
            .call()
        {
            Ok(mut response) => {
                let bytes = response
                    .body_mut()
                    .read_to_vec()
                    .map_err(|e| CofferError::Sync(format!("B2 download read failed: {e}")))?;
                Ok(Some(bytes))
            }
            Err(ureq::Error::StatusCode(404)) => Ok(None),
            Err(e) => Err(CofferError::Sync(format!("B2 download failed: {e}"))),
        }
    }
}
