//! Google Cloud Storage backend over the JSON API
//!
//! Uploads use `uploadType=media` (single request, body streamed from disk);
//! downloads use `alt=media`. Credentials come from a static bearer token,
//! the GCE/Cloud Run metadata server, or nothing (local emulators).

use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use orderfeed_core::{HttpError, SHARED_RUNTIME, file_body, http_client};
use reqwest::Url;
use serde::Deserialize;

use crate::blob::{BlobError, BlobStore, validate_key};

const DEFAULT_API_BASE: &str = "https://storage.googleapis.com";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh metadata tokens this long before they expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Where bearer tokens come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// Fixed OAuth access token (e.g. `GCS_ACCESS_TOKEN`)
    Static(String),
    /// Default service account via the instance metadata server
    Metadata,
    /// No `Authorization` header (fake-gcs-server and friends)
    Anonymous,
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

/// GCS bucket client.
pub struct GcsBlobStore {
    bucket: String,
    api_base: String,
    token_source: TokenSource,
    cached_token: Mutex<Option<(String, Instant)>>,
}

impl std::fmt::Debug for GcsBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsBlobStore")
            .field("bucket", &self.bucket)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl GcsBlobStore {
    pub fn new(bucket: impl Into<String>, token_source: TokenSource) -> Self {
        Self {
            bucket: bucket.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            token_source,
            cached_token: Mutex::new(None),
        }
    }

    /// Point at a different endpoint (emulator, private service connect)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn base_url(&self) -> Result<Url, BlobError> {
        Url::parse(&self.api_base).map_err(|e| {
            BlobError::Http(HttpError::Http {
                status: None,
                message: format!("invalid GCS endpoint {}: {e}", self.api_base),
            })
        })
    }

    /// `{base}/storage/v1/b/{bucket}/o/{key}?alt=media` (key percent-encoded as one segment)
    pub fn download_url(&self, key: &str) -> Result<Url, BlobError> {
        validate_key(key)?;
        let mut url = self.base_url()?;
        url.path_segments_mut()
            .map_err(|_| BlobError::InvalidKey(key.to_string()))?
            .pop_if_empty()
            .extend(["storage", "v1", "b", self.bucket.as_str(), "o", key]);
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }

    /// `{base}/upload/storage/v1/b/{bucket}/o?uploadType=media&name={key}`
    pub fn upload_url(&self, key: &str) -> Result<Url, BlobError> {
        validate_key(key)?;
        let mut url = self.base_url()?;
        url.path_segments_mut()
            .map_err(|_| BlobError::InvalidKey(key.to_string()))?
            .pop_if_empty()
            .extend(["upload", "storage", "v1", "b", self.bucket.as_str(), "o"]);
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", key);
        Ok(url)
    }

    fn bearer_token(&self) -> Result<Option<String>, BlobError> {
        match &self.token_source {
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::Anonymous => Ok(None),
            TokenSource::Metadata => {
                let mut cached = self
                    .cached_token
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if let Some((token, expires_at)) = cached.as_ref() {
                    if Instant::now() + TOKEN_EXPIRY_MARGIN < *expires_at {
                        return Ok(Some(token.clone()));
                    }
                }
                let fresh = fetch_metadata_token()?;
                let expires_at = Instant::now() + Duration::from_secs(fresh.expires_in);
                *cached = Some((fresh.access_token.clone(), expires_at));
                Ok(Some(fresh.access_token))
            }
        }
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, BlobError> {
        Ok(match self.bearer_token()? {
            Some(token) => req.bearer_auth(token),
            None => req,
        })
    }
}

fn fetch_metadata_token() -> Result<MetadataToken, BlobError> {
    log::debug!("Requesting access token from metadata server");
    SHARED_RUNTIME.handle().block_on(async {
        let resp = http_client()
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| HttpError::from_reqwest(&e))?;
        let resp = check_status(resp).await?;
        resp.json::<MetadataToken>()
            .await
            .map_err(|e| BlobError::Http(HttpError::from_reqwest(&e)))
    })
}

/// Map a non-success response to `HttpError`, keeping the body for diagnostics
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, HttpError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(HttpError::status(status.as_u16(), truncate(&body, 512)))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

impl BlobStore for GcsBlobStore {
    fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<(), BlobError> {
        let url = self.upload_url(key)?;
        let req = self.authorize(http_client().post(url))?;
        SHARED_RUNTIME.handle().block_on(async {
            let (body, len) = file_body(path).await?;
            let resp = req
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .header(reqwest::header::CONTENT_LENGTH, len)
                .body(body)
                .send()
                .await
                .map_err(|e| HttpError::from_reqwest(&e))?;
            check_status(resp).await?;
            Ok::<_, BlobError>(())
        })?;
        log::debug!("uploaded {} to {}", path.display(), self.location(key));
        Ok(())
    }

    fn put_bytes(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), BlobError> {
        let url = self.upload_url(key)?;
        let req = self.authorize(http_client().post(url))?;
        let data = data.to_vec();
        SHARED_RUNTIME.handle().block_on(async {
            let resp = req
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(data)
                .send()
                .await
                .map_err(|e| HttpError::from_reqwest(&e))?;
            check_status(resp).await?;
            Ok::<_, BlobError>(())
        })
    }

    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let url = self.download_url(key)?;
        let req = self.authorize(http_client().get(url))?;
        SHARED_RUNTIME.handle().block_on(async {
            let resp = req.send().await.map_err(|e| HttpError::from_reqwest(&e))?;
            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(BlobError::NotFound(key.to_string()));
            }
            let resp = check_status(resp).await?;
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| HttpError::from_reqwest(&e))?;
            Ok::<_, BlobError>(bytes.to_vec())
        })
    }

    fn location(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket, key)
    }
}
