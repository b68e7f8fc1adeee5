//! Shared HTTP client and tokio runtime.
//!
//! Callers stay synchronous and drive requests with
//! `SHARED_RUNTIME.handle().block_on(...)`; the trigger server runs on the
//! same runtime and moves pipeline runs onto blocking threads.

use std::path::Path;
use std::sync::{LazyLock, OnceLock};
use std::time::Duration;

use tokio_util::io::ReaderStream;

use crate::error::HttpError;

/// Transport settings applied to the shared client.
#[derive(Debug, Clone, Copy)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Whole-request timeout (page fetch, blob upload)
    pub request_timeout: Duration,
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub backoff_base: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

static HTTP_CONFIG: OnceLock<HttpConfig> = OnceLock::new();

/// Install transport settings. Must run before the first `http_client()` call;
/// later calls are ignored.
pub fn set_http_config(config: HttpConfig) {
    if HTTP_CONFIG.set(config).is_err() {
        log::debug!("HTTP config already set, ignoring override");
    }
}

/// Current transport settings (defaults if never set)
pub fn http_config() -> &'static HttpConfig {
    HTTP_CONFIG.get_or_init(HttpConfig::default)
}

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    let config = http_config();
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .pool_max_idle_per_host(4)
        .user_agent(concat!("orderfeed/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            log::warn!("HTTP client builder failed ({e}), using defaults");
            reqwest::Client::new()
        })
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP operations and the trigger server.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("orderfeed-io")
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Stream a local file as a request body, so uploads never buffer the whole file.
///
/// Returns the body and its length for the `Content-Length` header.
pub async fn file_body(path: &Path) -> Result<(reqwest::Body, u64), HttpError> {
    let file = tokio::fs::File::open(path).await?;
    let len = file.metadata().await?.len();
    let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
    Ok((body, len))
}
