//! Orderfeed Core - Common infrastructure for the order feed pipeline
//!
//! This crate provides the shared HTTP client and runtime, retry policy,
//! logging, progress display, shutdown handling and atomic file output
//! used by the fetch, publish and trigger layers.

pub mod error;
pub mod http;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod sink;

// Re-exports for convenience
pub use error::HttpError;
pub use http::{HttpConfig, SHARED_RUNTIME, file_body, http_client, http_config, set_http_config};
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress};
pub use retry::{RetryPolicy, Retryable, retry_with_backoff, retry_with_backoff_until};
pub use shutdown::{
    install_signal_handlers, is_shutdown_requested, request_shutdown, shutdown_flag, sleep_unless,
    sleep_unless_shutdown,
};
pub use sink::{AtomicFile, cleanup_tmp_files};
