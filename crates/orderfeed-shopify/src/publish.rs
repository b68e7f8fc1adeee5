//! Upload staged output to the blob store

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use orderfeed_core::{RetryPolicy, retry_with_backoff};
use orderfeed_store::{BlobError, BlobStore, Cursor, hash_file, join_key, short_hash};

/// Blob key layout of published files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub output_prefix: String,
    pub raw_prefix: String,
    pub file_prefix: String,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            output_prefix: "OrderFeed".to_string(),
            raw_prefix: "Raw".to_string(),
            file_prefix: "ORDERS".to_string(),
        }
    }
}

impl OutputLayout {
    /// `{file_prefix}_{first}-{last}`: one name per order range, so a re-run
    /// of the same range overwrites instead of duplicating.
    pub fn file_stem(&self, first: Cursor, last: Cursor) -> String {
        format!("{}_{first}-{last}", self.file_prefix)
    }

    pub fn output_key(&self, stem: &str) -> String {
        join_key(&[&self.output_prefix, &format!("{stem}.csv")])
    }

    pub fn raw_key(&self, stem: &str) -> String {
        join_key(&[&self.raw_prefix, &format!("{stem}.json")])
    }
}

/// What a successful publish stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    pub output_key: String,
    pub output_location: String,
    pub raw_key: Option<String>,
    /// blake3 of the uploaded CSV
    pub content_hash: String,
    pub bytes: u64,
}

#[derive(Debug)]
pub enum PublishError {
    /// Staged file could not be read
    Read {
        path: String,
        source: std::io::Error,
    },
    Upload { key: String, source: BlobError },
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, source } => write!(f, "cannot read {path}: {source}"),
            Self::Upload { key, source } => write!(f, "upload of {key} failed: {source}"),
        }
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Read { source, .. } => Some(source),
            Self::Upload { source, .. } => Some(source),
        }
    }
}

/// Uploads staged files under the configured layout.
#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn BlobStore>,
    layout: OutputLayout,
    retry: RetryPolicy,
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("layout", &self.layout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Publisher {
    pub fn new(store: Arc<dyn BlobStore>, layout: OutputLayout, retry: RetryPolicy) -> Self {
        Self {
            store,
            layout,
            retry,
        }
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Upload the CSV under `stem`, then the raw JSON if given.
    ///
    /// Returns only after every upload succeeded.
    pub fn publish(
        &self,
        output: &Path,
        stem: &str,
        raw: Option<&Path>,
    ) -> Result<PublishReceipt, PublishError> {
        let read_err = |source| PublishError::Read {
            path: output.display().to_string(),
            source,
        };
        let hash = hash_file(output).map_err(read_err)?;
        let bytes = std::fs::metadata(output).map_err(read_err)?.len();

        let output_key = self.layout.output_key(stem);
        self.upload(output, &output_key, "text/csv")?;
        log::info!(
            "Published {} ({} bytes, blake3 {})",
            self.store.location(&output_key),
            bytes,
            short_hash(&hash)
        );

        let raw_key = match raw {
            Some(path) => {
                let key = self.layout.raw_key(stem);
                self.upload(path, &key, "application/json")?;
                log::info!("Published raw orders to {}", self.store.location(&key));
                Some(key)
            }
            None => None,
        };

        Ok(PublishReceipt {
            output_location: self.store.location(&output_key),
            output_key,
            raw_key,
            content_hash: hash.to_hex().to_string(),
            bytes,
        })
    }

    fn upload(&self, path: &Path, key: &str, content_type: &str) -> Result<(), PublishError> {
        let label = format!("upload {key}");
        retry_with_backoff(&label, &self.retry, || {
            self.store.put_file(key, path, content_type)
        })
        .map_err(|source| PublishError::Upload {
            key: key.to_string(),
            source,
        })
    }
}
