//! Extraction checkpoint: the last order whose output was durably published
//!
//! Stored as a small JSON record (`{prefix}/last_order.json`) in the blob
//! store. It is read once at the start of a run and written once at the end
//! of a successful run, after the output upload has been confirmed.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orderfeed_core::{RetryPolicy, retry_with_backoff};
use serde::{Deserialize, Serialize};

use crate::blob::{BlobError, BlobStore, join_key};

/// File name of the checkpoint object
pub const CHECKPOINT_FILE: &str = "last_order.json";

/// Position in the upstream order sequence: the numeric order id.
///
/// Parsed from the last path segment of a GID (`gid://shopify/Order/1001`)
/// or from a bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(u64);

impl Cursor {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn from_gid(gid: &str) -> Option<Self> {
        gid.rsplit('/').next()?.trim().parse().ok().map(Self)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted checkpoint record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// GID of the most recently processed order
    pub id: String,
    /// Display name of that order (`#1001`)
    #[serde(default)]
    pub name: Option<String>,
    /// Creation time of that order
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// When the run that wrote this checkpoint finished.
    /// Absent in records written by the legacy feed.
    #[serde(default)]
    pub committed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub order_count: usize,
    /// Blob key of the output published by that run
    #[serde(default)]
    pub output: Option<String>,
    /// blake3 hex digest of the published output
    #[serde(default)]
    pub content_hash: Option<String>,
}

impl Checkpoint {
    pub fn cursor(&self) -> Option<Cursor> {
        Cursor::from_gid(&self.id)
    }
}

/// Error loading or saving the checkpoint.
#[derive(Debug)]
pub enum CheckpointError {
    /// Stored record is unreadable or has no usable cursor
    Corrupt { key: String, message: String },
    /// Record could not be serialized
    Encode(serde_json::Error),
    /// Blob store failure
    Store(BlobError),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt { key, message } => write!(f, "corrupt checkpoint {key}: {message}"),
            Self::Encode(e) => write!(f, "cannot encode checkpoint: {e}"),
            Self::Store(e) => write!(f, "checkpoint store: {e}"),
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<BlobError> for CheckpointError {
    fn from(e: BlobError) -> Self {
        Self::Store(e)
    }
}

/// Loads and saves the checkpoint record in a blob store.
#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn BlobStore>,
    key: String,
    retry: RetryPolicy,
}

impl fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn BlobStore>, prefix: &str, retry: RetryPolicy) -> Self {
        Self {
            store,
            key: join_key(&[prefix, CHECKPOINT_FILE]),
            retry,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn location(&self) -> String {
        self.store.location(&self.key)
    }

    /// Read the checkpoint. `Ok(None)` means no prior checkpoint exists.
    pub fn load(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        let label = format!("checkpoint load {}", self.key);
        let fetched = retry_with_backoff(&label, &self.retry, || {
            match self.store.get_bytes(&self.key) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(BlobError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            }
        })?;
        let Some(bytes) = fetched else {
            log::info!("No checkpoint at {}, starting from the beginning", self.location());
            return Ok(None);
        };

        let checkpoint: Checkpoint =
            serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Corrupt {
                key: self.key.clone(),
                message: e.to_string(),
            })?;
        if checkpoint.cursor().is_none() {
            return Err(CheckpointError::Corrupt {
                key: self.key.clone(),
                message: format!("no numeric order id in {:?}", checkpoint.id),
            });
        }
        log::info!(
            "Loaded checkpoint: last order {} ({})",
            checkpoint.id,
            checkpoint.name.as_deref().unwrap_or("unnamed")
        );
        Ok(Some(checkpoint))
    }

    /// Overwrite the checkpoint with a single put.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(checkpoint).map_err(CheckpointError::Encode)?;
        let label = format!("checkpoint save {}", self.key);
        retry_with_backoff(&label, &self.retry, || {
            self.store.put_bytes(&self.key, &json, "application/json")
        })?;
        log::info!("Checkpoint advanced to {} at {}", checkpoint.id, self.location());
        Ok(())
    }
}
