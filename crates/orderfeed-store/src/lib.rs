//! orderfeed-store: durable storage for published feeds and checkpoints
//!
//! A [`BlobStore`] abstracts the bucket (GCS or a local directory). The
//! [`CheckpointStore`] keeps the extraction cursor in that bucket, and
//! blake3 hashes identify published output.

pub mod blob;
pub mod checkpoint;
pub mod gcs;
pub mod hash;

pub use blob::{BlobError, BlobStore, LocalBlobStore, join_key, validate_key};
pub use checkpoint::{CHECKPOINT_FILE, Checkpoint, CheckpointError, CheckpointStore, Cursor};
pub use gcs::{GcsBlobStore, TokenSource};
pub use hash::{hash_bytes, hash_file, short_hash};
