//! Blob store abstraction: durable remote objects addressed by key
//!
//! Keys are `/`-separated relative paths (`OrderFeed/ORDERS_1001-1117.csv`).
//! Puts overwrite; there is no listing or versioning.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use orderfeed_core::{AtomicFile, HttpError, Retryable};

/// Error from a blob store operation.
#[derive(Debug)]
pub enum BlobError {
    /// The key does not exist
    NotFound(String),
    /// Key is empty, absolute or escapes the store root
    InvalidKey(String),
    /// Remote transport failure
    Http(HttpError),
    /// Local I/O failure
    Io(io::Error),
}

impl std::fmt::Display for BlobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(key) => write!(f, "blob not found: {key}"),
            Self::InvalidKey(key) => write!(f, "invalid blob key: {key:?}"),
            Self::Http(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "IO: {e}"),
        }
    }
}

impl std::error::Error for BlobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HttpError> for BlobError {
    fn from(e: HttpError) -> Self {
        Self::Http(e)
    }
}

impl From<io::Error> for BlobError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl BlobError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Http(e) if e.is_auth())
    }
}

impl Retryable for BlobError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::InvalidKey(_) => false,
            Self::Http(e) => e.is_retryable(),
            Self::Io(e) => e.kind() != io::ErrorKind::StorageFull,
        }
    }
}

/// Durable object storage (bucket/container abstraction).
pub trait BlobStore: Send + Sync {
    /// Upload a local file under `key`, replacing any existing object.
    fn put_file(&self, key: &str, path: &Path, content_type: &str) -> Result<(), BlobError>;

    /// Upload an in-memory payload under `key`, replacing any existing object.
    fn put_bytes(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), BlobError>;

    /// Download the object at `key`; `BlobError::NotFound` if absent.
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Human-readable location of `key` (`gs://bucket/key`, `/dir/key`)
    fn location(&self, key: &str) -> String;
}

/// Reject keys that are empty, absolute, or contain `..`
pub fn validate_key(key: &str) -> Result<(), BlobError> {
    let path = Path::new(key);
    let ok = !key.is_empty()
        && !key.ends_with('/')
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(BlobError::InvalidKey(key.to_string()))
    }
}

/// Join key segments with `/`, dropping empty segments and stray slashes.
pub fn join_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Blob store backed by a local directory.
///
/// Writes go through [`AtomicFile`], so a crash never leaves a truncated object.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a store rooted at `root` (created if missing).
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn open_for_write(&self, key: &str) -> Result<AtomicFile, BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(AtomicFile::create(path)?)
    }
}

impl BlobStore for LocalBlobStore {
    fn put_file(&self, key: &str, path: &Path, _content_type: &str) -> Result<(), BlobError> {
        let mut src = fs::File::open(path)?;
        let mut dst = self.open_for_write(key)?;
        io::copy(&mut src, &mut dst)?;
        dst.finalize()?;
        log::debug!("stored {} at {}", path.display(), self.location(key));
        Ok(())
    }

    fn put_bytes(&self, key: &str, data: &[u8], _content_type: &str) -> Result<(), BlobError> {
        let mut dst = self.open_for_write(key)?;
        dst.write_all(data)?;
        dst.finalize()?;
        Ok(())
    }

    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    fn location(&self, key: &str) -> String {
        self.root.join(key).display().to_string()
    }
}
