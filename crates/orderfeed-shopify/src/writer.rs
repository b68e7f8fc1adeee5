//! Stage feed output on local disk
//!
//! Every file goes through [`AtomicFile`]: written as `name.tmp`, fsynced,
//! then renamed. A crash mid-write leaves only a `.tmp` file, which is swept
//! the next time a writer is created.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use orderfeed_core::{AtomicFile, cleanup_tmp_files};

use crate::schema::RawOrder;
use crate::transform::TransformedRow;

#[derive(Debug)]
pub enum WriteError {
    Io { path: PathBuf, source: io::Error },
    Csv { path: PathBuf, source: csv::Error },
    Json { path: PathBuf, source: serde_json::Error },
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Csv { path, source } => write!(f, "{}: CSV: {source}", path.display()),
            Self::Json { path, source } => write!(f, "{}: JSON: {source}", path.display()),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Csv { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
        }
    }
}

/// Writes CSV output and raw JSON into the staging directory.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    staging_dir: PathBuf,
}

impl OutputWriter {
    /// Create the staging directory and sweep leftover `.tmp` files.
    pub fn new(staging_dir: impl Into<PathBuf>) -> io::Result<Self> {
        let staging_dir = staging_dir.into();
        fs::create_dir_all(&staging_dir)?;
        let removed = cleanup_tmp_files(&staging_dir)?;
        if removed > 0 {
            log::info!(
                "Removed {removed} stale temp files from {}",
                staging_dir.display()
            );
        }
        Ok(Self { staging_dir })
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Write `rows` as CSV (header always present) to `{staging}/{file_name}`.
    pub fn write(&self, rows: &[TransformedRow], file_name: &str) -> Result<PathBuf, WriteError> {
        let path = self.staging_dir.join(file_name);
        let io_err = |source| WriteError::Io {
            path: path.clone(),
            source,
        };
        let csv_err = |source| WriteError::Csv {
            path: path.clone(),
            source,
        };

        let file = AtomicFile::create(&path).map_err(io_err)?;
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        wtr.write_record(TransformedRow::HEADER).map_err(csv_err)?;
        for row in rows {
            wtr.serialize(row).map_err(csv_err)?;
        }
        let file = wtr
            .into_inner()
            .map_err(|e| io_err(io::Error::new(e.error().kind(), e.to_string())))?;
        let path = file.finalize().map_err(io_err)?;
        log::debug!("wrote {} rows to {}", rows.len(), path.display());
        Ok(path)
    }

    /// Write the fetched orders as a pretty JSON array.
    pub fn stage_raw(&self, orders: &[RawOrder], file_name: &str) -> Result<PathBuf, WriteError> {
        let path = self.staging_dir.join(file_name);
        let io_err = |source| WriteError::Io {
            path: path.clone(),
            source,
        };

        let mut file = AtomicFile::create(&path).map_err(io_err)?;
        serde_json::to_writer_pretty(&mut file, orders).map_err(|source| WriteError::Json {
            path: path.clone(),
            source,
        })?;
        file.write_all(b"\n").map_err(io_err)?;
        let path = file.finalize().map_err(io_err)?;
        log::debug!("staged {} raw orders at {}", orders.len(), path.display());
        Ok(path)
    }

    /// Remove files this writer staged. Paths outside the staging
    /// directory and already-missing files are skipped. Returns the number removed.
    pub fn discard<P: AsRef<Path>>(&self, staged: &[P]) -> io::Result<usize> {
        let mut removed = 0;
        for path in staged {
            let path = path.as_ref();
            if path.parent() != Some(self.staging_dir.as_path()) {
                log::warn!("Not removing {}: outside staging dir", path.display());
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }
}
