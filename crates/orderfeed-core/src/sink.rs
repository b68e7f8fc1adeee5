//! Atomic file output: write to `<name>.tmp`, fsync, rename into place

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Buffered file writer with atomic tmp→rename.
///
/// Readers of `final_path` never observe a partially written file: until
/// [`AtomicFile::finalize`] succeeds the data lives only in the `.tmp` file,
/// and a dropped (unfinalized) writer removes it.
pub struct AtomicFile {
    writer: Option<BufWriter<File>>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

impl std::fmt::Debug for AtomicFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicFile")
            .field("final_path", &self.final_path)
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}

impl AtomicFile {
    /// Create a new writer staging into `<final_path>.tmp`
    pub fn create(final_path: impl Into<PathBuf>) -> io::Result<Self> {
        let final_path = final_path.into();
        let file_name = final_path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let tmp_path = final_path.with_file_name(format!("{}.tmp", file_name.to_string_lossy()));

        // Clean up stale tmp file
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let file = File::create(&tmp_path)?;
        Ok(Self {
            writer: Some(BufWriter::new(file)),
            tmp_path,
            final_path,
            bytes_written: 0,
        })
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Flush, fsync and atomically rename tmp → final
    pub fn finalize(mut self) -> io::Result<PathBuf> {
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(self.final_path.clone())
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "file already finalized"))?;
        let n = writer.write(buf)?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        // Not finalized: discard the partial output
        if self.writer.take().is_some() {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Remove stale .tmp files in a staging directory
pub fn cleanup_tmp_files(dir: &Path) -> io::Result<usize> {
    let pattern = dir.join("**").join("*.tmp");
    let paths = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let mut removed = 0;
    for path in paths.filter_map(|p| p.ok()) {
        log::warn!("Removing stale tmp file: {}", path.display());
        fs::remove_file(&path)?;
        removed += 1;
    }
    Ok(removed)
}
