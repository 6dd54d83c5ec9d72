// dbbackup/src/backup/archive.rs
use chrono::{DateTime, Local};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use crate::errors::{BackupError, Result};

pub const ARCHIVE_EXTENSION: &str = ".sql.gz";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

// In-flight archives end with this, so rotation never matches them.
const PARTIAL_SUFFIX: &str = ".partial";
const CHUNK_SIZE: usize = 64 * 1024;

/// `<YYYY-MM-DD_hh-mm-ss>_<database>.sql.gz`
pub fn archive_file_name(taken_at: DateTime<Local>, database: &str) -> String {
    format!("{}_{}{}", taken_at.format(TIMESTAMP_FORMAT), database, ARCHIVE_EXTENSION)
}

/// A gzip archive being written under a hidden temporary name.
///
/// The data only becomes visible under its final name through [`PendingArchive::commit`].
/// Dropping a pending archive removes the temporary file, so every early return on
/// the failure path cleans up after itself.
pub struct PendingArchive {
    temp: NamedTempFile,
    file: tokio::fs::File,
    final_path: PathBuf,
    bytes_in: u64,
}

impl PendingArchive {
    /// Creates the temporary file next to `final_path`.
    ///
    /// Fails with [`BackupError::ArchiveAlreadyExists`] if the final name is taken.
    pub fn create(backup_dir: &Path, file_name: &str) -> Result<Self> {
        let final_path = backup_dir.join(file_name);
        ensure_vacant(&final_path)?;

        let temp = tempfile::Builder::new()
            .prefix(&format!(".{}.", file_name))
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(backup_dir)
            .map_err(|e| BackupError::archive_write(&final_path, e))?;
        let std_file = temp
            .as_file()
            .try_clone()
            .map_err(|e| BackupError::archive_write(&final_path, e))?;

        debug!(temp = %temp.path().display(), "Created temporary archive");
        Ok(PendingArchive {
            temp,
            file: tokio::fs::File::from_std(std_file),
            final_path,
            bytes_in: 0,
        })
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    #[cfg(test)]
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Uncompressed bytes consumed so far.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Compresses `reader` into the temporary file until EOF.
    ///
    /// Reads happen in bounded chunks and compressed output is flushed to disk after
    /// each one, so memory use does not grow with the dump size.
    pub async fn write_from<R>(&mut self, reader: &mut R) -> Result<u64>
    where
        R: AsyncRead + Unpin,
    {
        let final_path = self.final_path.clone();
        let io_err = |e: std::io::Error| BackupError::archive_write(&final_path, e);

        let mut encoder = GzEncoder::new(Vec::with_capacity(CHUNK_SIZE), Compression::default());
        let mut chunk = vec![0u8; CHUNK_SIZE];

        loop {
            let read = reader.read(&mut chunk).await.map_err(io_err)?;
            if read == 0 {
                break;
            }
            encoder.write_all(&chunk[..read]).map_err(io_err)?;
            self.bytes_in += read as u64;

            let compressed = encoder.get_mut();
            if !compressed.is_empty() {
                self.file.write_all(compressed.as_slice()).await.map_err(io_err)?;
                compressed.clear();
            }
        }

        let trailer = encoder.finish().map_err(io_err)?;
        self.file.write_all(&trailer).await.map_err(io_err)?;
        self.file.flush().await.map_err(io_err)?;
        self.file.sync_all().await.map_err(io_err)?;

        debug!(bytes_in = self.bytes_in, final_path = %self.final_path.display(), "Dump stream drained");
        Ok(self.bytes_in)
    }

    /// Moves the archive to its final name without overwriting anything there.
    pub fn commit(self) -> Result<PathBuf> {
        let PendingArchive {
            temp,
            file,
            final_path,
            bytes_in,
        } = self;
        drop(file);

        match temp.persist_noclobber(&final_path) {
            Ok(_) => {
                info!(path = %final_path.display(), bytes_in, "✓ Archive written");
                Ok(final_path)
            }
            // The returned temp file is dropped here, which deletes it.
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(BackupError::ArchiveAlreadyExists { path: final_path })
            }
            Err(e) => Err(BackupError::archive_write(final_path, e.error)),
        }
    }
}

fn ensure_vacant(path: &Path) -> Result<()> {
    match path.try_exists() {
        Ok(false) => Ok(()),
        Ok(true) => Err(BackupError::ArchiveAlreadyExists {
            path: path.to_path_buf(),
        }),
        Err(e) => Err(BackupError::archive_write(path, e)),
    }
}
