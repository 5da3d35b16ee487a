//! File-backed atomic store.
//!
//! A store directory holds one snapshot file plus a lock file:
//!
//! ```text
//! <dir>/
//!   .objgraph.lock     exclusive flock, held while the store is open
//!   store.objgraph     header + one CRC-checked JSON frame
//! ```
//!
//! Saves write the whole snapshot to a temp file, fsync it (when
//! `sync_on_write`), then rename it over the previous snapshot.

mod codec;
mod file_lock;

pub use file_lock::FileLock;

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::GraphResult;

use super::atomic::{AtomicBackend, AtomicSnapshot, AtomicStore};
use super::traits::StorageError;

const SNAPSHOT_FILE: &str = "store.objgraph";

/// Configuration for file-backed stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStoreConfig {
    /// Whether to fsync the snapshot and its directory on every save.
    pub sync_on_write: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}

fn io_err(context: &str, e: &std::io::Error) -> StorageError {
    StorageError::Io(format!("{context}: {e}"))
}

/// Snapshot persistence in a locked directory.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    path: PathBuf,
    config: FileStoreConfig,
    _lock: FileLock,
}

impl FileBackend {
    /// Creates `dir` if needed and takes its lock.
    pub fn open(dir: impl AsRef<Path>, config: FileStoreConfig) -> GraphResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| io_err("failed to create store directory", &e))?;
        let lock = FileLock::acquire(dir).map_err(|e| io_err("failed to acquire lock", &e))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            path: dir.join(SNAPSHOT_FILE),
            config,
            _lock: lock,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sync_dir(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            File::open(&self.dir)?.sync_all()?;
        }
        Ok(())
    }
}

impl AtomicBackend for FileBackend {
    fn store_type(&self) -> &'static str {
        "file"
    }

    fn load(&self) -> GraphResult<Option<AtomicSnapshot>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err("failed to open snapshot", &e).into()),
        };

        let mut reader = BufReader::new(file);
        let version = codec::read_header(&mut reader)
            .map_err(|e| io_err("failed to read snapshot header", &e))?;
        if version != codec::CODEC_VERSION {
            return Err(StorageError::SerializationError(format!(
                "unsupported snapshot version {version}"
            ))
            .into());
        }

        let snapshot: AtomicSnapshot = codec::decode(&mut reader)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        debug!(path = %self.path.display(), records = snapshot.nodes.len(), "loaded snapshot");
        Ok(Some(snapshot))
    }

    fn persist(&self, snapshot: &AtomicSnapshot) -> GraphResult<()> {
        let frame = codec::encode(snapshot).map_err(|e| StorageError::SerializationError(e.to_string()))?;
        let temp = self.dir.join(format!("{SNAPSHOT_FILE}.tmp.{}", Uuid::new_v4()));

        let written = (|| -> std::io::Result<()> {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp)?;
            let mut writer = BufWriter::new(file);
            codec::write_header(&mut writer)?;
            writer.write_all(&frame)?;
            writer.flush()?;
            if self.config.sync_on_write {
                writer.get_ref().sync_all()?;
            }
            fs::rename(&temp, &self.path)?;
            if self.config.sync_on_write {
                self.sync_dir()?;
            }
            Ok(())
        })();

        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(io_err("failed to write snapshot", &e).into());
        }
        Ok(())
    }
}

/// Opens (or creates) a file-backed atomic store in `dir`.
///
/// # Errors
/// - the directory cannot be created or locked (another owner holds it)
/// - the snapshot is corrupt
pub fn open_file_store(
    dir: impl AsRef<Path>,
    config: Option<FileStoreConfig>,
) -> GraphResult<AtomicStore<FileBackend>> {
    let backend = FileBackend::open(dir, config.unwrap_or_default())?;
    AtomicStore::open(backend)
}
