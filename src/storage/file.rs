//! JSON File Storage
//!
//! Keeps the whole confirmations state in one JSON document. Writes go to
//! a sibling temp file that is fsynced and renamed over the target, so
//! readers only ever see a complete snapshot, even after a crash. File I/O
//! runs on the blocking pool.

use async_trait::async_trait;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use super::traits::{ConfirmationsSnapshot, StateStore, StorageError, StorageResult};

/// File format version
const STATE_VERSION: u32 = 1;

/// On-disk document
#[derive(serde::Serialize, serde::Deserialize)]
struct StateFile {
    version: u32,
    #[serde(flatten)]
    snapshot: ConfirmationsSnapshot,
}

/// JSON-file-backed state store
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    /// Create a store writing to `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the state document
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        temp_path(&self.path)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn read_state(path: &Path) -> StorageResult<ConfirmationsSnapshot> {
    if !path.exists() {
        return Ok(ConfirmationsSnapshot::default());
    }

    let json = fs::read_to_string(path)?;
    let file: StateFile = serde_json::from_str(&json)?;

    Ok(file.snapshot)
}

/// Write `bytes` to `path` so a crash leaves either the old or the new
/// document
///
/// The temp file is fsynced before the rename and the parent directory
/// after it. A temp file left by an earlier crash is overwritten.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp = temp_path(path);
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    fsync_parent(path)
}

#[cfg(target_family = "unix")]
fn fsync_parent(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)?.sync_all()
}

#[cfg(not(target_family = "unix"))]
fn fsync_parent(_path: &Path) -> io::Result<()> {
    // no directory fsync on this platform
    Ok(())
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, e))
}

#[async_trait]
impl StateStore for JsonFileStateStore {
    async fn load(&self) -> StorageResult<ConfirmationsSnapshot> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_state(&path))
            .await
            .map_err(join_error)?
    }

    async fn save(&self, snapshot: &ConfirmationsSnapshot) -> StorageResult<()> {
        let file = StateFile {
            version: STATE_VERSION,
            snapshot: snapshot.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &json))
            .await
            .map_err(join_error)??;

        tracing::debug!(
            target: "confirmations::storage",
            path = %self.path.display(),
            "Saved confirmations state"
        );

        Ok(())
    }

    fn store_type(&self) -> &'static str {
        "json-file"
    }
}
