//! Sealed snapshot persistence.
//!
//! Stores keep their live state in memory and hand a serialized snapshot to
//! [`Snapshots::save`] after each mutation. Snapshots carry a generation
//! number so that a slow writer can never replace a newer file with an older
//! one.

use crate::error::VaultError;
use crate::seal::SealingKey;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry configuration for snapshot writes.
const MAX_RETRIES: u32 = 2;
const INITIAL_BACKOFF_MS: u64 = 50;
const MAX_BACKOFF_MS: u64 = 1000;

/// A sealed snapshot file on disk.
pub struct SnapshotFile {
    path: PathBuf,
    key: SealingKey,
    /// Generation of the snapshot currently on disk.
    written: Mutex<u64>,
}

impl SnapshotFile {
    /// Create a snapshot file handle. Nothing is touched on disk yet.
    pub fn new(path: impl Into<PathBuf>, key: SealingKey) -> Self {
        Self {
            path: path.into(),
            key,
            written: Mutex::new(0),
        }
    }

    /// Path of the snapshot file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and open the snapshot. Returns `None` if no file exists yet.
    pub async fn load(&self) -> Result<Option<Vec<u8>>, VaultError> {
        if !fs::try_exists(&self.path).await? {
            info!("Snapshot not found at {:?}, starting empty", self.path);
            return Ok(None);
        }

        let sealed = fs::read(&self.path).await?;
        let plaintext = self.key.open(&sealed).map_err(|_| {
            VaultError::Storage(format!(
                "Failed to open snapshot {:?}. The storage key may have changed.",
                self.path
            ))
        })?;

        debug!("Loaded snapshot ({} bytes) from {:?}", sealed.len(), self.path);
        Ok(Some(plaintext))
    }

    /// Seal and write a snapshot.
    ///
    /// Snapshots older than the one already on disk are skipped. Transient
    /// I/O failures are retried with exponential backoff.
    pub async fn save(&self, generation: u64, plaintext: &[u8]) -> Result<(), VaultError> {
        let mut written = self.written.lock().await;
        if generation <= *written {
            debug!(
                generation,
                on_disk = *written,
                "Skipping stale snapshot for {:?}", self.path
            );
            return Ok(());
        }

        let sealed = self.key.seal(plaintext)?;

        let mut backoff_ms = INITIAL_BACKOFF_MS;
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                debug!("Retry attempt {} after {}ms backoff", attempt, backoff_ms);
                sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }

            match self.write_atomic(&sealed).await {
                Ok(()) => {
                    *written = generation;
                    debug!(
                        generation,
                        "Saved snapshot ({} bytes) to {:?}",
                        sealed.len(),
                        self.path
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!("Snapshot write failed (attempt {}): {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| VaultError::Storage("Max retries exceeded".into())))
    }

    /// Write using temp file + rename so readers never see a torn file.
    async fn write_atomic(&self, data: &[u8]) -> Result<(), VaultError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, data).await?;
        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

/// Snapshot backend that persists or keeps nothing.
pub enum Snapshots {
    /// Sealed file storage
    Sealed(SnapshotFile),
    /// In-memory only (no persistence)
    Memory,
}

impl Snapshots {
    /// Sealed file persistence at `path`.
    pub fn sealed(path: impl Into<PathBuf>, key: SealingKey) -> Self {
        Snapshots::Sealed(SnapshotFile::new(path, key))
    }

    /// No persistence.
    pub fn memory() -> Self {
        Snapshots::Memory
    }

    /// Whether snapshots reach durable storage.
    pub fn is_persistent(&self) -> bool {
        matches!(self, Snapshots::Sealed(_))
    }

    /// Load the last snapshot, if any.
    pub async fn load(&self) -> Result<Option<Vec<u8>>, VaultError> {
        match self {
            Snapshots::Sealed(file) => file.load().await,
            Snapshots::Memory => {
                debug!("Memory snapshots: nothing to load");
                Ok(None)
            }
        }
    }

    /// Save a snapshot.
    pub async fn save(&self, generation: u64, plaintext: &[u8]) -> Result<(), VaultError> {
        match self {
            Snapshots::Sealed(file) => file.save(generation, plaintext).await,
            Snapshots::Memory => Ok(()),
        }
    }
}
