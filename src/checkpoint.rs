// Resumption checkpoint store
//
// Maps normalized log URLs to the last processed entry index. The on-disk
// file is always either absent or a complete valid JSON snapshot: flushes
// write to a temp file, fsync, then atomically rename over the target.

use crate::error::CertstreamError;
use crate::Result;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default interval between periodic flushes.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Durable map of normalized log URL -> last processed index.
#[derive(Debug, Default)]
pub struct CheckpointStore {
    positions: RwLock<HashMap<String, u64>>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the checkpoint file. A missing file is created empty; malformed
    /// JSON is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Checkpoint file '{}' does not exist, creating it", path.display());
            let store = Self::new();
            store.flush(path)?;
            return Ok(store);
        }

        let content = std::fs::read(path).map_err(|e| CertstreamError::CheckpointIo {
            path: path.display().to_string(),
            source: e,
        })?;

        let positions: HashMap<String, u64> =
            serde_json::from_slice(&content).map_err(|e| CertstreamError::CheckpointIo {
                path: path.display().to_string(),
                source: io::Error::new(io::ErrorKind::InvalidData, e),
            })?;

        info!(
            "Loaded {} checkpoint entries from '{}'",
            positions.len(),
            path.display()
        );

        Ok(Self {
            positions: RwLock::new(positions),
        })
    }

    /// Returns the stored position for a log, or 0 if unknown.
    pub fn get(&self, url: &str) -> u64 {
        self.positions
            .read()
            .expect("checkpoint lock poisoned")
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Whether a position has been stored for this log.
    pub fn contains(&self, url: &str) -> bool {
        self.positions
            .read()
            .expect("checkpoint lock poisoned")
            .contains_key(url)
    }

    /// Replace the stored position for a log.
    pub fn set(&self, url: &str, position: u64) {
        self.positions
            .write()
            .expect("checkpoint lock poisoned")
            .insert(url.to_string(), position);
    }

    /// Number of tracked logs.
    pub fn len(&self) -> usize {
        self.positions
            .read()
            .expect("checkpoint lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the current snapshot to disk atomically.
    ///
    /// The snapshot is taken under the read lock and the lock released before
    /// any I/O; writers racing with the flush only affect the next snapshot.
    pub fn flush(&self, path: &Path) -> Result<()> {
        let snapshot = self
            .positions
            .read()
            .expect("checkpoint lock poisoned")
            .clone();

        let data = serde_json::to_vec(&snapshot)?;
        let tmp_path = path.with_extension("json.tmp");

        let io_err = |e: io::Error| CertstreamError::CheckpointIo {
            path: path.display().to_string(),
            source: e,
        };

        let mut file = std::fs::File::create(&tmp_path).map_err(io_err)?;
        file.write_all(&data).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        std::fs::rename(&tmp_path, path).map_err(io_err)?;
        debug!(
            "Flushed {} checkpoint entries to '{}'",
            snapshot.len(),
            path.display()
        );

        Ok(())
    }

    /// Flush every `interval` until the token is cancelled, then once more.
    pub async fn flush_periodically(
        &self,
        path: &Path,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.flush(path) {
                        error!("Periodic checkpoint flush failed: {}", e);
                    }
                }
                _ = cancel.cancelled() => {
                    if let Err(e) = self.flush(path) {
                        error!("Final checkpoint flush failed: {}", e);
                    }
                    return;
                }
            }
        }
    }
}
