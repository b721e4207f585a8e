// Per-log poller
//
// One poller owns one CT log: it discovers the tree head (or resumes from a
// checkpoint), continuously fetches batches, normalizes every decodable
// entry and pushes the events onto the shared channel. Fatal setup errors
// stop the poller for good; anything else is retried from the current
// cursor after a short sleep.

use crate::checkpoint::CheckpointStore;
use crate::error::CertstreamError;
use crate::models::Entry;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::CtClient;
use super::entry::{decode_api_entry, EntryKind, RawEntry};
use super::log_counts::LogCounts;
use super::normalizer::Normalizer;
use super::registry::{normalize_ct_url, CtLog, LogKind};
use super::tiles;

/// Number of entries requested per get-entries batch
pub const BATCH_SIZE: u64 = 100;

/// Sleep between retries after a transient error
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Sleep while caught up with the log head
const HEAD_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct Poller {
    log: CtLog,
    ct_url: String,
    normalized_url: String,
    normalizer: Normalizer,
    tx: mpsc::Sender<Entry>,
    checkpoints: Arc<CheckpointStore>,
    counts: Arc<LogCounts>,
    resume: bool,
    cursor: Option<u64>,
}

impl Poller {
    pub fn new(
        log: CtLog,
        tx: mpsc::Sender<Entry>,
        checkpoints: Arc<CheckpointStore>,
        counts: Arc<LogCounts>,
        resume: bool,
    ) -> Self {
        // Prepend https:// if no scheme is present and strip the trailing
        // slash; this form is used for all requests and in cert_link.
        let mut ct_url = log.url.trim_end_matches('/').to_string();
        if !ct_url.starts_with("https://") && !ct_url.starts_with("http://") {
            ct_url = format!("https://{}", ct_url);
        }

        let normalized_url = normalize_ct_url(&ct_url);
        let normalizer = Normalizer::new(&log.operator, &log.description, &ct_url);

        Self {
            log,
            ct_url,
            normalized_url,
            normalizer,
            tx,
            checkpoints,
            counts,
            resume,
            cursor: None,
        }
    }

    pub fn normalized_url(&self) -> &str {
        &self.normalized_url
    }

    /// Run until cancellation, a fatal error, or the event channel closes.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Initializing worker for CT log: {}", self.ct_url);

        let client = match CtClient::new(&self.ct_url) {
            Ok(client) => client,
            Err(e) => {
                error!("Worker for '{}' failed: {}", self.ct_url, e);
                return;
            }
        };

        loop {
            let result = match self.log.kind {
                LogKind::Json => self.run_json(&client, &cancel).await,
                LogKind::Tiled => self.run_tiled(&client, &cancel).await,
            };

            match result {
                Ok(()) => break,
                Err(e) if e.is_fatal_for_poller() => {
                    error!("Worker for '{}' failed permanently: {}", self.ct_url, e);
                    break;
                }
                Err(e) => {
                    warn!(
                        "Worker for '{}' failed: {}; retrying in {:?}",
                        self.ct_url, e, RETRY_DELAY
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RETRY_DELAY) => {}
            }
        }

        info!("Stopping worker for CT log: {}", self.ct_url);
    }

    /// The checkpointed index, when resumption is enabled and one exists.
    fn saved_cursor(&self) -> Option<u64> {
        if self.resume && self.checkpoints.contains(&self.normalized_url) {
            Some(self.checkpoints.get(&self.normalized_url))
        } else {
            None
        }
    }

    async fn run_json(&mut self, client: &CtClient, cancel: &CancellationToken) -> Result<()> {
        let mut cursor = match self.cursor.or_else(|| self.saved_cursor()) {
            Some(cursor) => {
                info!("Resuming '{}' from index {}", self.normalized_url, cursor);
                cursor
            }
            None => {
                // Start at the latest STH to skip all past certificates.
                // Failure here is fatal for this poller instance.
                let sth = client
                    .get_sth()
                    .await
                    .map_err(|e| CertstreamError::SthFetch {
                        url: self.ct_url.clone(),
                        message: e.to_string(),
                    })?;
                info!(
                    "Starting '{}' at current tree size {}",
                    self.normalized_url, sth.tree_size
                );
                sth.tree_size
            }
        };
        self.cursor = Some(cursor);

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let tree_size = client.get_sth().await?.tree_size;

            if cursor >= tree_size {
                debug!(
                    "Caught up with '{}' (index {}, tree size {})",
                    self.normalized_url, cursor, tree_size
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(HEAD_POLL_INTERVAL) => {}
                }
                continue;
            }

            let batch_end = (cursor + BATCH_SIZE - 1).min(tree_size - 1);
            let entries = client.get_entries(cursor, batch_end).await?;
            if entries.is_empty() {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(RETRY_DELAY) => {}
                }
                continue;
            }

            for (offset, api_entry) in entries.iter().enumerate() {
                let index = cursor + offset as u64;
                match decode_api_entry(api_entry, index) {
                    Ok(raw) => {
                        if !self.emit(raw).await {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        debug!(
                            "Dropping entry {} from '{}': {}",
                            index, self.normalized_url, e
                        );
                    }
                }
            }

            // Logs may truncate batches; advance by what was actually served.
            cursor += entries.len() as u64;
            self.cursor = Some(cursor);
        }
    }

    async fn run_tiled(&mut self, client: &CtClient, cancel: &CancellationToken) -> Result<()> {
        let mut cursor = match self.cursor.or_else(|| self.saved_cursor()) {
            Some(cursor) => {
                info!("Resuming '{}' from index {}", self.normalized_url, cursor);
                cursor
            }
            None => {
                let size = fetch_tree_size(client).await.map_err(|e| {
                    CertstreamError::SthFetch {
                        url: self.ct_url.clone(),
                        message: e.to_string(),
                    }
                })?;
                info!(
                    "Starting '{}' at current tree size {}",
                    self.normalized_url, size
                );
                size
            }
        };
        self.cursor = Some(cursor);

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let tree_size = fetch_tree_size(client).await?;

            if cursor >= tree_size {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(HEAD_POLL_INTERVAL) => {}
                }
                continue;
            }

            let tile_index = cursor / tiles::TILE_SIZE;
            let tile_start = tile_index * tiles::TILE_SIZE;
            let available = tree_size - tile_start;
            let partial_width = if available < tiles::TILE_SIZE {
                available as u16
            } else {
                0
            };
            let tile_width = if partial_width > 0 {
                partial_width as u64
            } else {
                tiles::TILE_SIZE
            };

            let tile_path = tiles::encode_tile_path(tile_index);
            let data = client.get_tile(&tile_path, partial_width).await?;

            let leaves = match tiles::parse_tile_data(&data) {
                Ok(leaves) => leaves,
                Err(e) => {
                    warn!(
                        "Dropping tile {} from '{}': {}",
                        tile_index, self.normalized_url, e
                    );
                    cursor = tile_start + tile_width;
                    self.cursor = Some(cursor);
                    continue;
                }
            };

            // When resuming mid-tile, skip the leaves already processed.
            let skip = (cursor - tile_start) as usize;
            for (offset, leaf) in leaves.into_iter().enumerate().skip(skip) {
                let raw = leaf.into_raw_entry(tile_start + offset as u64);
                if !self.emit(raw).await {
                    return Ok(());
                }
            }

            cursor = tile_start + tile_width;
            self.cursor = Some(cursor);
        }
    }

    /// Normalize and push one entry. Returns false when the event channel
    /// has closed and the poller should exit.
    async fn emit(&self, raw: RawEntry) -> bool {
        let kind = raw.kind;
        let entry = match self.normalizer.normalize(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(
                    "Dropping entry {} from '{}': {}",
                    raw.index, self.normalized_url, e
                );
                return true;
            }
        };

        if self.tx.send(entry).await.is_err() {
            warn!(
                "Event channel closed, stopping worker for '{}'",
                self.normalized_url
            );
            return false;
        }

        match kind {
            EntryKind::X509 => self.counts.inc_regular(),
            EntryKind::Precert => self.counts.inc_precert(),
        }

        true
    }
}

/// Current tree size of a tiled log, from its checkpoint.
async fn fetch_tree_size(client: &CtClient) -> Result<u64> {
    let text = client.get_checkpoint_text().await?;
    Ok(tiles::parse_checkpoint(&text)?.size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_poller(url: &str, resume: bool, checkpoints: Arc<CheckpointStore>) -> Poller {
        let log = CtLog {
            url: url.to_string(),
            operator: "ExampleOp".to_string(),
            description: "Example log".to_string(),
            kind: LogKind::Json,
        };
        let (tx, _rx) = mpsc::channel(8);
        Poller::new(log, tx, checkpoints, Arc::new(LogCounts::new()), resume)
    }

    #[test]
    fn test_url_normalization_on_construction() {
        let poller = make_poller("ct.example/ct/", false, Arc::new(CheckpointStore::new()));
        assert_eq!(poller.ct_url, "https://ct.example/ct");
        assert_eq!(poller.normalized_url(), "ct.example/ct");

        let poller = make_poller(
            "https://ct.example/ct",
            false,
            Arc::new(CheckpointStore::new()),
        );
        assert_eq!(poller.ct_url, "https://ct.example/ct");
    }

    #[test]
    fn test_saved_cursor_requires_resume_and_existing_entry() {
        let checkpoints = Arc::new(CheckpointStore::new());
        checkpoints.set("ct.example/ct", 100);

        let resuming = make_poller("https://ct.example/ct", true, checkpoints.clone());
        assert_eq!(resuming.saved_cursor(), Some(100));

        let not_resuming = make_poller("https://ct.example/ct", false, checkpoints);
        assert_eq!(not_resuming.saved_cursor(), None);

        let unknown_log = make_poller(
            "https://ct.unknown/ct",
            true,
            Arc::new(CheckpointStore::new()),
        );
        assert_eq!(unknown_log.saved_cursor(), None);
    }
}
