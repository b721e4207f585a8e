// Log-set manager
//
// Maintains exactly one poller per CT log, keyed by normalized URL. The set
// is reconciled against the registry on startup and once per refresh
// interval; on shutdown all pollers are cancelled and awaited before the
// checkpoint store is flushed and the event channel closed.

use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::models::Entry;
use crate::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::client::CtClient;
use super::log_counts::LogCounts;
use super::poller::Poller;
use super::registry::{normalize_ct_url, CtLog, LogRegistry};
use super::tiles;

/// Interval between log list refreshes
const REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

struct ActivePoller {
    operator: String,
    cancel: CancellationToken,
}

pub struct Watcher {
    registry: LogRegistry,
    config: Config,
    tx: mpsc::Sender<Entry>,
    checkpoints: Arc<CheckpointStore>,
    counts: Arc<LogCounts>,
    active: Mutex<HashMap<String, ActivePoller>>,
    tasks: Mutex<JoinSet<String>>,
}

impl Watcher {
    pub fn new(
        config: Config,
        tx: mpsc::Sender<Entry>,
        checkpoints: Arc<CheckpointStore>,
        counts: Arc<LogCounts>,
    ) -> Result<Self> {
        let registry = LogRegistry::new(&config.general)?;

        Ok(Self {
            registry,
            config,
            tx,
            checkpoints,
            counts,
            active: Mutex::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
        })
    }

    /// Run until the token is cancelled. Blocking; drives the refresh ticker
    /// and owns the poller lifecycle.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.update_logs(&cancel).await;
        info!("Started CT watcher");

        let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.reap_finished();
                    self.update_logs(&cancel).await;
                }
                _ = cancel.cancelled() => break,
            }
        }

        self.shutdown().await;
    }

    /// Reconcile the active poller set with the current registry snapshot.
    async fn update_logs(self: &Arc<Self>, cancel: &CancellationToken) {
        info!("Checking for new CT logs...");

        let logs = match self.registry.refresh().await {
            Ok(logs) => logs,
            Err(e) => {
                error!("{}", e);
                return;
            }
        };

        let added = self.add_new_logs(&logs, cancel);
        let removed = if self.config.general.drop_old_logs {
            self.drop_removed_logs(&logs)
        } else {
            0
        };

        let monitored = self.active.lock().expect("watcher lock poisoned").len();
        info!(
            "New CT logs found: {}; removed: {}; currently monitored: {}",
            added, removed, monitored
        );
    }

    /// Start a poller for every registry log that has none yet. Pollers are
    /// constructed and inserted under the lock, then launched; the lock is
    /// never held across I/O.
    fn add_new_logs(self: &Arc<Self>, logs: &[CtLog], cancel: &CancellationToken) -> usize {
        let mut active = self.active.lock().expect("watcher lock poisoned");
        let mut tasks = self.tasks.lock().expect("watcher tasks lock poisoned");
        let mut added = 0;

        for log in logs {
            let normalized = log.normalized_url();
            if active.contains_key(&normalized) {
                continue;
            }

            let poller = Poller::new(
                log.clone(),
                self.tx.clone(),
                self.checkpoints.clone(),
                self.counts.clone(),
                self.config.general.recovery.enabled,
            );
            self.counts.init(&log.operator, &normalized);

            let child = cancel.child_token();
            active.insert(
                normalized.clone(),
                ActivePoller {
                    operator: log.operator.clone(),
                    cancel: child.clone(),
                },
            );

            added += 1;
            let watcher = Arc::clone(self);
            tasks.spawn(async move {
                let url = poller.normalized_url().to_string();
                poller.run(child).await;
                watcher.discard_worker(&url);
                url
            });
        }

        added
    }

    /// Free a stopped poller's slot so a registry refresh can start a fresh
    /// instance for that log.
    fn discard_worker(&self, normalized_url: &str) {
        let mut active = self.active.lock().expect("watcher lock poisoned");
        if active.remove(normalized_url).is_some() {
            info!("Removing worker for CT log: {}", normalized_url);
        }
    }

    /// Cancel pollers whose log vanished from the registry, unless the log
    /// is user-supplied.
    fn drop_removed_logs(&self, logs: &[CtLog]) -> usize {
        let current: Vec<String> = logs.iter().map(|l| l.normalized_url()).collect();
        let user_supplied: Vec<String> = self
            .config
            .general
            .additional_logs
            .iter()
            .map(|l| normalize_ct_url(&l.url))
            .collect();

        let active = self.active.lock().expect("watcher lock poisoned");
        let mut removed = 0;

        for (url, poller) in active.iter() {
            if current.contains(url) || user_supplied.contains(url) {
                continue;
            }

            warn!("Stopping worker; CT URL no longer on the log list: '{}'", url);
            poller.cancel.cancel();
            removed += 1;
        }

        removed
    }

    /// Drain join handles of pollers that have already exited.
    fn reap_finished(&self) {
        let mut tasks = self.tasks.lock().expect("watcher tasks lock poisoned");
        while tasks.try_join_next().is_some() {}
    }

    /// Cancel all pollers, wait for them, flush checkpoints, close the
    /// event channel by dropping the sender.
    async fn shutdown(self: Arc<Self>) {
        info!("Stopping watcher");

        {
            let active = self.active.lock().expect("watcher lock poisoned");
            for poller in active.values() {
                poller.cancel.cancel();
            }
        }

        // JoinSet cannot be awaited while behind the mutex; take it out.
        let mut tasks = {
            let mut guard = self.tasks.lock().expect("watcher tasks lock poisoned");
            std::mem::take(&mut *guard)
        };
        while tasks.join_next().await.is_some() {}

        if self.config.general.recovery.enabled {
            let path = PathBuf::from(&self.config.general.recovery.ct_index_file);
            if let Err(e) = self.checkpoints.flush(&path) {
                error!("Final checkpoint flush failed: {}", e);
            }
        }

        // Dropping the watcher drops its event sender; the dispatcher exits
        // once all poller senders are gone as well.
    }

    /// Operator name for an active log, for metrics.
    pub fn operator_of(&self, normalized_url: &str) -> Option<String> {
        self.active
            .lock()
            .expect("watcher lock poisoned")
            .get(normalized_url)
            .map(|p| p.operator.clone())
    }
}

/// Fetch the current STH for every registry log and write a fresh
/// checkpoint file. Used by the --create-index-file bootstrap.
pub async fn create_index_file(
    config: &Config,
    store: &CheckpointStore,
    path: &std::path::Path,
) -> Result<()> {
    let registry = LogRegistry::new(&config.general)?;
    let logs = registry.refresh().await?;

    info!("Fetching current STH for {} logs...", logs.len());

    for log in &logs {
        let mut url = log.url.trim_end_matches('/').to_string();
        if !url.starts_with("https://") && !url.starts_with("http://") {
            url = format!("https://{}", url);
        }
        let normalized = normalize_ct_url(&url);

        let client = match CtClient::new(&url) {
            Ok(client) => client,
            Err(e) => {
                warn!("Skipping '{}': {}", normalized, e);
                continue;
            }
        };

        let size = match log.kind {
            super::registry::LogKind::Json => client.get_sth().await.map(|sth| sth.tree_size),
            super::registry::LogKind::Tiled => {
                match client.get_checkpoint_text().await {
                    Ok(text) => tiles::parse_checkpoint(&text).map(|cp| cp.size),
                    Err(e) => Err(e),
                }
            }
        };

        match size {
            Ok(size) => {
                info!("STH for '{}': {}", normalized, size);
                store.set(&normalized, size);
            }
            Err(e) => warn!("Could not get STH for '{}': {}", normalized, e),
        }
    }

    store.flush(path)?;
    info!("Index file saved to {}", path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::registry::LogKind;

    fn watcher_with_config(config: Config) -> Arc<Watcher> {
        let (tx, _rx) = mpsc::channel(16);
        Arc::new(
            Watcher::new(
                config,
                tx,
                Arc::new(CheckpointStore::new()),
                Arc::new(LogCounts::new()),
            )
            .unwrap(),
        )
    }

    fn example_log(url: &str) -> CtLog {
        CtLog {
            url: url.to_string(),
            operator: "ExampleOp".to_string(),
            description: "Example log".to_string(),
            kind: LogKind::Json,
        }
    }

    #[tokio::test]
    async fn test_exactly_one_poller_per_log() {
        let watcher = watcher_with_config(Config::default());
        let cancel = CancellationToken::new();

        let logs = vec![
            example_log("https://ct.example/ct/"),
            // Same log under a different spelling
            example_log("ct.example/ct"),
        ];

        let added = watcher.add_new_logs(&logs, &cancel);
        assert_eq!(added, 1);

        // A second reconciliation adds nothing
        let added = watcher.add_new_logs(&logs, &cancel);
        assert_eq!(added, 0);

        assert_eq!(
            watcher.operator_of("ct.example/ct"),
            Some("ExampleOp".to_string())
        );

        cancel.cancel();
        watcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_drop_removed_logs_spares_user_supplied() {
        let mut config = Config::default();
        config.general.drop_old_logs = true;
        config
            .general
            .additional_logs
            .push(crate::config::AdditionalLogConfig {
                operator: "Private".to_string(),
                url: "https://private.example/log".to_string(),
                description: String::new(),
            });

        let watcher = watcher_with_config(config);
        let cancel = CancellationToken::new();

        let logs = vec![
            example_log("https://ct.example/ct"),
            example_log("https://private.example/log"),
        ];
        watcher.add_new_logs(&logs, &cancel);

        // The public log disappears from the registry
        let removed = watcher.drop_removed_logs(&[]);
        assert_eq!(removed, 1);

        let active = watcher.active.lock().unwrap();
        if let Some(poller) = active.get("ct.example/ct") {
            assert!(poller.cancel.is_cancelled());
        }
        if let Some(poller) = active.get("private.example/log") {
            assert!(!poller.cancel.is_cancelled());
        }
        drop(active);

        cancel.cancel();
        watcher.shutdown().await;
    }
}
