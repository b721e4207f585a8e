// CT log registry
//
// Fetches the authoritative log list, discards retired logs and merges
// user-supplied logs. The registry holds no mutable state; every refresh
// produces a fresh snapshot.

use crate::config::{AdditionalLogConfig, GeneralConfig};
use crate::error::CertstreamError;
use crate::{Result, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identity key for a CT log: scheme and trailing slash stripped.
pub fn normalize_ct_url(input: &str) -> String {
    let stripped = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
        .unwrap_or(input);
    stripped.trim_end_matches('/').to_lowercase()
}

/// How entries are read from a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Classic JSON API: get-sth / get-entries
    Json,
    /// Static tiled API: checkpoint + binary data tiles
    Tiled,
}

/// One usable CT log from the registry snapshot.
#[derive(Debug, Clone)]
pub struct CtLog {
    pub url: String,
    pub operator: String,
    pub description: String,
    pub kind: LogKind,
}

impl CtLog {
    pub fn normalized_url(&self) -> String {
        normalize_ct_url(&self.url)
    }
}

/// Fetches and merges the current set of CT logs.
pub struct LogRegistry {
    client: reqwest::Client,
    list_url: String,
    additional: Vec<AdditionalLogConfig>,
    disable_default_logs: bool,
}

impl LogRegistry {
    pub fn new(general: &GeneralConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CertstreamError::Config {
                message: format!("could not build log list client: {}", e),
            })?;

        Ok(Self {
            client,
            list_url: general.log_list_url.clone(),
            additional: general.additional_logs.clone(),
            disable_default_logs: general.disable_default_logs,
        })
    }

    /// Fetch the current log list and return all non-retired logs merged
    /// with the user-supplied ones.
    ///
    /// Fails only when the remote fetch fails and no user-supplied logs are
    /// configured.
    pub async fn refresh(&self) -> Result<Vec<CtLog>> {
        let mut logs = if self.disable_default_logs {
            Vec::new()
        } else {
            match self.fetch_log_list().await {
                Ok(logs) => logs,
                Err(e) if self.additional.is_empty() => return Err(e),
                Err(e) => {
                    warn!("Log list fetch failed, using additional logs only: {}", e);
                    Vec::new()
                }
            }
        };

        merge_additional_logs(&mut logs, &self.additional);
        info!("Log registry refreshed: {} logs", logs.len());

        Ok(logs)
    }

    async fn fetch_log_list(&self) -> Result<Vec<CtLog>> {
        debug!("Fetching CT log list from {}", self.list_url);

        let response = self
            .client
            .get(&self.list_url)
            .send()
            .await
            .map_err(|e| CertstreamError::RegistryFetch {
                message: format!("request failed: {}", e),
            })?;

        if !response.status().is_success() {
            return Err(CertstreamError::RegistryFetch {
                message: format!("log list request returned status {}", response.status()),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| CertstreamError::RegistryFetch {
                message: format!("could not read log list body: {}", e),
            })?;

        parse_log_list(&body)
    }
}

/// Parse the v3 log list JSON into usable logs, dropping retired ones.
pub fn parse_log_list(data: &[u8]) -> Result<Vec<CtLog>> {
    let list: LogList = serde_json::from_slice(data).map_err(|e| CertstreamError::RegistryFetch {
        message: format!("could not parse log list: {}", e),
    })?;

    let mut logs = Vec::new();

    for operator in &list.operators {
        for log in &operator.logs {
            if log.state.as_ref().is_some_and(LogListState::is_retired) {
                debug!("Skipping retired CT log: {}", normalize_ct_url(&log.url));
                continue;
            }

            logs.push(CtLog {
                url: log.url.clone(),
                operator: operator.name.clone(),
                description: log
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("{} CT Log", operator.name)),
                kind: LogKind::Json,
            });
        }

        for log in &operator.tiled_logs {
            if log.state.as_ref().is_some_and(LogListState::is_retired) {
                debug!(
                    "Skipping retired tiled CT log: {}",
                    normalize_ct_url(&log.monitoring_url)
                );
                continue;
            }

            logs.push(CtLog {
                url: log.monitoring_url.clone(),
                operator: operator.name.clone(),
                description: log
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("{} CT Log", operator.name)),
                kind: LogKind::Tiled,
            });
        }
    }

    Ok(logs)
}

/// Merge user-supplied logs into the snapshot, unique by normalized URL.
pub fn merge_additional_logs(logs: &mut Vec<CtLog>, additional: &[AdditionalLogConfig]) {
    for extra in additional {
        let normalized = normalize_ct_url(&extra.url);
        if logs.iter().any(|l| l.normalized_url() == normalized) {
            continue;
        }

        logs.push(CtLog {
            url: extra.url.clone(),
            operator: extra.operator.clone(),
            description: extra.description.clone(),
            kind: LogKind::Json,
        });
    }
}

// v3 log list JSON structures. State keys are presence markers: the log's
// status is whichever key exists.
#[derive(Debug, Deserialize)]
struct LogList {
    operators: Vec<LogListOperator>,
}

#[derive(Debug, Deserialize)]
struct LogListOperator {
    name: String,
    #[serde(default)]
    logs: Vec<LogListLog>,
    #[serde(default)]
    tiled_logs: Vec<LogListTiledLog>,
}

#[derive(Debug, Deserialize)]
struct LogListLog {
    description: Option<String>,
    url: String,
    state: Option<LogListState>,
}

#[derive(Debug, Deserialize)]
struct LogListTiledLog {
    description: Option<String>,
    monitoring_url: String,
    state: Option<LogListState>,
}

#[derive(Debug, Default, Deserialize)]
struct LogListState {
    retired: Option<serde_json::Value>,
}

impl LogListState {
    fn is_retired(&self) -> bool {
        self.retired.is_some()
    }
}
