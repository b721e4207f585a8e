// Application configuration
//
// Loaded from a YAML file. Missing values fall back to serde defaults;
// validation rejects combinations the server cannot run with.

use crate::error::CertstreamError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default URL of the authoritative CT log list.
pub const DEFAULT_LOG_LIST_URL: &str = "https://www.gstatic.com/ct/log_list/v3/log_list.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub webserver: WebserverConfig,
    pub prometheus: PrometheusConfig,
    pub general: GeneralConfig,
    pub stream_processing: Vec<StreamProcessorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebserverConfig {
    pub listen_addr: String,
    pub listen_port: u16,
    pub full_url: String,
    pub lite_url: String,
    pub domains_only_url: String,
}

impl Default for WebserverConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            listen_port: 8080,
            full_url: "/full-stream".to_string(),
            lite_url: "/".to_string(),
            domains_only_url: "/domains-only".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub listen_port: u16,
    pub metrics_url: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: String::new(),
            listen_port: 0,
            metrics_url: "/metrics".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Stop polling logs that disappear from the log list
    pub drop_old_logs: bool,
    /// Only poll logs from `additional_logs`, skip the public list
    pub disable_default_logs: bool,
    pub log_list_url: String,
    pub additional_logs: Vec<AdditionalLogConfig>,
    pub buffer_sizes: BufferSizes,
    pub recovery: RecoveryConfig,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            drop_old_logs: false,
            disable_default_logs: false,
            log_list_url: DEFAULT_LOG_LIST_URL.to_string(),
            additional_logs: Vec::new(),
            buffer_sizes: BufferSizes::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

/// A user-supplied CT log merged into the registry on every refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdditionalLogConfig {
    pub operator: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSizes {
    /// Per-websocket-client payload queue
    pub websocket: usize,
    /// Central event channel between pollers and the dispatcher
    pub dispatcher: usize,
    /// Per-log fetch buffer
    pub ct_log: usize,
}

impl Default for BufferSizes {
    fn default() -> Self {
        Self {
            websocket: 300,
            dispatcher: 10_000,
            ct_log: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Resume each log from its persisted index instead of the current STH
    pub enabled: bool,
    pub ct_index_file: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ct_index_file: "ct_index.json".to_string(),
        }
    }
}

/// A downstream message-bus producer fed from the dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamProcessorConfig {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub server_addr: String,
    pub server_port: u16,
    pub topic: String,
}

impl Config {
    /// Read the config file and return a validated Config.
    ///
    /// If the given path does not exist, the alternate YAML extension
    /// (`.yml` <-> `.yaml`) is tried before giving up.
    pub fn load(path: &Path) -> Result<Self> {
        let resolved = resolve_config_path(path)?;
        info!("Reading config file '{}'", resolved.display());

        let content =
            std::fs::read_to_string(&resolved).map_err(|e| CertstreamError::Config {
                message: format!("could not read '{}': {}", resolved.display(), e),
            })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML config document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(content).map_err(|e| CertstreamError::Config {
            message: format!("invalid YAML: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.webserver.listen_addr.parse::<IpAddr>().is_err() {
            return Err(CertstreamError::Config {
                message: format!(
                    "webserver listen address is not a valid IP: '{}'",
                    self.webserver.listen_addr
                ),
            });
        }

        if self.webserver.listen_port == 0 {
            return Err(CertstreamError::Config {
                message: "webserver listen port is not set".to_string(),
            });
        }

        for url in [
            &self.webserver.full_url,
            &self.webserver.lite_url,
            &self.webserver.domains_only_url,
        ] {
            if !url.starts_with('/') {
                return Err(CertstreamError::Config {
                    message: format!("websocket path does not start with '/': '{}'", url),
                });
            }
        }

        if self.webserver.full_url == self.webserver.lite_url {
            return Err(CertstreamError::Config {
                message: "full URL is the same as lite URL".to_string(),
            });
        }

        if self.prometheus.enabled {
            if !self.prometheus.listen_addr.is_empty()
                && self.prometheus.listen_addr.parse::<IpAddr>().is_err()
            {
                return Err(CertstreamError::Config {
                    message: format!(
                        "metrics listen address is not a valid IP: '{}'",
                        self.prometheus.listen_addr
                    ),
                });
            }

            if !self.prometheus.metrics_url.starts_with('/') {
                return Err(CertstreamError::Config {
                    message: format!(
                        "metrics path does not start with '/': '{}'",
                        self.prometheus.metrics_url
                    ),
                });
            }
        }

        if self.general.disable_default_logs && self.general.additional_logs.is_empty() {
            warn!("default logs disabled and no additional logs configured; nothing to poll");
        }

        for processor in &self.stream_processing {
            if processor.enabled && processor.kind != "kafka" {
                return Err(CertstreamError::Config {
                    message: format!(
                        "unknown stream processor type '{}' for '{}'",
                        processor.kind, processor.name
                    ),
                });
            }
        }

        Ok(())
    }

    /// Whether the metrics endpoint shares the websocket server's interface.
    pub fn metrics_on_webserver(&self) -> bool {
        (self.prometheus.listen_addr.is_empty()
            || self.prometheus.listen_addr == self.webserver.listen_addr)
            && (self.prometheus.listen_port == 0
                || self.prometheus.listen_port == self.webserver.listen_port)
    }
}

fn resolve_config_path(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }

    let alternate = match path.extension().and_then(|e| e.to_str()) {
        Some("yml") => path.with_extension("yaml"),
        Some("yaml") => path.with_extension("yml"),
        _ => {
            return Err(CertstreamError::Config {
                message: format!("config file '{}' does not exist", path.display()),
            })
        }
    };

    if alternate.exists() {
        return Ok(alternate);
    }

    Err(CertstreamError::Config {
        message: format!(
            "config file '{}' does not exist (also tried '{}')",
            path.display(),
            alternate.display()
        ),
    })
}
