// CT log API client
//
// HTTP communication with a single CT log: signed tree head and entry
// batches for classic logs, checkpoint and data tiles for tiled logs.

use crate::error::CertstreamError;
use crate::{Result, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum number of retries for rate limits and server errors
const MAX_RETRIES: u32 = 3;

/// Initial backoff duration (doubled with each retry)
const INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff duration
const MAX_BACKOFF_MS: u64 = 5000;

/// Timeout applied to STH and checkpoint requests
const STH_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client bound to one CT log base URL.
pub struct CtClient {
    http: reqwest::Client,
    base_url: String,
}

impl CtClient {
    /// Create a client for the given log. The base URL must already carry a
    /// scheme and no trailing slash.
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| CertstreamError::ClientCreation {
                url: base_url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the current signed tree head.
    pub async fn get_sth(&self) -> Result<SignedTreeHead> {
        let url = format!("{}/ct/v1/get-sth", self.base_url);
        let response = self
            .retry_request(|| self.http.get(&url).timeout(STH_TIMEOUT).send())
            .await?;

        response.json().await.map_err(|e| CertstreamError::Parse {
            message: format!("could not parse STH response: {}", e),
        })
    }

    /// Fetch entries `[start, end]`. Logs may truncate the batch.
    pub async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<RawApiEntry>> {
        let url = format!(
            "{}/ct/v1/get-entries?start={}&end={}",
            self.base_url, start, end
        );
        debug!("Fetching entries {}-{} from {}", start, end, self.base_url);

        let response = self.retry_request(|| self.http.get(&url).send()).await?;

        let entries: EntriesResponse =
            response.json().await.map_err(|e| CertstreamError::Parse {
                message: format!("could not parse entries response: {}", e),
            })?;

        Ok(entries.entries)
    }

    /// Fetch the three-line checkpoint of a tiled log as text.
    pub async fn get_checkpoint_text(&self) -> Result<String> {
        let url = format!("{}/checkpoint", self.base_url);
        let response = self
            .retry_request(|| self.http.get(&url).timeout(STH_TIMEOUT).send())
            .await?;

        response
            .text()
            .await
            .map_err(|e| CertstreamError::TransientFetch {
                message: format!("could not read checkpoint body: {}", e),
            })
    }

    /// Fetch a raw data tile. `partial_width` of zero requests a full tile;
    /// `1..=255` requests the `.p/<width>` partial form.
    pub async fn get_tile(&self, tile_path: &str, partial_width: u16) -> Result<Vec<u8>> {
        let url = if partial_width > 0 {
            format!(
                "{}/tile/data/{}.p/{}",
                self.base_url, tile_path, partial_width
            )
        } else {
            format!("{}/tile/data/{}", self.base_url, tile_path)
        };

        let response = self.retry_request(|| self.http.get(&url).send()).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| CertstreamError::TransientFetch {
                message: format!("could not read tile body: {}", e),
            })?;

        Ok(body.to_vec())
    }

    /// Retry a request with exponential backoff on rate limits and server
    /// errors. Other client errors fail immediately.
    async fn retry_request<F, Fut>(&self, request_fn: F) -> Result<reqwest::Response>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<reqwest::Response, reqwest::Error>>,
    {
        let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match request_fn().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    } else if status.as_u16() == 429 || status.is_server_error() {
                        warn!(
                            "{} returned {}, retrying after {:?} (attempt {}/{})",
                            self.base_url,
                            status,
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        last_error = Some(format!("status {}", status));
                    } else {
                        return Err(CertstreamError::Http {
                            status: status.as_u16(),
                            details: format!("request to {} failed", self.base_url),
                        });
                    }
                }
                Err(e) => {
                    if attempt == MAX_RETRIES - 1 {
                        return Err(CertstreamError::TransientFetch {
                            message: format!("request to {} failed: {}", self.base_url, e),
                        });
                    }
                    warn!(
                        "Network error for {}: {}, retrying after {:?} (attempt {}/{})",
                        self.base_url,
                        e,
                        backoff,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    last_error = Some(e.to_string());
                }
            }

            tokio::time::sleep(backoff).await;
            backoff = std::cmp::min(backoff * 2, Duration::from_millis(MAX_BACKOFF_MS));
        }

        Err(CertstreamError::TransientFetch {
            message: format!(
                "request to {} failed after {} retries: {}",
                self.base_url,
                MAX_RETRIES,
                last_error.unwrap_or_else(|| "unknown error".to_string())
            ),
        })
    }
}

/// Signed tree head response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    pub timestamp: u64,
    pub sha256_root_hash: String,
    pub tree_head_signature: String,
}

/// get-entries API response
#[derive(Debug, Deserialize, Serialize)]
struct EntriesResponse {
    entries: Vec<RawApiEntry>,
}

/// One undecoded entry from the JSON batch API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawApiEntry {
    pub leaf_input: String,
    pub extra_data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_strips_trailing_slash() {
        let client = CtClient::new("https://ct.example/ct/").unwrap();
        assert_eq!(client.base_url(), "https://ct.example/ct");
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_transient() {
        let client = CtClient::new("https://log.invalid").unwrap();
        let result = client.get_entries(0, 1).await;
        assert!(matches!(
            result,
            Err(CertstreamError::TransientFetch { .. })
        ));
    }
}
