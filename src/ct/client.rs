//! HTTP clients for the CT ecosystem: the published log list and the
//! per-log v1 API (get-sth, get-entries).

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Sentinel prefix on `connect_url` marking a log that must be fetched
/// with TLS verification disabled. Some older logs are still up but serve
/// broken certificates.
pub const INSECURE_PREFIX: &str = "insecure-skip-verify-";

/// One entry of the published log list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogListEntry {
    pub url: String,
    #[serde(default)]
    pub disqualified_at: i64,
    #[serde(default)]
    pub final_sth: Option<FinalSth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalSth {
    pub tree_size: i64,
}

#[derive(Debug, Deserialize)]
struct LogList {
    logs: Vec<LogListEntry>,
}

/// Fetch the published JSON list of known logs.
pub async fn fetch_log_list(http: &reqwest::Client, url: &str) -> Result<Vec<LogListEntry>> {
    let response = http
        .get(url)
        .send()
        .await
        .context("Failed to fetch CT log list")?;

    if !response.status().is_success() {
        anyhow::bail!("bad status from log list endpoint: {}", response.status());
    }

    let list: LogList = response
        .json()
        .await
        .context("Failed to parse CT log list")?;

    Ok(list.logs)
}

/// A log's signed tree head. Only the size matters here; signature and
/// root hash verification are out of scope.
#[derive(Debug, Clone, Deserialize)]
pub struct SignedTreeHead {
    pub tree_size: u64,
}

#[derive(Debug, Deserialize)]
struct GetEntriesResponse {
    entries: Vec<RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    leaf_input: String,
}

/// Client for one log's `/ct/v1` endpoints.
pub struct LogClient {
    base: String,
    http: reqwest::Client,
}

impl LogClient {
    /// Build a client for a `connect_url`, honoring the insecure sentinel.
    pub fn for_connect_url(connect_url: &str) -> Result<Self> {
        let (host, insecure) = split_insecure_prefix(connect_url);

        let mut builder =
            reqwest::Client::builder().timeout(std::time::Duration::from_secs(30));
        if insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let http = builder.build().context("Failed to create log HTTP client")?;

        Ok(Self {
            base: format!("https://{}", host.trim_end_matches('/')),
            http,
        })
    }

    pub async fn get_sth(&self) -> Result<SignedTreeHead> {
        let url = format!("{}/ct/v1/get-sth", self.base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch STH from {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("bad status from {}: {}", url, response.status());
        }

        response.json().await.context("Failed to parse STH")
    }

    /// Fetch raw leaves for the inclusive index range `[start, end]`.
    /// Servers may return fewer entries than requested.
    pub async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<Vec<u8>>> {
        let url = format!("{}/ct/v1/get-entries", self.base);
        let response = self
            .http
            .get(&url)
            .query(&[("start", start), ("end", end)])
            .send()
            .await
            .with_context(|| format!("Failed to fetch entries from {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!("bad status from {}: {}", url, response.status());
        }

        let body: GetEntriesResponse = response
            .json()
            .await
            .context("Failed to parse get-entries response")?;

        body.entries
            .iter()
            .map(|entry| {
                BASE64
                    .decode(&entry.leaf_input)
                    .context("invalid base64 leaf_input")
            })
            .collect()
    }
}

/// Strip the insecure sentinel, reporting whether it was present.
pub fn split_insecure_prefix(connect_url: &str) -> (&str, bool) {
    match connect_url.strip_prefix(INSECURE_PREFIX) {
        Some(rest) => (rest, true),
        None => (connect_url, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insecure_prefix_is_stripped() {
        let (host, insecure) = split_insecure_prefix("insecure-skip-verify-ct.example.com/log");
        assert_eq!(host, "ct.example.com/log");
        assert!(insecure);
    }

    #[test]
    fn plain_url_passes_through() {
        let (host, insecure) = split_insecure_prefix("ct.example.com/log");
        assert_eq!(host, "ct.example.com/log");
        assert!(!insecure);
    }

    #[test]
    fn client_base_url_trims_trailing_slash() {
        let client = LogClient::for_connect_url("ct.example.com/pilot/").unwrap();
        assert_eq!(client.base, "https://ct.example.com/pilot");
    }

    #[test]
    fn log_list_entry_defaults_for_missing_fields() {
        let entry: LogListEntry = serde_json::from_str(r#"{"url": "ct.example.com/"}"#).unwrap();
        assert_eq!(entry.disqualified_at, 0);
        assert!(entry.final_sth.is_none());
    }

    #[test]
    fn log_list_entry_parses_final_sth() {
        let entry: LogListEntry = serde_json::from_str(
            r#"{"url": "ct.example.com/", "disqualified_at": 5, "final_sth": {"tree_size": 100}}"#,
        )
        .unwrap();
        assert_eq!(entry.disqualified_at, 5);
        assert_eq!(entry.final_sth.unwrap().tree_size, 100);
    }
}
