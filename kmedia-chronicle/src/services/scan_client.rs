//! Chronicle scan endpoint client
//!
//! `POST <scan_url>` with `{"id": "<cursor>", "limit": <n>}` returns the
//! events after the cursor as `{"entries": [...]}`.
//!
//! Entries are decoded one by one. A malformed entry is skipped with a
//! warning but its `id` still counts toward the page cursor, so one bad
//! event can never pin the scan in place.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ScanError;
use crate::models::ChronicleEvent;

const USER_AGENT: &str = concat!("kmedia-chronicle/", env!("CARGO_PKG_VERSION"));

/// One fetched page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    /// Decoded events in log order
    pub events: Vec<ChronicleEvent>,
    /// Id of the last entry in the page, decodable or not
    pub last_cursor: Option<String>,
    /// Number of entries the endpoint returned (drives the poll cadence)
    pub raw_count: usize,
    /// Entries skipped because they could not be decoded
    pub malformed: usize,
}

impl ScanPage {
    pub fn is_empty(&self) -> bool {
        self.raw_count == 0
    }
}

/// Source of chronicle pages
///
/// The worker only depends on this trait; production uses [`HttpScanClient`].
#[async_trait]
pub trait ChronicleSource: Send + Sync {
    async fn scan(&self, cursor: &str, limit: usize) -> Result<ScanPage, ScanError>;
}

#[derive(Debug, Serialize)]
struct ScanRequest<'a> {
    id: &'a str,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct ScanResponse {
    #[serde(default)]
    entries: Option<Vec<Value>>,
}

/// HTTP client for the chronicle scan endpoint
pub struct HttpScanClient {
    http_client: reqwest::Client,
    scan_url: String,
    timeout: Duration,
}

impl HttpScanClient {
    /// Build a client whose every request is bounded by `timeout`
    pub fn new(scan_url: impl Into<String>, timeout: Duration) -> Result<Self, ScanError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ScanError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            scan_url: scan_url.into(),
            timeout,
        })
    }

    fn map_request_error(&self, err: reqwest::Error) -> ScanError {
        if err.is_timeout() {
            ScanError::Timeout(self.timeout)
        } else {
            ScanError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl ChronicleSource for HttpScanClient {
    async fn scan(&self, cursor: &str, limit: usize) -> Result<ScanPage, ScanError> {
        debug!(cursor = cursor, limit = limit, "Scanning chronicle entries");

        let response = self
            .http_client
            .post(&self.scan_url)
            .json(&ScanRequest { id: cursor, limit })
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ScanError::Status(status.as_u16(), error_text));
        }

        let body: ScanResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ScanError::Timeout(self.timeout)
            } else {
                ScanError::Decode(e.to_string())
            }
        })?;

        Ok(decode_entries(body.entries.unwrap_or_default()))
    }
}

/// Decode raw entries, skipping the ones that do not fit [`ChronicleEvent`]
pub fn decode_entries(entries: Vec<Value>) -> ScanPage {
    let raw_count = entries.len();
    let mut page = ScanPage {
        raw_count,
        ..ScanPage::default()
    };

    for entry in entries {
        if let Some(id) = entry.get("id").and_then(Value::as_str) {
            page.last_cursor = Some(id.to_string());
        }

        match serde_json::from_value::<ChronicleEvent>(entry) {
            Ok(event) => page.events.push(event),
            Err(e) => {
                page.malformed += 1;
                warn!(
                    cursor = page.last_cursor.as_deref().unwrap_or(""),
                    error = %e,
                    "Skipping malformed chronicle entry"
                );
            }
        }
    }

    page
}
