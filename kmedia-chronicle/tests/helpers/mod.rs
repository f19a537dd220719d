//! Test helpers for kmedia-chronicle integration tests
//!
//! - FakeChronicle: in-process scan endpoint with failure injection
//! - Temporary progress database and worker construction
//! - Wire-shaped event builders

#![allow(dead_code)]

pub mod fake_chronicle;

pub use fake_chronicle::FakeChronicle;

use chrono::{DateTime, TimeZone, Utc};
use kmedia_chronicle::config::PipelineConfig;
use kmedia_chronicle::db::ProgressStore;
use kmedia_chronicle::services::{HttpScanClient, IngestWorker, PipelineStatus, ProgressWriter};
use kmedia_common::db::init_database;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

/// Reference wall-clock time for test cycles
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(secs)
}

/// Chronicle entry in scan-endpoint JSON shape
pub fn wire_event(id: &str, account: &str, event_type: &str, unit: &str, current_time: i64) -> Value {
    json!({
        "user_id": account,
        "id": id,
        "created_at": "2024-05-01T09:59:00Z",
        "client_event_type": event_type,
        "user_agent": "test-player/1.0",
        "data": {"unit_uid": unit, "time_zone": "UTC", "current_time": current_time}
    })
}

pub fn pipeline_config(page_size: usize, wait_for_save: Duration) -> PipelineConfig {
    PipelineConfig {
        page_size,
        min_interval: Duration::from_millis(100),
        max_interval: Duration::from_secs(60),
        wait_for_save,
        request_timeout: Duration::from_secs(5),
        late_stop_retention: Duration::from_secs(3600),
    }
}

pub async fn temp_store() -> (TempDir, ProgressStore) {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("kmedia.db")).await.unwrap();
    (dir, ProgressStore::new(pool))
}

/// Worker scanning `scan_url`, writing into `store`
pub fn http_worker(
    scan_url: &str,
    store: &ProgressStore,
    config: &PipelineConfig,
    cursor: &str,
) -> (IngestWorker<HttpScanClient>, watch::Receiver<PipelineStatus>) {
    let source = HttpScanClient::new(scan_url, config.request_timeout).unwrap();
    IngestWorker::new(
        source,
        ProgressWriter::new(store.clone()),
        config,
        cursor.to_string(),
    )
}

/// Stored `data` of one progress record
pub async fn stored_data(store: &ProgressStore, account: &str, unit: &str) -> Option<Map<String, Value>> {
    let row = store.get(account, unit).await.unwrap()?;
    Some(row.decode().unwrap().data)
}

/// Insert a row whose `data` column is not valid JSON
pub async fn insert_corrupt_record(store: &ProgressStore, account: &str, unit: &str) {
    sqlx::query(
        "INSERT INTO progress_records (account_id, unit_uid, cursor_ref, data, created_at, updated_at) \
         VALUES (?, ?, 'old', 'not json', '2024-01-01T00:00:00+00:00', '2024-01-01T00:00:00+00:00')",
    )
    .bind(account)
    .bind(unit)
    .execute(store.pool())
    .await
    .unwrap();
}
