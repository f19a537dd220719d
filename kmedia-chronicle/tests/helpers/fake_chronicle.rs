//! In-process chronicle scan endpoint
//!
//! Serves `POST /scan` from an in-memory log: entries with an id greater than
//! the request cursor, up to `limit`. Ids compare as strings, so tests use
//! zero-padded ids. Every request body is recorded.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct FakeLog {
    entries: Vec<Value>,
    fail_with: Option<StatusCode>,
    requests: Vec<Value>,
}

#[derive(Clone, Default)]
pub struct FakeChronicle {
    inner: Arc<Mutex<FakeLog>>,
}

impl FakeChronicle {
    /// Bind to an ephemeral port and return the scan URL
    pub async fn start(&self) -> String {
        let app = Router::new()
            .route("/scan", post(scan_handler))
            .with_state(self.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}/scan", addr)
    }

    pub fn push(&self, entries: impl IntoIterator<Item = Value>) {
        self.inner.lock().unwrap().entries.extend(entries);
    }

    /// Answer every request with `status` until cleared with `None`
    pub fn fail_with(&self, status: Option<StatusCode>) {
        self.inner.lock().unwrap().fail_with = status;
    }

    pub fn requests(&self) -> Vec<Value> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// Cursors of all requests so far
    pub fn requested_cursors(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r["id"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

async fn scan_handler(State(fake): State<FakeChronicle>, Json(body): Json<Value>) -> Response {
    let mut log = fake.inner.lock().unwrap();
    log.requests.push(body.clone());

    if let Some(status) = log.fail_with {
        return (status, "scan unavailable").into_response();
    }

    let cursor = body["id"].as_str().unwrap_or_default().to_string();
    let limit = body["limit"].as_u64().unwrap_or(1000) as usize;

    let entries: Vec<Value> = log
        .entries
        .iter()
        .filter(|entry| entry["id"].as_str().unwrap_or_default() > cursor.as_str())
        .take(limit)
        .cloned()
        .collect();

    Json(json!({ "entries": entries })).into_response()
}
