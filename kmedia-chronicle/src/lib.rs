//! kmedia-chronicle library
//!
//! Background ingestion of chronicle playback events into per-account
//! progress records, plus the health endpoint that reports on it.

use axum::Router;
use tokio::sync::watch;

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ChronicleError, Result};

use crate::db::ProgressStore;
use crate::services::PipelineStatus;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Latest snapshot published by the ingest worker
    pub status: watch::Receiver<PipelineStatus>,
}

impl AppState {
    pub fn new(status: watch::Receiver<PipelineStatus>) -> Self {
        Self { status }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .with_state(state)
}

/// Cursor to resume scanning from; empty when nothing was persisted yet
pub async fn load_initial_cursor(store: &ProgressStore) -> Result<String> {
    let cursor = store
        .latest_cursor()
        .await
        .map_err(kmedia_common::Error::Database)?;
    Ok(cursor.unwrap_or_default())
}
