//! Database access layer for kmedia-chronicle
//!
//! The pipeline touches a single table, `progress_records`, through lookup by
//! key, insert and update by key. The schema itself lives in
//! `kmedia_common::db`.

pub mod progress;

pub use progress::{ProgressRow, ProgressStore};
