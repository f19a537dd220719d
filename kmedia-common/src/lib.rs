//! # kmedia Common Library
//!
//! Shared code for kmedia background services:
//! - Error type used across crates
//! - TOML bootstrap configuration loading
//! - Database pool initialization and schema
//! - Timestamp helpers

pub mod config;
pub mod db;
pub mod error;
pub mod time;

pub use error::{Error, Result};
