//! HTTP surface of kmedia-chronicle (health only)

pub mod health;

pub use health::{health_check, health_routes, HealthResponse};
