//! Timestamp utilities

use chrono::{DateTime, Utc};

use crate::{Error, Result};

/// Format a timestamp the way it is stored in TEXT columns
pub fn to_db_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parse a timestamp stored by [`to_db_timestamp`]
pub fn from_db_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Decode(format!("Invalid timestamp '{}': {}", value, e)))
}
