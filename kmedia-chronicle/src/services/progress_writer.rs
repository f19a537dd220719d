//! Aggregating progress writer
//!
//! Persists one cycle's flush candidates in a single transaction. Each
//! candidate is merged into the `(account_id, unit_uid)` record: new keys
//! overwrite, keys the candidate does not carry are kept.
//!
//! Payload problems are the candidate's own fault and only drop that
//! candidate. Anything that goes wrong against the store (lookup, stored data
//! that no longer decodes, the write itself) rolls back the whole batch.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use crate::db::ProgressStore;
use crate::error::{PayloadError, WriteError};
use crate::models::{EventPayload, PendingSession};

/// Stored account ids are UUID-sized
pub const ACCOUNT_ID_MAX_LEN: usize = 36;

/// Outcome of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WriteSummary {
    pub inserted: usize,
    pub updated: usize,
    /// Candidates dropped for an unusable payload
    pub rejected: usize,
}

impl WriteSummary {
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// A candidate reduced to what gets written
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCandidate {
    pub account_id: String,
    pub unit_uid: String,
    pub cursor_ref: String,
    pub created_at: DateTime<Utc>,
    /// Calendar day of the event in the client's time zone
    pub local_day: NaiveDate,
    pub fields: Map<String, Value>,
}

/// Validate a flushed session's payload and extract the persisted fields
pub fn prepare_candidate(session: &PendingSession) -> Result<PreparedCandidate, PayloadError> {
    let event = &session.event;
    let raw = event.payload.clone().unwrap_or(Value::Null);
    let payload: EventPayload =
        serde_json::from_value(raw).map_err(|e| PayloadError::InvalidJson(e.to_string()))?;

    let unit_uid = payload
        .unit_uid
        .clone()
        .filter(|uid| !uid.trim().is_empty())
        .ok_or(PayloadError::MissingUnitUid)?;

    let time_zone = resolve_time_zone(payload.time_zone.as_deref())?;
    let local_day = event.created_at.with_timezone(&time_zone).date_naive();

    Ok(PreparedCandidate {
        account_id: normalize_account_id(&event.account_id).to_string(),
        unit_uid,
        cursor_ref: event.event_id.clone(),
        created_at: event.created_at,
        local_day,
        fields: payload.persisted_fields(),
    })
}

/// IANA zone lookup; a missing or empty name means UTC
pub fn resolve_time_zone(name: Option<&str>) -> Result<Tz, PayloadError> {
    match name.map(str::trim) {
        None | Some("") => Ok(Tz::UTC),
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| PayloadError::UnknownTimeZone(name.to_string())),
    }
}

/// First [`ACCOUNT_ID_MAX_LEN`] characters of an account id
pub fn normalize_account_id(account_id: &str) -> &str {
    match account_id.char_indices().nth(ACCOUNT_ID_MAX_LEN) {
        Some((idx, _)) => &account_id[..idx],
        None => account_id,
    }
}

/// Shallow merge: `incoming` wins on collisions, other keys are kept
pub fn merge_data(existing: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        existing.insert(key.clone(), value.clone());
    }
}

pub struct ProgressWriter {
    store: ProgressStore,
}

impl ProgressWriter {
    pub fn new(store: ProgressStore) -> Self {
        Self { store }
    }

    /// Persist one cycle's candidates, all or nothing
    pub async fn write_batch(
        &self,
        candidates: &[PendingSession],
        now: DateTime<Utc>,
    ) -> Result<WriteSummary, WriteError> {
        let mut summary = WriteSummary::default();
        let mut prepared = Vec::with_capacity(candidates.len());

        for session in candidates {
            match prepare_candidate(session) {
                Ok(candidate) => prepared.push(candidate),
                Err(e) => {
                    summary.rejected += 1;
                    warn!(
                        account_id = %session.event.account_id,
                        event_id = %session.event.event_id,
                        error = %e,
                        "Dropping flush candidate with unusable payload"
                    );
                }
            }
        }

        if prepared.is_empty() {
            return Ok(summary);
        }

        let mut tx = self.store.pool().begin().await?;

        match apply_batch(&mut tx, &prepared, now, &mut summary).await {
            Ok(()) => {
                tx.commit().await?;
                info!(
                    inserted = summary.inserted,
                    updated = summary.updated,
                    rejected = summary.rejected,
                    "Progress batch committed"
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback after failed batch also failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }
}

async fn apply_batch(
    conn: &mut SqliteConnection,
    prepared: &[PreparedCandidate],
    now: DateTime<Utc>,
    summary: &mut WriteSummary,
) -> Result<(), WriteError> {
    for candidate in prepared {
        let existing =
            ProgressStore::find(&mut *conn, &candidate.account_id, &candidate.unit_uid).await?;

        match existing {
            None => {
                let data = encode(&candidate.fields)?;
                ProgressStore::insert(
                    &mut *conn,
                    &candidate.account_id,
                    &candidate.unit_uid,
                    &candidate.cursor_ref,
                    &data,
                    &candidate.created_at,
                    &now,
                )
                .await?;
                summary.inserted += 1;
            }
            Some(row) => {
                let mut stored: Map<String, Value> =
                    serde_json::from_str(&row.data).map_err(|e| WriteError::StoredData {
                        account_id: candidate.account_id.clone(),
                        unit_uid: candidate.unit_uid.clone(),
                        reason: e.to_string(),
                    })?;
                merge_data(&mut stored, &candidate.fields);
                let data = encode(&stored)?;
                ProgressStore::update(
                    &mut *conn,
                    &candidate.account_id,
                    &candidate.unit_uid,
                    &candidate.cursor_ref,
                    &data,
                    &now,
                )
                .await?;
                summary.updated += 1;
            }
        }

        debug!(
            account_id = %candidate.account_id,
            unit_uid = %candidate.unit_uid,
            cursor_ref = %candidate.cursor_ref,
            local_day = %candidate.local_day,
            "Progress merged"
        );
    }

    Ok(())
}

fn encode(data: &Map<String, Value>) -> Result<String, WriteError> {
    serde_json::to_string(data).map_err(|e| WriteError::Encode(e.to_string()))
}
