//! Progress record database operations

use chrono::{DateTime, Utc};
use kmedia_common::time::{from_db_timestamp, to_db_timestamp};
use kmedia_common::Error;
use serde_json::{Map, Value};
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use crate::models::ProgressRecord;

/// Raw `progress_records` row, before `data` and timestamps are decoded
#[derive(Debug, Clone, FromRow)]
pub struct ProgressRow {
    pub account_id: String,
    pub unit_uid: String,
    pub cursor_ref: String,
    pub data: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ProgressRow {
    /// Decode stored JSON and timestamps
    pub fn decode(&self) -> kmedia_common::Result<ProgressRecord> {
        let data: Map<String, Value> = serde_json::from_str(&self.data).map_err(|e| {
            Error::Decode(format!(
                "data of {}/{}: {}",
                self.account_id, self.unit_uid, e
            ))
        })?;
        let created_at = from_db_timestamp(&self.created_at)?;
        let updated_at = from_db_timestamp(&self.updated_at)?;

        Ok(ProgressRecord {
            account_id: self.account_id.clone(),
            unit_uid: self.unit_uid.clone(),
            cursor_ref: self.cursor_ref.clone(),
            data,
            created_at,
            updated_at,
        })
    }
}

/// Handle to the progress table
///
/// Pool-level reads are methods; the writes used inside the writer's
/// transaction are associated functions taking a connection.
#[derive(Clone)]
pub struct ProgressStore {
    pool: SqlitePool,
}

impl ProgressStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cursor checkpoint to resume scanning from
    ///
    /// The `cursor_ref` of the last record written (highest `write_seq`), or
    /// `None` when nothing has been persisted yet.
    pub async fn latest_cursor(&self) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT cursor_ref FROM progress_records ORDER BY write_seq DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM progress_records")
            .fetch_one(&self.pool)
            .await
    }

    /// Fetch one row outside of a transaction
    pub async fn get(
        &self,
        account_id: &str,
        unit_uid: &str,
    ) -> Result<Option<ProgressRow>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::find(&mut conn, account_id, unit_uid).await
    }

    pub async fn find(
        conn: &mut SqliteConnection,
        account_id: &str,
        unit_uid: &str,
    ) -> Result<Option<ProgressRow>, sqlx::Error> {
        sqlx::query_as::<_, ProgressRow>(
            r#"
            SELECT account_id, unit_uid, cursor_ref, data, created_at, updated_at
            FROM progress_records
            WHERE account_id = ? AND unit_uid = ?
            "#,
        )
        .bind(account_id)
        .bind(unit_uid)
        .fetch_optional(&mut *conn)
        .await
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        account_id: &str,
        unit_uid: &str,
        cursor_ref: &str,
        data: &str,
        created_at: &DateTime<Utc>,
        updated_at: &DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO progress_records (
                account_id, unit_uid, cursor_ref, data, created_at, updated_at, write_seq
            ) VALUES (
                ?, ?, ?, ?, ?, ?,
                (SELECT COALESCE(MAX(write_seq), 0) + 1 FROM progress_records)
            )
            "#,
        )
        .bind(account_id)
        .bind(unit_uid)
        .bind(cursor_ref)
        .bind(data)
        .bind(to_db_timestamp(created_at))
        .bind(to_db_timestamp(updated_at))
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn update(
        conn: &mut SqliteConnection,
        account_id: &str,
        unit_uid: &str,
        cursor_ref: &str,
        data: &str,
        updated_at: &DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE progress_records
            SET cursor_ref = ?, data = ?, updated_at = ?,
                write_seq = (SELECT COALESCE(MAX(write_seq), 0) + 1 FROM progress_records)
            WHERE account_id = ? AND unit_uid = ?
            "#,
        )
        .bind(cursor_ref)
        .bind(data)
        .bind(to_db_timestamp(updated_at))
        .bind(account_id)
        .bind(unit_uid)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kmedia_common::db::init_database;

    async fn setup_store() -> (tempfile::TempDir, ProgressStore) {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("progress.db")).await.unwrap();
        (dir, ProgressStore::new(pool))
    }

    #[tokio::test]
    async fn test_latest_cursor_empty_table() {
        let (_dir, store) = setup_store().await;
        assert_eq!(store.latest_cursor().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_latest_cursor_follows_most_recent_write() {
        let (_dir, store) = setup_store().await;
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        // Same timestamp, cursors whose string order disagrees with write order
        let mut conn = store.pool().acquire().await.unwrap();
        ProgressStore::insert(&mut conn, "a", "u1", "c-9", "{}", &t1, &t1).await.unwrap();
        ProgressStore::insert(&mut conn, "b", "u1", "c-10", "{}", &t1, &t1).await.unwrap();
        assert_eq!(store.latest_cursor().await.unwrap().as_deref(), Some("c-10"));

        ProgressStore::update(&mut conn, "a", "u1", "c-11", "{}", &t1).await.unwrap();
        assert_eq!(store.latest_cursor().await.unwrap().as_deref(), Some("c-11"));
    }

    #[tokio::test]
    async fn test_latest_cursor_ignores_timestamps() {
        let (_dir, store) = setup_store().await;
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let mut conn = store.pool().acquire().await.unwrap();
        ProgressStore::insert(&mut conn, "a", "u1", "first", "{}", &late, &late).await.unwrap();
        ProgressStore::insert(&mut conn, "b", "u1", "second", "{}", &early, &early).await.unwrap();

        assert_eq!(store.latest_cursor().await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_update_replaces_data_and_cursor() {
        let (_dir, store) = setup_store().await;
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();

        let mut conn = store.pool().acquire().await.unwrap();
        ProgressStore::insert(&mut conn, "a", "u1", "c1", r#"{"current_time":1}"#, &t1, &t1)
            .await
            .unwrap();
        ProgressStore::update(&mut conn, "a", "u1", "c2", r#"{"current_time":2}"#, &t2)
            .await
            .unwrap();
        drop(conn);

        let record = store.get("a", "u1").await.unwrap().unwrap().decode().unwrap();
        assert_eq!(record.cursor_ref, "c2");
        assert_eq!(record.data.get("current_time"), Some(&serde_json::json!(2)));
        assert_eq!(record.created_at, t1);
        assert_eq!(record.updated_at, t2);
    }

    #[test]
    fn test_decode_rejects_non_object_data() {
        let row = ProgressRow {
            account_id: "a".to_string(),
            unit_uid: "u1".to_string(),
            cursor_ref: "c1".to_string(),
            data: "not json".to_string(),
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
            updated_at: "2024-01-01T00:00:00+00:00".to_string(),
        };

        assert!(matches!(row.decode(), Err(Error::Decode(_))));
    }
}
