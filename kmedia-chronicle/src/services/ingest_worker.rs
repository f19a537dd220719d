//! Chronicle ingest worker
//!
//! One task owns the cursor, the poll schedule and the debouncer. Each cycle
//! runs strictly in sequence:
//!
//! 1. scan one page after the current cursor
//! 2. stage the page in the debouncer and select flush candidates
//! 3. write the candidates in one transaction
//! 4. on commit, adopt the staged debouncer state and advance the cursor
//!
//! A failure at step 1 or 3 leaves cursor and debouncer untouched, so the next
//! allowed tick re-reads the same page. Failures are logged and never stop the
//! loop; only cancellation does.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::PipelineConfig;
use crate::error::{ChronicleError, Result, WriteError};
use crate::services::debouncer::{Debouncer, FoldStats};
use crate::services::poll_schedule::PollSchedule;
use crate::services::progress_writer::{ProgressWriter, WriteSummary};
use crate::services::scan_client::ChronicleSource;

/// Snapshot published after every attempted cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub cursor: String,
    pub interval_ms: u64,
    pub pending_sessions: usize,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    /// Failed cycles since the last successful one
    pub consecutive_failures: u64,
    pub records_inserted: u64,
    pub records_updated: u64,
    pub candidates_rejected: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// What one successful cycle did
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Entries returned by the scan, including malformed ones
    pub entries: usize,
    pub malformed: usize,
    pub fold: FoldStats,
    pub write: WriteSummary,
    /// Cursor after the cycle
    pub cursor: String,
}

/// Result of one timer tick
#[derive(Debug)]
pub enum TickOutcome {
    /// The schedule did not allow a scan yet
    Skipped,
    Completed(CycleReport),
    Failed(String),
}

pub struct IngestWorker<S: ChronicleSource> {
    source: S,
    writer: ProgressWriter,
    debouncer: Debouncer,
    schedule: PollSchedule,
    page_size: usize,
    cursor: String,
    status: PipelineStatus,
    status_tx: watch::Sender<PipelineStatus>,
}

impl<S: ChronicleSource> IngestWorker<S> {
    /// Create a worker resuming from `initial_cursor` (empty = from the start)
    ///
    /// Returns the status receiver for the health endpoint.
    pub fn new(
        source: S,
        writer: ProgressWriter,
        config: &PipelineConfig,
        initial_cursor: String,
    ) -> (Self, watch::Receiver<PipelineStatus>) {
        let schedule = PollSchedule::new(config.min_interval, config.max_interval);
        let status = PipelineStatus {
            cursor: initial_cursor.clone(),
            interval_ms: schedule.interval().as_millis() as u64,
            ..PipelineStatus::default()
        };
        let (status_tx, status_rx) = watch::channel(status.clone());

        let worker = Self {
            source,
            writer,
            debouncer: Debouncer::new(config.debounce()),
            schedule,
            page_size: config.page_size,
            cursor: initial_cursor,
            status,
            status_tx,
        };

        (worker, status_rx)
    }

    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    pub fn schedule(&self) -> &PollSchedule {
        &self.schedule
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    pub fn status(&self) -> &PipelineStatus {
        &self.status
    }

    /// Fetch, fold and persist one page observed at wall-clock `now`
    ///
    /// Does not consult or update the poll schedule.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        let page = self.source.scan(&self.cursor, self.page_size).await?;

        let staged = self.debouncer.stage(&page.events, now);
        let fold = staged.stats();
        let write = self.writer.write_batch(staged.candidates(), now).await?;

        self.debouncer.commit(staged);
        if let Some(cursor) = page.last_cursor {
            self.cursor = cursor;
        }

        Ok(CycleReport {
            entries: page.raw_count,
            malformed: page.malformed,
            fold,
            write,
            cursor: self.cursor.clone(),
        })
    }

    /// Handle one timer tick at monotonic `now_instant` / wall-clock `now`
    pub async fn tick(&mut self, now_instant: Instant, now: DateTime<Utc>) -> TickOutcome {
        if !self.schedule.is_due(now_instant) {
            return TickOutcome::Skipped;
        }

        let outcome = match self.run_cycle(now).await {
            Ok(report) => {
                let next_interval =
                    self.schedule
                        .record_page(report.entries, self.page_size, now_instant);
                debug!(
                    cursor = %report.cursor,
                    entries = report.entries,
                    flushed = report.fold.flushed,
                    interval_ms = next_interval.as_millis() as u64,
                    "Chronicle cycle complete"
                );

                self.status.cycles_completed += 1;
                self.status.records_inserted += report.write.inserted as u64;
                self.status.records_updated += report.write.updated as u64;
                self.status.candidates_rejected += report.write.rejected as u64;
                self.status.consecutive_failures = 0;
                self.status.last_error = None;
                TickOutcome::Completed(report)
            }
            Err(e) => {
                let next_interval = self.schedule.record_failure(now_instant);
                self.status.consecutive_failures += 1;
                error!(
                    cursor = %self.cursor,
                    interval_ms = next_interval.as_millis() as u64,
                    consecutive_failures = self.status.consecutive_failures,
                    "Chronicle cycle failed: {}",
                    e
                );

                // Retrying cannot clear an undecodable row; ingestion stays
                // blocked on it until the record is repaired
                if let ChronicleError::Write(WriteError::StoredData {
                    account_id,
                    unit_uid,
                    ..
                }) = &e
                {
                    error!(
                        account_id = %account_id,
                        unit_uid = %unit_uid,
                        attempts = self.status.consecutive_failures,
                        "Ingestion blocked by unreadable progress record"
                    );
                }

                self.status.cycles_failed += 1;
                self.status.last_error = Some(e.to_string());
                TickOutcome::Failed(e.to_string())
            }
        };

        self.status.cursor = self.cursor.clone();
        self.status.interval_ms = self.schedule.interval().as_millis() as u64;
        self.status.pending_sessions = self.debouncer.pending_count();
        self.status.last_cycle_at = Some(now);
        self.status_tx.send_replace(self.status.clone());

        outcome
    }

    /// Drive ticks at the minimum interval until `cancel` fires
    ///
    /// A cycle in progress always finishes before the loop exits.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            cursor = %self.cursor,
            page_size = self.page_size,
            min_interval_ms = self.schedule.min_interval().as_millis() as u64,
            "Chronicle ingest worker started"
        );

        let mut timer = interval(self.schedule.min_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {
                    self.tick(Instant::now(), Utc::now()).await;
                }
            }
        }

        info!(
            cursor = %self.cursor,
            pending_sessions = self.debouncer.pending_count(),
            "Chronicle ingest worker stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProgressStore;
    use crate::error::ScanError;
    use crate::services::scan_client::{decode_entries, ScanPage};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted scan results, then empty pages
    #[derive(Default)]
    struct ScriptedSource {
        pages: Mutex<VecDeque<std::result::Result<ScanPage, ScanError>>>,
        cursors: Mutex<Vec<String>>,
    }

    impl ScriptedSource {
        fn with(pages: Vec<std::result::Result<ScanPage, ScanError>>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                cursors: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChronicleSource for ScriptedSource {
        async fn scan(&self, cursor: &str, _limit: usize) -> std::result::Result<ScanPage, ScanError> {
            self.cursors.lock().unwrap().push(cursor.to_string());
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ScanPage::default()))
        }
    }

    fn page(ids: &[&str]) -> ScanPage {
        decode_entries(
            ids.iter()
                .map(|id| {
                    json!({
                        "user_id": "acc-1",
                        "id": id,
                        "created_at": "2024-05-01T09:00:00Z",
                        "client_event_type": "player-play",
                        "data": {"unit_uid": "u1", "current_time": 1}
                    })
                })
                .collect(),
        )
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            page_size: 2,
            ..PipelineConfig::default()
        }
    }

    async fn worker(
        source: ScriptedSource,
        cursor: &str,
    ) -> (tempfile::TempDir, IngestWorker<ScriptedSource>, watch::Receiver<PipelineStatus>) {
        let dir = tempfile::tempdir().unwrap();
        let pool = kmedia_common::db::init_database(&dir.path().join("test.db"))
            .await
            .unwrap();
        let writer = ProgressWriter::new(ProgressStore::new(pool));
        let (worker, rx) = IngestWorker::new(source, writer, &config(), cursor.to_string());
        (dir, worker, rx)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_initial_status_carries_resume_cursor() {
        let (_dir, worker, rx) = worker(ScriptedSource::default(), "0099").await;

        assert_eq!(worker.cursor(), "0099");
        assert_eq!(rx.borrow().cursor, "0099");
        assert_eq!(rx.borrow().interval_ms, 100);
    }

    #[tokio::test]
    async fn test_empty_page_keeps_cursor() {
        let (_dir, mut worker, _rx) = worker(ScriptedSource::default(), "0007").await;

        let report = worker.run_cycle(t0()).await.unwrap();

        assert_eq!(report.entries, 0);
        assert_eq!(report.cursor, "0007");
    }

    #[tokio::test]
    async fn test_scan_error_retries_same_cursor() {
        let source = ScriptedSource::with(vec![
            Err(ScanError::Timeout(Duration::from_secs(30))),
            Ok(page(&["0001", "0002"])),
        ]);
        let (_dir, mut worker, rx) = worker(source, "").await;
        let start = Instant::now();

        let outcome = worker.tick(start, t0()).await;
        assert!(matches!(outcome, TickOutcome::Failed(_)));
        assert_eq!(rx.borrow().cycles_failed, 1);

        let retry_at = start + worker.schedule().interval();
        let outcome = worker.tick(retry_at, t0()).await;
        match outcome {
            TickOutcome::Completed(report) => {
                assert_eq!(report.entries, 2);
                assert_eq!(report.cursor, "0002");
            }
            other => panic!("expected completed cycle, got {:?}", other),
        }

        assert_eq!(*worker.source.cursors.lock().unwrap(), vec!["", ""]);
        // Full page after a failure halves back toward the minimum
        assert_eq!(worker.schedule().interval(), Duration::from_millis(100));
        assert!(rx.borrow().last_error.is_none());
        assert_eq!(rx.borrow().pending_sessions, 1);
    }

    #[tokio::test]
    async fn test_tick_before_next_allowed_run_is_skipped() {
        let (_dir, mut worker, rx) = worker(ScriptedSource::default(), "").await;
        let start = Instant::now();

        assert!(matches!(worker.tick(start, t0()).await, TickOutcome::Completed(_)));
        assert!(matches!(
            worker.tick(start + Duration::from_millis(10), t0()).await,
            TickOutcome::Skipped
        ));
        assert_eq!(rx.borrow().cycles_completed, 1);
    }
}
