//! Per-account session debouncing
//!
//! Collapses a bursty play/stop stream into at most one write per viewing
//! session. Each account has at most one pending session; it is flushed once
//! it has been open for `wait_for_save` without a newer `player-play`.
//!
//! State changes are two-phase. [`Debouncer::stage`] folds a page into a copy
//! of the state and selects flush candidates; [`Debouncer::commit`] adopts
//! that copy once the candidates are persisted. A cycle whose write fails is
//! dropped, leaving the state exactly as it was before the page.
//!
//! The debouncer is owned by the ingest worker and never shared, so it holds
//! no locks.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::models::{ChronicleEvent, EventType, PendingSession};

/// Debounce timing
#[derive(Debug, Clone)]
pub struct DebounceConfig {
    /// Age a pending session must reach before it is flushed
    pub wait_for_save: Duration,
    /// How long a flushed session keeps suppressing its late `player-stop`
    pub late_stop_retention: Duration,
}

/// Remembers a session flushed by timeout
#[derive(Debug, Clone, PartialEq)]
struct FlushedMarker {
    unit_uid: Option<String>,
    flushed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct DebounceState {
    pending: HashMap<String, PendingSession>,
    flushed: HashMap<String, FlushedMarker>,
    /// `now` of the last adopted cycle; sessions older than the window at
    /// this instant were already due for flushing
    last_refresh: Option<DateTime<Utc>>,
}

/// Per-page counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldStats {
    /// Play/stop events that opened, extended or replaced a session
    pub accepted: usize,
    /// Events of other types
    pub ignored: usize,
    /// Stops whose pending session was past the window at the previous refresh
    pub stale_stops: usize,
    /// Stops for a session that was already flushed
    pub late_stops: usize,
    /// Sessions selected for persistence
    pub flushed: usize,
}

/// Result of folding one page, not yet adopted
#[derive(Debug)]
pub struct StagedCycle {
    state: DebounceState,
    candidates: Vec<PendingSession>,
    stats: FoldStats,
}

impl StagedCycle {
    /// Sessions to persist, ordered by account id
    pub fn candidates(&self) -> &[PendingSession] {
        &self.candidates
    }

    pub fn stats(&self) -> FoldStats {
        self.stats
    }

    /// Pending sessions that remain after this cycle's flush
    pub fn pending_count(&self) -> usize {
        self.state.pending.len()
    }
}

pub struct Debouncer {
    config: DebounceConfig,
    state: DebounceState,
}

impl Debouncer {
    pub fn new(config: DebounceConfig) -> Self {
        Self {
            config,
            state: DebounceState::default(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.state.pending.len()
    }

    pub fn pending(&self, account_id: &str) -> Option<&PendingSession> {
        self.state.pending.get(account_id)
    }

    /// Fold `events` (in log order) observed at `now` and select flush candidates
    pub fn stage(&self, events: &[ChronicleEvent], now: DateTime<Utc>) -> StagedCycle {
        let mut state = self.state.clone();
        let mut stats = FoldStats::default();

        for event in events {
            self.fold_event(&mut state, &mut stats, event, now);
        }

        let candidates = self.flush(&mut state, now);
        stats.flushed = candidates.len();

        self.prune_markers(&mut state, now);
        state.last_refresh = Some(now);

        debug!(
            accepted = stats.accepted,
            ignored = stats.ignored,
            stale_stops = stats.stale_stops,
            late_stops = stats.late_stops,
            flushed = stats.flushed,
            pending = state.pending.len(),
            "Folded chronicle page"
        );

        StagedCycle {
            state,
            candidates,
            stats,
        }
    }

    /// Adopt a staged cycle after its candidates were persisted
    pub fn commit(&mut self, staged: StagedCycle) {
        self.state = staged.state;
    }

    fn fold_event(
        &self,
        state: &mut DebounceState,
        stats: &mut FoldStats,
        event: &ChronicleEvent,
        now: DateTime<Utc>,
    ) {
        if !event.event_type.is_playback() {
            stats.ignored += 1;
            return;
        }

        let account_id = &event.account_id;
        let is_play = event.event_type == EventType::PlayerPlay;

        let session_start = state.pending.get(account_id).map(|prev| prev.first_seen_at);
        let boundary = state.last_refresh;

        let first_seen_at = match session_start {
            None => {
                if !is_play && is_late_stop(state, event) {
                    trace!(account_id = %account_id, event_id = %event.event_id, "Late stop suppressed");
                    stats.late_stops += 1;
                    return;
                }
                now
            }
            Some(started) => {
                // Measured at the previous refresh, not at `now`: a session
                // crossing the window during this page is still flushed below
                let stale = boundary
                    .is_some_and(|refreshed| age(refreshed, started) > self.config.wait_for_save);
                if !is_play && stale {
                    trace!(account_id = %account_id, event_id = %event.event_id, "Stale session dropped on stop");
                    state.pending.remove(account_id);
                    stats.stale_stops += 1;
                    return;
                }
                if is_play {
                    now
                } else {
                    started
                }
            }
        };

        if is_play {
            state.flushed.remove(account_id);
        }

        state.pending.insert(
            account_id.clone(),
            PendingSession {
                event: event.clone(),
                first_seen_at,
            },
        );
        stats.accepted += 1;
    }

    fn flush(&self, state: &mut DebounceState, now: DateTime<Utc>) -> Vec<PendingSession> {
        let ready: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, session)| age(now, session.first_seen_at) >= self.config.wait_for_save)
            .map(|(account_id, _)| account_id.clone())
            .collect();

        let mut candidates = Vec::with_capacity(ready.len());
        for account_id in ready {
            if let Some(session) = state.pending.remove(&account_id) {
                state.flushed.insert(
                    account_id,
                    FlushedMarker {
                        unit_uid: session.event.unit_uid().map(str::to_string),
                        flushed_at: now,
                    },
                );
                candidates.push(session);
            }
        }

        candidates.sort_by(|a, b| a.account_id().cmp(b.account_id()));
        candidates
    }

    fn prune_markers(&self, state: &mut DebounceState, now: DateTime<Utc>) {
        let retention = self.config.late_stop_retention;
        state
            .flushed
            .retain(|_, marker| age(now, marker.flushed_at) <= retention);
    }
}

/// A stop whose session was already flushed for the same unit
fn is_late_stop(state: &DebounceState, event: &ChronicleEvent) -> bool {
    state
        .flushed
        .get(&event.account_id)
        .is_some_and(|marker| marker.unit_uid.as_deref() == event.unit_uid())
}

/// Elapsed wall-clock time, zero if `since` is in the future
fn age(now: DateTime<Utc>, since: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or(Duration::ZERO)
}
