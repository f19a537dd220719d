//! Pipeline services
//!
//! Scanner (`scan_client`, `poll_schedule`) → Debouncer (`debouncer`) →
//! Writer (`progress_writer`), driven by `ingest_worker`.

pub mod debouncer;
pub mod ingest_worker;
pub mod poll_schedule;
pub mod progress_writer;
pub mod scan_client;

pub use debouncer::{DebounceConfig, Debouncer, FoldStats, StagedCycle};
pub use ingest_worker::{CycleReport, IngestWorker, PipelineStatus, TickOutcome};
pub use poll_schedule::PollSchedule;
pub use progress_writer::{ProgressWriter, WriteSummary};
pub use scan_client::{ChronicleSource, HttpScanClient, ScanPage};
