//! Bulk and single issuance task tracking.
//!
//! Rows are ingested into task records when a batch starts, push events are
//! reconciled into those records by a single serial consumer, and progress is
//! read back through snapshots.

pub mod dispatcher;
pub mod event;
pub mod ingest;
pub mod progress;
pub mod reducer;
pub mod task;

pub use dispatcher::{Tracker, TrackerCommand, TrackerHandle, TrackerSnapshot};
pub use event::{StatusEvent, ISSUANCE_STATUS_UPDATE};
pub use ingest::{correlate, ingest, Correlation, IngestDiagnostic, IngestOutcome};
pub use progress::ProgressView;
pub use reducer::{
    display_message, reduce, Applied, BulkOutcome, SingleIssueStatus, TrackerDiagnostics,
    TrackerState,
};
pub use task::{BatchProgress, RowPayload, TaskRecord, TaskStatus};
