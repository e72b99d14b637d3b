//! Status reconciliation.
//!
//! [`TrackerState`] owns the bulk task map, the batch counters and the view
//! of the most recent single submission. Every push event goes through
//! [`TrackerState::apply`], which updates the single view and the bulk map
//! independently and counts each task's terminal transition at most once.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;

use crate::sanitize::truncate_hash;
use crate::tracking::event::StatusEvent;
use crate::tracking::ingest::{IngestDiagnostic, IngestOutcome};
use crate::tracking::progress::ProgressView;
use crate::tracking::task::{BatchProgress, TaskRecord, TaskStatus};

/// Characters of a transaction hash shown in single-issue messages.
const TX_HASH_DISPLAY_LEN: usize = 10;

// ─── Single submission ──────────────────────────────────────────────────────

/// View of the most recent single-certificate submission.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SingleIssueStatus {
    pub task_id: String,
    pub status: TaskStatus,
    pub is_loading: bool,
    pub is_success: bool,
    pub is_error: bool,
    /// Display message built from the latest event.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl SingleIssueStatus {
    /// View right after the server acknowledged a submission.
    pub fn submitted(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Queued,
            is_loading: true,
            is_success: false,
            is_error: false,
            message: "Certificate submitted, waiting for the issuance queue".to_string(),
            hash: None,
            tx_hash: None,
            error: None,
            last_updated: Utc::now(),
        }
    }

    fn apply(&mut self, event: &StatusEvent) {
        self.status = event.status;
        self.is_loading = event.status.is_in_flight();
        self.is_success = event.status == TaskStatus::Success;
        self.is_error = event.status == TaskStatus::Failed;
        self.message = display_message(event);
        if let Some(hash) = event.hash() {
            self.hash = Some(hash.to_string());
        }
        if let Some(tx_hash) = event.tx_hash() {
            self.tx_hash = Some(tx_hash.to_string());
        }
        self.error = event.error().map(str::to_string);
        self.last_updated = event.timestamp;
    }
}

/// Builds the user-facing message for a single-issue event: the server
/// message, then a shortened transaction hash, then the error.
pub fn display_message(event: &StatusEvent) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(message) = event.message.as_deref().filter(|m| !m.is_empty()) {
        parts.push(message.to_string());
    }
    if let Some(tx_hash) = event.tx_hash() {
        parts.push(format!("(tx: {})", truncate_hash(tx_hash, TX_HASH_DISPLAY_LEN)));
    }
    if let Some(error) = event.error() {
        parts.push(format!("Error: {}", error));
    }
    parts.join(" ")
}

// ─── Outcome ────────────────────────────────────────────────────────────────

/// What the bulk path did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOutcome {
    /// The task id is not in the bulk map.
    NotTracked,
    /// The event names a batch other than the current one.
    Stale,
    /// Fields updated, counters untouched.
    Updated,
    /// Fields updated and the terminal transition counted.
    Counted(TaskStatus),
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub single_updated: bool,
    pub bulk: BulkOutcome,
}

impl Applied {
    /// True when neither path recognized the event.
    pub fn is_dropped(&self) -> bool {
        !self.single_updated && matches!(self.bulk, BulkOutcome::NotTracked | BulkOutcome::Stale)
    }
}

/// Counts of events the reducer could not place.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerDiagnostics {
    /// Events for task ids nothing tracks (e.g. delivered before ingestion).
    pub dropped_unknown: u64,
    /// Events tagged with a batch other than the current one.
    pub dropped_stale: u64,
    /// Repeated terminal events that were not counted again.
    pub repeated_terminal: u64,
}

// ─── State ──────────────────────────────────────────────────────────────────

/// Tracking state for one session.
#[derive(Debug, Clone, Default)]
pub struct TrackerState {
    generation: u64,
    batch_id: Option<String>,
    tasks: HashMap<String, TaskRecord>,
    /// Task ids whose terminal transition has been counted.
    counted: HashSet<String>,
    progress: BatchProgress,
    single: Option<SingleIssueStatus>,
    ingest_diagnostics: Vec<IngestDiagnostic>,
    diagnostics: TrackerDiagnostics,
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation; bumped by every reset.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn batch_id(&self) -> Option<&str> {
        self.batch_id.as_deref()
    }

    pub fn progress(&self) -> BatchProgress {
        self.progress
    }

    pub fn progress_view(&self) -> ProgressView {
        ProgressView::from(&self.progress)
    }

    pub fn single(&self) -> Option<&SingleIssueStatus> {
        self.single.as_ref()
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.get(task_id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Tracked tasks ordered by row number.
    pub fn tasks(&self) -> Vec<TaskRecord> {
        let mut tasks: Vec<TaskRecord> = self.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| {
            a.row_number
                .cmp(&b.row_number)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        tasks
    }

    pub fn ingest_diagnostics(&self) -> &[IngestDiagnostic] {
        &self.ingest_diagnostics
    }

    pub fn diagnostics(&self) -> TrackerDiagnostics {
        self.diagnostics
    }

    /// Clears the bulk map and counters and starts a new generation.
    ///
    /// Events for the cleared tasks that arrive afterwards no longer match
    /// anything and are dropped.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.batch_id = None;
        self.tasks.clear();
        self.counted.clear();
        self.progress = BatchProgress::default();
        self.ingest_diagnostics.clear();
        debug!("Tracker reset, generation {}", self.generation);
    }

    /// Returns the generation a batch about to be started must carry.
    ///
    /// The displayed batch stays in place until the new one is installed, so
    /// a rejected start leaves it untouched.
    pub fn begin_batch(&self) -> u64 {
        self.generation
    }

    /// Installs an ingested batch if `generation` is still current, replacing
    /// the previous batch and starting a new generation.
    ///
    /// Returns false (and changes nothing) when a reset or another batch
    /// happened after the batch was started.
    pub fn ingest(&mut self, generation: u64, outcome: IngestOutcome) -> bool {
        if generation != self.generation {
            warn!(
                "Discarding batch {} for generation {} (current {})",
                outcome.batch_id, generation, self.generation
            );
            return false;
        }

        self.generation += 1;
        self.batch_id = Some(outcome.batch_id);
        self.tasks = outcome.tasks;
        self.counted.clear();
        self.progress = outcome.progress;
        self.ingest_diagnostics = outcome.diagnostics;
        true
    }

    /// Starts tracking a single submission, replacing any previous one.
    pub fn track_single(&mut self, task_id: &str) {
        self.single = Some(SingleIssueStatus::submitted(task_id));
    }

    pub fn reset_single(&mut self) {
        self.single = None;
    }

    /// Applies one status event to both tracking paths.
    pub fn apply(&mut self, event: &StatusEvent) -> Applied {
        let single_updated = match self.single.as_mut() {
            Some(single) if single.task_id == event.task_id => {
                single.apply(event);
                true
            }
            _ => false,
        };

        let bulk = self.apply_bulk(event);

        match bulk {
            BulkOutcome::NotTracked if !single_updated => {
                self.diagnostics.dropped_unknown += 1;
                warn!(
                    "Dropping {} event for unknown task {}",
                    event.status.as_str(),
                    event.task_id
                );
            }
            BulkOutcome::Stale if !single_updated => {
                self.diagnostics.dropped_stale += 1;
                debug!(
                    "Dropping stale event for task {} (batch {:?})",
                    event.task_id, event.batch_id
                );
            }
            _ => {}
        }

        Applied {
            single_updated,
            bulk,
        }
    }

    fn apply_bulk(&mut self, event: &StatusEvent) -> BulkOutcome {
        let current = self.batch_id.as_deref();
        if let (Some(event_batch), Some(current)) = (event.batch_id.as_deref(), current) {
            if event_batch != current {
                return BulkOutcome::Stale;
            }
        }

        let Some(record) = self.tasks.get_mut(&event.task_id) else {
            return BulkOutcome::NotTracked;
        };

        let was_terminal = record.status.is_terminal();

        record.status = event.status;
        record.message = event.message.clone();
        record.last_updated = event.timestamp;
        if let Some(hash) = event.hash() {
            record.hash = Some(hash.to_string());
        }
        if let Some(tx_hash) = event.tx_hash() {
            record.tx_hash = Some(tx_hash.to_string());
        }
        record.error = event.error().map(str::to_string);

        if !event.status.is_terminal() {
            return BulkOutcome::Updated;
        }

        // A task that left a terminal status (e.g. failed -> retry_queued ->
        // success) has already been counted once.
        if was_terminal || !self.counted.insert(event.task_id.clone()) {
            self.diagnostics.repeated_terminal += 1;
            return BulkOutcome::Updated;
        }

        self.progress.record_terminal(event.status);
        BulkOutcome::Counted(event.status)
    }
}

/// Pure form of [`TrackerState::apply`].
pub fn reduce(mut state: TrackerState, event: &StatusEvent) -> TrackerState {
    state.apply(event);
    state
}
