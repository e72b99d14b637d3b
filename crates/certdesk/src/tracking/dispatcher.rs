//! Serial owner of the tracking state.
//!
//! The channel binding, the batch workflow and the UI never touch
//! [`TrackerState`] directly. They send [`TrackerCommand`]s through a
//! [`TrackerHandle`]; one task applies them in arrival order and publishes a
//! [`TrackerSnapshot`] after each one, plus every changed task record on a
//! broadcast channel.

use log::{debug, info};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::info_span;
use tracing::Instrument;

use crate::error::TrackerError;
use crate::tracking::event::StatusEvent;
use crate::tracking::ingest::IngestOutcome;
use crate::tracking::progress::ProgressView;
use crate::tracking::reducer::{BulkOutcome, SingleIssueStatus, TrackerDiagnostics, TrackerState};
use crate::tracking::task::TaskRecord;

/// Default capacity of the per-task update broadcast.
const UPDATE_CAPACITY: usize = 256;

/// Messages accepted by the tracker task.
#[derive(Debug)]
pub enum TrackerCommand {
    /// Reply with the generation a batch about to start must carry.
    BeginBatch { reply: oneshot::Sender<u64> },
    /// Install an ingested batch started in `generation`.
    Ingest {
        generation: u64,
        outcome: IngestOutcome,
        reply: oneshot::Sender<bool>,
    },
    /// Track a freshly acknowledged single submission.
    TrackSingle { task_id: String },
    /// Push event from the channel.
    Event(StatusEvent),
    /// Clear the bulk map and counters.
    Reset,
    /// Forget the single submission.
    ResetSingle,
    /// Reply with all tracked tasks ordered by row.
    Tasks { reply: oneshot::Sender<Vec<TaskRecord>> },
}

/// Cheap read view published after every command.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub progress: ProgressView,
    /// Number of tasks in the bulk map.
    pub tracked: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single: Option<SingleIssueStatus>,
    pub diagnostics: TrackerDiagnostics,
}

impl TrackerSnapshot {
    fn of(state: &TrackerState) -> Self {
        Self {
            generation: state.generation(),
            batch_id: state.batch_id().map(str::to_string),
            progress: state.progress_view(),
            tracked: state.task_count(),
            single: state.single().cloned(),
            diagnostics: state.diagnostics(),
        }
    }
}

/// Sending side of the tracker. Cheap to clone.
#[derive(Clone)]
pub struct TrackerHandle {
    commands: mpsc::Sender<TrackerCommand>,
    snapshots: watch::Receiver<TrackerSnapshot>,
    updates: broadcast::Sender<TaskRecord>,
}

impl TrackerHandle {
    async fn send(&self, command: TrackerCommand) -> Result<(), TrackerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| TrackerError::Stopped)
    }

    /// Reserves the current generation for a batch about to start; it must be
    /// passed to [`TrackerHandle::ingest`]. The displayed batch is kept until
    /// then.
    pub async fn begin_batch(&self) -> Result<u64, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::BeginBatch { reply }).await?;
        rx.await.map_err(|_| TrackerError::Stopped)
    }

    /// Installs an ingested batch. Returns false if the batch was superseded.
    pub async fn ingest(
        &self,
        generation: u64,
        outcome: IngestOutcome,
    ) -> Result<bool, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Ingest {
            generation,
            outcome,
            reply,
        })
        .await?;
        rx.await.map_err(|_| TrackerError::Stopped)
    }

    pub async fn track_single(&self, task_id: &str) -> Result<(), TrackerError> {
        self.send(TrackerCommand::TrackSingle {
            task_id: task_id.to_string(),
        })
        .await
    }

    /// Queues a push event for reconciliation.
    pub async fn deliver(&self, event: StatusEvent) -> Result<(), TrackerError> {
        self.send(TrackerCommand::Event(event)).await
    }

    pub async fn reset(&self) -> Result<(), TrackerError> {
        self.send(TrackerCommand::Reset).await
    }

    pub async fn reset_single(&self) -> Result<(), TrackerError> {
        self.send(TrackerCommand::ResetSingle).await
    }

    /// All tracked tasks ordered by row number.
    pub async fn tasks(&self) -> Result<Vec<TaskRecord>, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Tasks { reply }).await?;
        rx.await.map_err(|_| TrackerError::Stopped)
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<TrackerSnapshot> {
        self.snapshots.clone()
    }

    /// Receives every task record changed by an event.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<TaskRecord> {
        self.updates.subscribe()
    }
}

/// The consuming side: owns the state and processes commands serially.
pub struct Tracker {
    state: TrackerState,
    commands: mpsc::Receiver<TrackerCommand>,
    snapshots: watch::Sender<TrackerSnapshot>,
    updates: broadcast::Sender<TaskRecord>,
}

impl Tracker {
    /// Creates a tracker and its handle. `capacity` bounds the command queue.
    pub fn new(capacity: usize) -> (Self, TrackerHandle) {
        let (command_tx, command_rx) = mpsc::channel(capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(TrackerSnapshot::default());
        let (update_tx, _) = broadcast::channel(UPDATE_CAPACITY);

        let handle = TrackerHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            updates: update_tx.clone(),
        };
        let tracker = Self {
            state: TrackerState::new(),
            commands: command_rx,
            snapshots: snapshot_tx,
            updates: update_tx,
        };
        (tracker, handle)
    }

    /// Spawns the tracker on the current runtime.
    pub fn spawn(capacity: usize) -> (TrackerHandle, JoinHandle<TrackerState>) {
        let (tracker, handle) = Self::new(capacity);
        let join = tokio::spawn(tracker.run().instrument(info_span!("tracker")));
        (handle, join)
    }

    /// Processes commands until every handle is dropped, then returns the
    /// final state.
    pub async fn run(mut self) -> TrackerState {
        info!("Tracker started");
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
            let snapshot = TrackerSnapshot::of(&self.state);
            self.snapshots.send_if_modified(|current| {
                if *current == snapshot {
                    false
                } else {
                    *current = snapshot;
                    true
                }
            });
        }
        info!("Tracker stopped: all handles dropped");
        self.state
    }

    fn handle(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::BeginBatch { reply } => {
                let generation = self.state.begin_batch();
                let _ = reply.send(generation);
            }
            TrackerCommand::Ingest {
                generation,
                outcome,
                reply,
            } => {
                let batch_id = outcome.batch_id.clone();
                let accepted = outcome.accepted;
                let installed = self.state.ingest(generation, outcome);
                if installed {
                    info!(
                        "Tracking batch {}: {} tasks, {} accepted by server",
                        batch_id,
                        self.state.task_count(),
                        accepted
                    );
                }
                let _ = reply.send(installed);
            }
            TrackerCommand::TrackSingle { task_id } => {
                debug!("Tracking single submission {}", task_id);
                self.state.track_single(&task_id);
            }
            TrackerCommand::Event(event) => {
                let applied = self.state.apply(&event);
                if matches!(applied.bulk, BulkOutcome::Updated | BulkOutcome::Counted(_)) {
                    if let Some(record) = self.state.task(&event.task_id) {
                        // No receivers is fine
                        let _ = self.updates.send(record.clone());
                    }
                }
            }
            TrackerCommand::Reset => self.state.reset(),
            TrackerCommand::ResetSingle => self.state.reset_single(),
            TrackerCommand::Tasks { reply } => {
                let _ = reply.send(self.state.tasks());
            }
        }
    }
}
