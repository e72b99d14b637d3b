//! Event bridge between the certdesk library and the terminal.
//!
//! Task updates and push-channel state changes are logged as they happen so
//! long-running commands show activity without polling.

use certdesk::channel::ChannelState;
use certdesk::tracking::{TaskRecord, TaskStatus, TrackerHandle};
use log::{debug, info, warn};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Background listeners; aborted on drop.
pub struct EventBridge {
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for EventBridge {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Starts logging task updates from `tracker` and transitions of `channel`.
pub fn start_event_bridge(
    tracker: &TrackerHandle,
    channel: watch::Receiver<ChannelState>,
) -> EventBridge {
    info!("Starting event bridge");

    let mut updates = tracker.subscribe_updates();
    let task_listener = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(record) => log_task_update(&record),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Task update bridge lagged, missed {} updates", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Tracker closed, stopping task update bridge");
                    break;
                }
            }
        }
    });

    let channel_listener = tokio::spawn(watch_channel(channel));

    EventBridge {
        tasks: vec![task_listener, channel_listener],
    }
}

async fn watch_channel(mut channel: watch::Receiver<ChannelState>) {
    while channel.changed().await.is_ok() {
        let state = channel.borrow_and_update().clone();
        match &state {
            ChannelState::Rejected(reason) => {
                warn!("Push channel rejected the session: {}; log in again", reason)
            }
            ChannelState::GaveUp(reason) => warn!("Push channel unavailable: {}", reason),
            ChannelState::Reconnecting { .. } => info!("Push channel {}", state),
            _ => debug!("Push channel {}", state),
        }
        if state.is_terminal() {
            break;
        }
    }
}

fn log_task_update(record: &TaskRecord) {
    let at = record.last_updated.format("%H:%M:%S");
    match record.status {
        TaskStatus::Success => info!(
            "[{}] row {} ({}) issued{}",
            at,
            record.row_number,
            record.row.roll_no,
            record
                .hash
                .as_deref()
                .map(|h| format!(", hash {}", h))
                .unwrap_or_default()
        ),
        TaskStatus::Failed => warn!(
            "[{}] row {} ({}) failed: {}",
            at,
            record.row_number,
            record.row.roll_no,
            record.error.as_deref().unwrap_or("no error reported")
        ),
        status => debug!(
            "[{}] row {} ({}) {}",
            at, record.row_number, record.row.roll_no, status
        ),
    }
}
