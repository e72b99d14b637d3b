//! Task records and batch progress counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::CsvRow;

/// Status of an issuance task as reported by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Processing,
    WaitingWallet,
    RetryQueued,
    Success,
    Failed,
}

impl TaskStatus {
    /// Returns true for `Success` and `Failed`, the only statuses with no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }

    /// Returns true while the server is still working on the task.
    ///
    /// `Pending` is not counted as in flight: it means the task exists but has
    /// not been picked up by the queue yet.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TaskStatus::Processing
                | TaskStatus::Queued
                | TaskStatus::WaitingWallet
                | TaskStatus::RetryQueued
        )
    }

    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::WaitingWallet => "waiting_wallet",
            TaskStatus::RetryQueued => "retry_queued",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "Pending"),
            TaskStatus::Queued => write!(f, "Queued"),
            TaskStatus::Processing => write!(f, "Processing"),
            TaskStatus::WaitingWallet => write!(f, "Waiting for wallet"),
            TaskStatus::RetryQueued => write!(f, "Queued for retry"),
            TaskStatus::Success => write!(f, "Success"),
            TaskStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Row payload a bulk task was created from. Immutable after ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RowPayload {
    pub roll_no: String,
    pub recipient_name: String,
    pub recipient_email: String,
    pub certificate_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
    pub certificate_link: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade: Option<String>,
}

impl From<&CsvRow> for RowPayload {
    fn from(row: &CsvRow) -> Self {
        Self {
            roll_no: row.roll_no.clone(),
            recipient_name: row.recipient_name.clone(),
            recipient_email: row.recipient_email.clone(),
            certificate_name: row.certificate_name.clone(),
            issue_date: row.issue_date.clone(),
            certificate_link: row.certificate_link.clone(),
            grade: row.grade.clone(),
        }
    }
}

/// One trackable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    /// Server-assigned identifier.
    pub task_id: String,
    /// Grouping identifier; `None` for single-issue tasks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    /// 1-based position in the originating row set.
    pub row_number: u32,
    pub status: TaskStatus,
    /// Latest human-readable status text from the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Content hash. Sticky: never cleared by an update that omits it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Transaction hash. Sticky like `hash`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Last reported error. Cleared by any update that does not carry one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub row: RowPayload,
}

impl TaskRecord {
    /// Creates a freshly ingested record in the `Queued` state.
    pub fn queued(task_id: &str, batch_id: &str, row: &CsvRow) -> Self {
        Self {
            task_id: task_id.to_string(),
            batch_id: Some(batch_id.to_string()),
            row_number: row.row_number,
            status: TaskStatus::Queued,
            message: None,
            hash: None,
            tx_hash: None,
            error: None,
            last_updated: Utc::now(),
            row: RowPayload::from(row),
        }
    }

    /// Returns true if this task reached `Success` or `Failed`.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Aggregate counters over one batch.
///
/// `processed == success + failed` and `processed <= total` hold at all
/// times; the counters only ever grow until the next reset.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub total: u32,
    pub processed: u32,
    pub success: u32,
    pub failed: u32,
}

impl BatchProgress {
    /// Counters for a batch with `total` tracked tasks.
    pub fn started(total: u32) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Records one terminal transition.
    pub(crate) fn record_terminal(&mut self, status: TaskStatus) {
        debug_assert!(status.is_terminal());
        self.processed += 1;
        if status == TaskStatus::Success {
            self.success += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.processed >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        for status in [
            TaskStatus::Pending,
            TaskStatus::Queued,
            TaskStatus::Processing,
            TaskStatus::WaitingWallet,
            TaskStatus::RetryQueued,
        ] {
            assert!(!status.is_terminal(), "{status:?} must not be terminal");
        }
    }

    #[test]
    fn test_in_flight_excludes_pending_and_terminal() {
        assert!(!TaskStatus::Pending.is_in_flight());
        assert!(TaskStatus::Queued.is_in_flight());
        assert!(TaskStatus::RetryQueued.is_in_flight());
        assert!(!TaskStatus::Success.is_in_flight());
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&TaskStatus::WaitingWallet).unwrap();
        assert_eq!(json, "\"waiting_wallet\"");
        let parsed: TaskStatus = serde_json::from_str("\"retry_queued\"").unwrap();
        assert_eq!(parsed, TaskStatus::RetryQueued);
        assert_eq!(TaskStatus::RetryQueued.as_str(), "retry_queued");
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(serde_json::from_str::<TaskStatus>("\"exploded\"").is_err());
    }

    #[test]
    fn test_progress_record_terminal() {
        let mut progress = BatchProgress::started(2);
        progress.record_terminal(TaskStatus::Success);
        progress.record_terminal(TaskStatus::Failed);
        assert_eq!(progress.processed, 2);
        assert_eq!(progress.success, 1);
        assert_eq!(progress.failed, 1);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_empty_batch_is_never_complete() {
        assert!(!BatchProgress::started(0).is_complete());
    }
}
