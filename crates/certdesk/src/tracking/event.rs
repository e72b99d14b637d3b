//! Status events delivered by the push channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tracking::task::TaskStatus;

/// Name of the push event carrying task status changes.
pub const ISSUANCE_STATUS_UPDATE: &str = "issuanceStatusUpdate";

/// Status change for one task, as pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    /// Task the event refers to.
    pub task_id: String,
    /// Batch the task belongs to; `None` for single submissions.
    #[serde(default)]
    pub batch_id: Option<String>,
    /// New status of the task.
    pub status: TaskStatus,
    /// Human-readable message describing the current step.
    #[serde(default)]
    pub message: Option<String>,
    /// Row the task was created from, echoed back by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_data: Option<serde_json::Value>,
    /// Server timestamp of the transition.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Content hash (set once known).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Transaction hash (set once submitted on chain).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Error message (set on failure or retry).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wallet the issuance is waiting on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

impl StatusEvent {
    /// Creates an event with no optional fields set.
    pub fn new(task_id: &str, status: TaskStatus, message: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            batch_id: None,
            status,
            message: Some(message.to_string()),
            row_data: None,
            timestamp: Utc::now(),
            hash: None,
            tx_hash: None,
            error: None,
            wallet_address: None,
        }
    }

    /// Creates a success event carrying the certificate hash.
    pub fn succeeded(task_id: &str, hash: &str, tx_hash: &str) -> Self {
        Self::new(task_id, TaskStatus::Success, "Certificate issued")
            .with_hash(hash)
            .with_tx_hash(tx_hash)
    }

    /// Creates a failure event.
    pub fn failed(task_id: &str, error: &str) -> Self {
        Self::new(task_id, TaskStatus::Failed, "Issuance failed").with_error(error)
    }

    pub fn in_batch(mut self, batch_id: &str) -> Self {
        self.batch_id = Some(batch_id.to_string());
        self
    }

    pub fn with_hash(mut self, hash: &str) -> Self {
        self.hash = Some(hash.to_string());
        self
    }

    pub fn with_tx_hash(mut self, tx_hash: &str) -> Self {
        self.tx_hash = Some(tx_hash.to_string());
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Parses the JSON body of an `issuanceStatusUpdate` push event.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    /// Non-empty hash, if any. Empty strings count as absent.
    pub fn hash(&self) -> Option<&str> {
        non_empty(self.hash.as_deref())
    }

    /// Non-empty transaction hash, if any.
    pub fn tx_hash(&self) -> Option<&str> {
        non_empty(self.tx_hash.as_deref())
    }

    /// Non-empty error, if any.
    pub fn error(&self) -> Option<&str> {
        non_empty(self.error.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_payload() {
        let json = r#"{
            "taskId": "batch1-R001",
            "batchId": "batch1",
            "status": "waiting_wallet",
            "message": "Waiting for wallet signature",
            "rowData": {"Roll No": "R001"},
            "timestamp": "2026-03-01T10:00:00Z",
            "hash": "0xabc",
            "txHash": null,
            "walletAddress": "0xwallet"
        }"#;

        let event = StatusEvent::from_json(json).unwrap();
        assert_eq!(event.task_id, "batch1-R001");
        assert_eq!(event.batch_id.as_deref(), Some("batch1"));
        assert_eq!(event.status, TaskStatus::WaitingWallet);
        assert_eq!(event.hash(), Some("0xabc"));
        assert_eq!(event.tx_hash(), None);
        assert_eq!(event.wallet_address.as_deref(), Some("0xwallet"));
        assert!(event.row_data.is_some());
    }

    #[test]
    fn test_parse_minimal_payload() {
        let event = StatusEvent::from_json(r#"{"taskId":"t1","status":"processing"}"#).unwrap();
        assert_eq!(event.task_id, "t1");
        assert!(event.batch_id.is_none());
        assert!(event.message.is_none());
        assert!(event.error.is_none());
    }

    #[test]
    fn test_empty_optional_strings_are_absent() {
        let event = StatusEvent::new("t1", TaskStatus::Processing, "")
            .with_hash("")
            .with_error("  ");
        assert_eq!(event.hash(), None);
        assert_eq!(event.error(), None);
    }

    #[test]
    fn test_constructors() {
        let ok = StatusEvent::succeeded("t1", "0xh", "0xtx").in_batch("b1");
        assert_eq!(ok.status, TaskStatus::Success);
        assert_eq!(ok.batch_id.as_deref(), Some("b1"));
        assert_eq!(ok.tx_hash(), Some("0xtx"));

        let failed = StatusEvent::failed("t2", "E1");
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error(), Some("E1"));
    }

    #[test]
    fn test_serialize_uses_camel_case() {
        let event = StatusEvent::new("t1", TaskStatus::Queued, "queued").with_tx_hash("0x1");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["taskId"], "t1");
        assert_eq!(value["txHash"], "0x1");
        assert!(value.get("hash").is_none());
    }
}
