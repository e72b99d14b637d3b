//! Builders for rows, batch responses and push events.

#![allow(dead_code)]

use std::collections::BTreeMap;

use certdesk::api::{BatchStartResponse, CsvRow, PreviewResponse};
use certdesk::tracking::{StatusEvent, TaskStatus};

/// Builder for preview rows.
pub struct CsvRowBuilder {
    row: CsvRow,
}

impl CsvRowBuilder {
    pub fn new(row_number: u32, roll_no: &str) -> Self {
        Self {
            row: CsvRow {
                row_number,
                roll_no: roll_no.to_string(),
                recipient_name: format!("Recipient {}", roll_no),
                recipient_email: format!("{}@students.example.com", roll_no.to_lowercase()),
                certificate_name: "Course Completion".to_string(),
                issue_date: Some("2026-06-30".to_string()),
                certificate_link: format!("https://files.example.com/{}.pdf", roll_no),
                grade: None,
                validation_error: None,
            },
        }
    }

    pub fn grade(mut self, grade: &str) -> Self {
        self.row.grade = Some(grade.to_string());
        self
    }

    pub fn invalid(mut self, error: &str) -> Self {
        self.row.validation_error = Some(error.to_string());
        self
    }

    pub fn build(self) -> CsvRow {
        self.row
    }
}

/// Rows numbered from 1 with the given roll numbers.
pub fn rows(keys: &[&str]) -> Vec<CsvRow> {
    keys.iter()
        .enumerate()
        .map(|(i, key)| CsvRowBuilder::new(i as u32 + 1, key).build())
        .collect()
}

pub fn clean_preview(keys: &[&str]) -> PreviewResponse {
    PreviewResponse {
        data: rows(keys),
        has_row_errors: false,
    }
}

pub fn start_response(batch_id: &str, task_ids: &[&str]) -> BatchStartResponse {
    BatchStartResponse {
        batch_id: batch_id.to_string(),
        task_ids: task_ids.iter().map(|id| id.to_string()).collect(),
        assignments: None,
    }
}

pub fn start_response_with_assignments(
    batch_id: &str,
    assignments: &[(u32, &str)],
) -> BatchStartResponse {
    let table: BTreeMap<u32, String> = assignments
        .iter()
        .map(|(row, id)| (*row, id.to_string()))
        .collect();
    BatchStartResponse {
        batch_id: batch_id.to_string(),
        task_ids: table.values().cloned().collect(),
        assignments: Some(table),
    }
}

pub fn event(task_id: &str, status: TaskStatus) -> StatusEvent {
    StatusEvent::new(task_id, status, &format!("Task {}", status))
}

/// JSON payload of an `issuanceStatusUpdate` push event.
pub fn event_json(event: &StatusEvent) -> String {
    serde_json::to_string(event).unwrap()
}
