//! CSV preview and bulk issuance with live progress.

use std::path::Path;

use certdesk::api::{PreviewResponse, UploadFile};
use certdesk::tracking::{ProgressView, TaskRecord, TaskStatus, TrackerSnapshot};
use log::{info, warn};
use serde::Serialize;

use super::{follow, render, CliError, FollowEnd};
use crate::events::start_event_bridge;
use crate::state::CliState;

pub async fn preview(state: &mut CliState, csv: &Path, json: bool) -> Result<(), CliError> {
    let file = UploadFile::from_path(csv).await?;
    let preview = state.session.preview(&file).await?;
    render(json, &preview, describe_preview)
}

fn describe_preview(preview: &PreviewResponse) -> String {
    let errors = preview.row_errors();
    let mut out = format!(
        "{} rows, {} with errors",
        preview.data.len(),
        errors.len()
    );
    for (row, message) in errors {
        out.push_str(&format!("\n  row {}: {}", row, message));
    }
    if preview.ensure_startable().is_ok() {
        out.push_str("\nReady to issue");
    }
    out
}

/// Outcome of a followed batch.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkReport {
    pub batch_id: String,
    pub progress: ProgressView,
    /// Set when following stopped before every task finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<String>,
    pub tasks: Vec<TaskRecord>,
}

pub async fn bulk(
    state: &mut CliState,
    csv: &Path,
    folder_link: Option<&str>,
    json: bool,
) -> Result<(), CliError> {
    let file = UploadFile::from_path(csv).await?;
    let preview = state.session.preview(&file).await?;
    if let Err(e) = preview.ensure_startable() {
        if !json {
            eprintln!("{}", describe_preview(&preview));
        }
        return Err(CliError::Api(e));
    }

    let tracker = state.session.tracker().clone();
    let _bridge = start_event_bridge(&tracker, state.session.channel().subscribe_state());

    let started = state
        .session
        .start_batch(&preview, &file.file_name, folder_link)
        .await?;
    for diagnostic in &started.diagnostics {
        warn!("{}", diagnostic);
    }
    info!(
        "Batch {} started, tracking {} of {} rows",
        started.batch_id,
        started.tracked,
        preview.data.len()
    );

    let mut last_printed = None;
    let end = follow(
        tracker.subscribe_snapshots(),
        state.session.channel().subscribe_state(),
        |s| s.progress.is_complete() || s.tracked == 0,
        |s: &TrackerSnapshot| {
            if last_printed != Some(s.progress) && !json {
                eprintln!("{}", s.progress);
                last_printed = Some(s.progress);
            }
        },
    )
    .await;

    let stopped = match &end {
        FollowEnd::Done => None,
        FollowEnd::ChannelEnded(channel) => Some(format!("push channel {}", channel)),
        FollowEnd::Interrupted => Some("interrupted".to_string()),
    };
    if let Some(reason) = &stopped {
        warn!("Stopped following batch {}: {}", started.batch_id, reason);
    }

    let report = BulkReport {
        batch_id: started.batch_id,
        progress: tracker.snapshot().progress,
        stopped,
        tasks: tracker.tasks().await?,
    };
    render(json, &report, describe_report)
}

fn describe_report(report: &BulkReport) -> String {
    let mut out = format!("Batch {}: {}", report.batch_id, report.progress);
    if let Some(reason) = &report.stopped {
        out.push_str(&format!(" (stopped: {})", reason));
    }
    for task in &report.tasks {
        match task.status {
            TaskStatus::Success => {}
            TaskStatus::Failed => out.push_str(&format!(
                "\n  row {} ({}): failed: {}",
                task.row_number,
                task.row.roll_no,
                task.error.as_deref().unwrap_or("no error reported")
            )),
            status => out.push_str(&format!(
                "\n  row {} ({}): {}",
                task.row_number, task.row.roll_no, status
            )),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use certdesk::api::CsvRow;

    fn row(row_number: u32, error: Option<&str>) -> CsvRow {
        CsvRow {
            row_number,
            roll_no: format!("R{:03}", row_number),
            recipient_name: "Asha Rao".to_string(),
            recipient_email: "asha@students.example.com".to_string(),
            certificate_name: "Course Completion".to_string(),
            issue_date: None,
            certificate_link: String::new(),
            grade: None,
            validation_error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_describe_preview_lists_row_errors() {
        let preview = PreviewResponse {
            data: vec![row(1, None), row(2, Some("Invalid email"))],
            has_row_errors: true,
        };
        let text = describe_preview(&preview);
        assert!(text.starts_with("2 rows, 1 with errors"));
        assert!(text.contains("row 2: Invalid email"));
        assert!(!text.contains("Ready to issue"));
    }

    #[test]
    fn test_describe_clean_preview() {
        let preview = PreviewResponse {
            data: vec![row(1, None)],
            has_row_errors: false,
        };
        assert!(describe_preview(&preview).ends_with("Ready to issue"));
    }
}
