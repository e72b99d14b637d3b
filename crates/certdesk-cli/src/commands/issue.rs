//! Single certificate issuance.

use std::path::Path;

use certdesk::api::{IssueCertificateRequest, UploadFile};
use certdesk::tracking::SingleIssueStatus;
use log::warn;
use serde::Serialize;

use super::{follow, render, CliError, FollowEnd};
use crate::state::CliState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueReport {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SingleIssueStatus>,
}

pub async fn issue(
    state: &mut CliState,
    name: &str,
    email: &str,
    certificate: &str,
    file: Option<&Path>,
    json: bool,
) -> Result<(), CliError> {
    let file = match file {
        Some(path) => Some(UploadFile::from_path(path).await?),
        None => None,
    };
    let request = IssueCertificateRequest {
        recipient_name: name.to_string(),
        recipient_email: email.to_string(),
        certificate_name: certificate.to_string(),
        file,
        ..Default::default()
    };

    let response = state.session.issue(&request).await?;
    let tracker = state.session.tracker().clone();

    let end = follow(
        tracker.subscribe_snapshots(),
        state.session.channel().subscribe_state(),
        |s| {
            s.single
                .as_ref()
                .is_some_and(|v| v.task_id == response.task_id && !v.is_loading)
        },
        |s| {
            if let Some(single) = s.single.as_ref().filter(|v| !json && v.is_loading) {
                eprintln!("{}", single.message);
            }
        },
    )
    .await;
    if end != FollowEnd::Done {
        warn!("Stopped waiting for task {}: {:?}", response.task_id, end);
    }

    let report = IssueReport {
        status: tracker.snapshot().single,
        task_id: response.task_id,
    };
    render(json, &report, |r| match &r.status {
        Some(status) if status.is_success => format!(
            "Issued ({}){}",
            r.task_id,
            status
                .hash
                .as_deref()
                .map(|h| format!(", hash {}", h))
                .unwrap_or_default()
        ),
        Some(status) if status.is_error => format!("Failed: {}", status.message),
        Some(status) => format!("Task {} still {}", r.task_id, status.status),
        None => format!("Task {} submitted", r.task_id),
    })
}
