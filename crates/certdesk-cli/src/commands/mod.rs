//! One handler per user action.
//!
//! Commands are organized by domain:
//! - `auth`: login, logout and the current user
//! - `bulk`: CSV preview and batch issuance with live progress
//! - `issue`: single certificate issuance
//! - `verify`: file and public verification
//! - `search`: paginated certificate search

pub mod auth;
pub mod bulk;
pub mod issue;
pub mod search;
pub mod verify;

use std::time::Duration;

use certdesk::channel::ChannelState;
use certdesk::tracking::TrackerSnapshot;
use certdesk::{ApiError, CertdeskError, SecretError, SessionError, TrackerError};
use log::warn;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use crate::cli::{Command, UsageError};
use crate::state::CliState;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Certdesk(#[from] CertdeskError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("Failed to write output: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Not logged in; run `certdesk login <email>` first")]
    NotLoggedIn,
}

impl CliError {
    /// Process exit code: 2 for usage errors, 3 when a login is needed, 1
    /// otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => 2,
            CliError::NotLoggedIn
            | CliError::Session(SessionError::NotAuthenticated)
            | CliError::Session(SessionError::Api(ApiError::Unauthorized { .. }))
            | CliError::Api(ApiError::Unauthorized { .. }) => 3,
            _ => 1,
        }
    }
}

/// JSON envelope printed with `--json`.
#[derive(Debug, Serialize)]
pub struct CommandResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> CommandResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl CommandResponse<()> {
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Prints `data` as a JSON envelope or through `human`.
pub fn render<T: Serialize>(
    json: bool,
    data: &T,
    human: impl FnOnce(&T) -> String,
) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(&CommandResponse::ok(data))?);
    } else {
        println!("{}", human(data));
    }
    Ok(())
}

pub async fn run(command: Command, json: bool, state: &mut CliState) -> Result<(), CliError> {
    if command.needs_session() && !state.resume().await? {
        return Err(CliError::NotLoggedIn);
    }

    match command {
        Command::Help => {
            print!("{}", crate::cli::USAGE);
            Ok(())
        }
        Command::Login { email } => auth::login(state, &email, json).await,
        Command::Logout => auth::logout(state, json).await,
        Command::Whoami => auth::whoami(state, json).await,
        Command::Preview { csv } => bulk::preview(state, &csv, json).await,
        Command::Bulk { csv, folder_link } => {
            bulk::bulk(state, &csv, folder_link.as_deref(), json).await
        }
        Command::Issue {
            name,
            email,
            certificate,
            file,
        } => issue::issue(state, &name, &email, &certificate, file.as_deref(), json).await,
        Command::Verify { file } => verify::verify(state, &file, json).await,
        Command::PublicVerify { id } => verify::public_verify(state, &id, json).await,
        Command::Search { query, page } => {
            search::search(state, query.as_deref(), page, json).await
        }
    }
}

/// Why [`follow`] stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowEnd {
    Done,
    ChannelEnded(ChannelState),
    Interrupted,
}

const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Watches tracker snapshots until `done` holds, the push channel stops for
/// good, or Ctrl-C. `on_change` sees every distinct snapshot, throttled.
pub async fn follow(
    mut snapshots: watch::Receiver<TrackerSnapshot>,
    mut channel: watch::Receiver<ChannelState>,
    done: impl Fn(&TrackerSnapshot) -> bool,
    mut on_change: impl FnMut(&TrackerSnapshot),
) -> FollowEnd {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        on_change(&snapshot);
        if done(&snapshot) {
            return FollowEnd::Done;
        }

        let state = channel.borrow_and_update().clone();
        if state.is_terminal() {
            return FollowEnd::ChannelEnded(state);
        }

        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    warn!("Tracker stopped while following progress");
                    return FollowEnd::ChannelEnded(ChannelState::Closed);
                }
                tokio::time::sleep(PROGRESS_INTERVAL).await;
            }
            changed = channel.changed() => {
                if changed.is_err() {
                    return FollowEnd::ChannelEnded(ChannelState::Closed);
                }
            }
            _ = &mut ctrl_c => return FollowEnd::Interrupted,
        }
    }
}
