//! Process state: configuration, the tracker task and the session.

use std::path::Path;
use std::time::Duration;

use certdesk::config::load_or_default;
use certdesk::tracking::{Tracker, TrackerState};
use certdesk::{CertdeskError, ClientConfig, Session, SessionError};
use log::{debug, info, warn};
use tokio::task::JoinHandle;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

pub struct CliState {
    pub config: ClientConfig,
    pub session: Session,
    tracker_task: JoinHandle<TrackerState>,
}

impl CliState {
    /// Loads configuration, spawns the tracker and wires the session.
    pub fn init(config_path: Option<&Path>) -> Result<Self, CertdeskError> {
        let config = load_or_default(config_path)?;
        info!(
            "Using API at {} (push channel {})",
            config.api_base_url,
            config.events_url()
        );

        let (tracker, tracker_task) = Tracker::spawn(config.tracker.command_capacity);
        let session = Session::from_config(&config, tracker)?;

        Ok(Self {
            config,
            session,
            tracker_task,
        })
    }

    /// Resumes the stored session. Returns false when there is none or the
    /// server no longer accepts it.
    pub async fn resume(&mut self) -> Result<bool, SessionError> {
        match self.session.restore().await? {
            Some(user) => {
                debug!("Resumed session for user {}", user.id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drops the session (stopping the push channel) and waits for the
    /// tracker to drain.
    pub async fn shutdown(self) {
        let Self {
            session,
            tracker_task,
            ..
        } = self;
        drop(session);

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, tracker_task).await {
            Ok(Ok(state)) => debug!(
                "Tracker drained at generation {} with {} tasks",
                state.generation(),
                state.task_count()
            ),
            Ok(Err(e)) => warn!("Tracker task failed: {}", e),
            Err(_) => warn!("Tracker did not stop within {:?}", SHUTDOWN_TIMEOUT),
        }
    }
}
