//! Session-scoped binding of the push channel to the tracker.
//!
//! At most one subscription is active. Binding again tears the previous one
//! down first, so a task update is never delivered twice. The subscription
//! only forwards typed [`StatusEvent`]s to the [`TrackerHandle`]; it never
//! touches tracking state itself.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use secrecy::SecretString;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::source::{EventSource, EventStream};
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::tracking::{StatusEvent, TrackerHandle, ISSUANCE_STATUS_UPDATE};

/// Event the server sends when it ends the session.
pub const SESSION_TERMINATED: &str = "sessionTerminated";

/// Connection state of the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "camelCase")]
pub enum ChannelState {
    /// Never bound.
    Idle,
    Connecting,
    Connected,
    /// Waiting before reconnect attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// The server refused the session; re-authentication is required.
    Rejected(String),
    /// Reconnect attempts exhausted.
    GaveUp(String),
    /// Unbound by the client.
    Closed,
}

impl ChannelState {
    /// True once the subscription loop has exited.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChannelState::Rejected(_) | ChannelState::GaveUp(_) | ChannelState::Closed
        )
    }

    pub fn needs_reauth(&self) -> bool {
        matches!(self, ChannelState::Rejected(_))
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelState::Idle => write!(f, "idle"),
            ChannelState::Connecting => write!(f, "connecting"),
            ChannelState::Connected => write!(f, "connected"),
            ChannelState::Reconnecting { attempt } => {
                write!(f, "reconnecting (attempt {})", attempt)
            }
            ChannelState::Rejected(reason) => write!(f, "rejected: {}", reason),
            ChannelState::GaveUp(reason) => write!(f, "gave up: {}", reason),
            ChannelState::Closed => write!(f, "closed"),
        }
    }
}

/// Bounded reconnection with a fixed delay. The attempt counter resets after
/// every successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ChannelConfig::default())
    }
}

impl From<&ChannelConfig> for ReconnectPolicy {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            max_attempts: config.reconnect_attempts,
            delay: config.reconnect_delay(),
        }
    }
}

struct Subscription {
    id: Uuid,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct ChannelBinding {
    source: Arc<dyn EventSource>,
    tracker: TrackerHandle,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ChannelState>>,
    active: Option<Subscription>,
}

impl ChannelBinding {
    pub fn new(
        source: Arc<dyn EventSource>,
        tracker: TrackerHandle,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ChannelState::Idle);
        Self {
            source,
            tracker,
            policy,
            state: Arc::new(state),
            active: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Id of the live subscription, if any.
    pub fn subscription_id(&self) -> Option<Uuid> {
        self.active
            .as_ref()
            .filter(|s| !s.join.is_finished())
            .map(|s| s.id)
    }

    pub fn is_bound(&self) -> bool {
        self.subscription_id().is_some()
    }

    /// Starts a subscription for `token`, replacing any existing one.
    pub async fn bind(&mut self, token: SecretString) -> Uuid {
        self.teardown().await;

        let id = Uuid::new_v4();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let span = info_span!("push_channel", subscription = %id);
        let task = run_subscription(
            Arc::clone(&self.source),
            token,
            self.tracker.clone(),
            self.policy,
            Arc::clone(&self.state),
            shutdown_rx,
        );
        let join = tokio::spawn(task.instrument(span));

        info!("Push channel bound (subscription {})", id);
        self.active = Some(Subscription {
            id,
            shutdown: shutdown_tx,
            join,
        });
        id
    }

    /// Stops the active subscription and waits for it to exit.
    pub async fn unbind(&mut self) {
        if self.teardown().await {
            self.state.send_replace(ChannelState::Closed);
            info!("Push channel unbound");
        }
    }

    async fn teardown(&mut self) -> bool {
        let Some(subscription) = self.active.take() else {
            return false;
        };
        let _ = subscription.shutdown.send(true);
        if let Err(e) = subscription.join.await {
            warn!("Push channel task {} ended abnormally: {}", subscription.id, e);
        }
        true
    }

    /// Waits until the subscription loop exits and returns its final state.
    pub async fn finished(&self) -> ChannelState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(ChannelState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => ChannelState::Closed,
        };
        state
    }
}

impl Drop for ChannelBinding {
    fn drop(&mut self) {
        if let Some(subscription) = self.active.take() {
            let _ = subscription.shutdown.send(true);
        }
    }
}

enum PumpEnd {
    Shutdown,
    Ended,
    Failed(ChannelError),
    TrackerStopped,
}

async fn run_subscription(
    source: Arc<dyn EventSource>,
    token: SecretString,
    tracker: TrackerHandle,
    policy: ReconnectPolicy,
    state: Arc<watch::Sender<ChannelState>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures: u32 = 0;
    state.send_replace(ChannelState::Connecting);

    loop {
        let connected = tokio::select! {
            _ = shutdown.changed() => return,
            result = source.connect(&token) => result,
        };

        let error = match connected {
            Ok(mut stream) => {
                info!("Push channel connected");
                failures = 0;
                state.send_replace(ChannelState::Connected);
                match pump(stream.as_mut(), &tracker, &mut shutdown).await {
                    PumpEnd::Shutdown => return,
                    PumpEnd::TrackerStopped => {
                        warn!("Tracker stopped, closing push channel");
                        state.send_replace(ChannelState::Closed);
                        return;
                    }
                    PumpEnd::Ended => {
                        ChannelError::Transport("stream closed by server".to_string())
                    }
                    PumpEnd::Failed(e) => e,
                }
            }
            Err(e) => e,
        };

        if let ChannelError::Rejected(reason) = error {
            warn!("Push channel rejected: {}", reason);
            state.send_replace(ChannelState::Rejected(reason));
            return;
        }

        failures += 1;
        if failures > policy.max_attempts {
            warn!(
                "Push channel giving up after {} failed attempts: {}",
                failures, error
            );
            state.send_replace(ChannelState::GaveUp(error.to_string()));
            return;
        }

        warn!(
            "Push channel lost ({}), reconnect {}/{} in {:?}",
            error, failures, policy.max_attempts, policy.delay
        );
        state.send_replace(ChannelState::Reconnecting { attempt: failures });
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(policy.delay) => {}
        }
    }
}

async fn pump(
    stream: &mut dyn EventStream,
    tracker: &TrackerHandle,
    shutdown: &mut watch::Receiver<bool>,
) -> PumpEnd {
    loop {
        let frame = tokio::select! {
            _ = shutdown.changed() => return PumpEnd::Shutdown,
            frame = stream.next_frame() => frame,
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return PumpEnd::Ended,
            Err(e) => return PumpEnd::Failed(e),
        };

        match frame.event.as_str() {
            ISSUANCE_STATUS_UPDATE => match StatusEvent::from_json(&frame.data) {
                Ok(event) => {
                    debug!("Status update for {}: {}", event.task_id, event.status);
                    if tracker.deliver(event).await.is_err() {
                        return PumpEnd::TrackerStopped;
                    }
                }
                Err(e) => warn!("Dropping malformed status update: {}", e),
            },
            SESSION_TERMINATED => {
                return PumpEnd::Failed(ChannelError::Rejected(termination_reason(&frame.data)))
            }
            other => debug!("Ignoring push event '{}'", other),
        }
    }
}

fn termination_reason(data: &str) -> String {
    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .or_else(|| Some(data.trim().to_string()))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "session terminated".to_string())
}
