pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod sanitize;
pub mod search;
pub mod secrets;
pub mod session;
pub mod tracking;

pub use api::{ApiClient, CsvRow, PreviewResponse, UploadFile};
pub use channel::{ChannelBinding, ChannelState, EventSource, ReconnectPolicy, SseEventSource};
pub use config::{load_config, load_or_default, ClientConfig};
pub use error::{
    ApiError, CertdeskError, ChannelError, ConfigError, Result, SessionError, TrackerError,
};
pub use search::SearchState;
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError, TokenCipher};
pub use session::{BatchStarted, FileSessionStore, MemorySessionStore, Session, SessionStore};
pub use tracking::{
    ProgressView, StatusEvent, TaskRecord, TaskStatus, Tracker, TrackerHandle, TrackerSnapshot,
};
