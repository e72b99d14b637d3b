use std::path::PathBuf;
use thiserror::Error;

use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum CertdeskError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Push channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid URL in '{field}': {reason}")]
    InvalidUrl { field: String, reason: String },
}

/// Errors returned by REST calls.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("Request failed: {0}")]
    Transport(String),

    /// 401 from the server; the session token is missing, invalid or expired.
    #[error("Not authorized: {message}")]
    Unauthorized { message: String },

    /// Any other non-success status, with the server's message.
    #[error("Server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// An authenticated endpoint was called without a session token.
    #[error("No session token; log in first")]
    MissingToken,

    /// A local precondition failed before anything was sent.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    /// True when the error means the session must re-authenticate.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. } | ApiError::MissingToken)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Errors raised by the push channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The server refused or terminated the session; never retried.
    #[error("Session rejected by server: {0}")]
    Rejected(String),

    /// Connection-level failure; retried with bounded attempts.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed frame or payload.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ChannelError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelError::Rejected(_))
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Tracker task has stopped")]
    Stopped,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Not logged in")]
    NotAuthenticated,

    #[error("Failed to access session file '{path}': {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt session file: {0}")]
    Corrupt(String),

    #[error("In-memory session store is poisoned")]
    Poisoned,

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

pub type Result<T> = std::result::Result<T, CertdeskError>;
