use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::secrets::{expand_home, SESSION_KEY_ENV_VAR};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_url: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

fn default_api_base_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            events_url: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            channel: ChannelConfig::default(),
            tracker: TrackerConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Push channel URL, derived from the API base when not set explicitly.
    pub fn events_url(&self) -> String {
        match self.events_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => format!("{}/events", self.api_base_url.trim_end_matches('/')),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Reconnection policy of the push channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    /// Consecutive failed attempts before giving up.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl ChannelConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerConfig {
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
}

fn default_command_capacity() -> usize {
    256
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            command_capacity: default_command_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_env: Option<String>,
}

impl SessionConfig {
    /// Session file location: the configured path, or `session.json` in the
    /// platform config dir.
    pub fn file_path(&self) -> Option<PathBuf> {
        match self.file.as_deref() {
            Some(path) => Some(PathBuf::from(expand_home(path))),
            None => dirs::config_dir().map(|dir| dir.join("certdesk").join("session.json")),
        }
    }

    pub fn key_env(&self) -> &str {
        self.key_env.as_deref().unwrap_or(SESSION_KEY_ENV_VAR)
    }
}
