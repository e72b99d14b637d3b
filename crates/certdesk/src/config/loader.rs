use std::path::{Path, PathBuf};

use crate::config::schema::ClientConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/client-config-v1.json");

pub const API_URL_ENV_VAR: &str = "CERTDESK_API_URL";
pub const EVENTS_URL_ENV_VAR: &str = "CERTDESK_EVENTS_URL";

/// `config.json` in the platform config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("certdesk").join("config.json"))
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ClientConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ClientConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: ClientConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Loads the given file, or the default location when `path` is `None`.
/// A missing file at the default location yields the built-in defaults; a
/// missing explicit path is an error. Env overrides are applied last.
pub fn load_or_default(path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let config = match path {
        Some(path) => load_config(path)?,
        None => match default_config_path() {
            Some(default) if default.exists() => load_config(&default)?,
            _ => {
                log::debug!("No config file found, using defaults");
                ClientConfig::default()
            }
        },
    };

    let config = apply_env_overrides(config);
    validate_config(&config)?;
    Ok(config)
}

/// Applies `CERTDESK_API_URL` and `CERTDESK_EVENTS_URL` when set and non-empty.
pub fn apply_env_overrides(mut config: ClientConfig) -> ClientConfig {
    if let Some(url) = env_value(API_URL_ENV_VAR) {
        log::debug!("API URL overridden by {}", API_URL_ENV_VAR);
        config.api_base_url = url;
    }
    if let Some(url) = env_value(EVENTS_URL_ENV_VAR) {
        log::debug!("Events URL overridden by {}", EVENTS_URL_ENV_VAR);
        config.events_url = Some(url);
    }
    config
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    validate_http_url("apiBaseUrl", &config.api_base_url)?;
    validate_http_url("eventsUrl", &config.events_url())?;

    if config.tracker.command_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "tracker.commandCapacity must be greater than 0".to_string(),
        });
    }
    if config.connect_timeout_secs == 0 || config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "timeouts must be greater than 0".to_string(),
        });
    }

    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field: field.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::InvalidUrl {
            field: field.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}
