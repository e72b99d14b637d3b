//! Transport behind the push channel.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::debug;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};

use super::sse::{SseDecoder, SseFrame};
use crate::config::ClientConfig;
use crate::error::ChannelError;
use crate::sanitize::truncate_body;

/// Opens authenticated event streams.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Connects with the session token. Authentication failures must be
    /// reported as [`ChannelError::Rejected`].
    async fn connect(&self, token: &SecretString) -> Result<Box<dyn EventStream>, ChannelError>;
}

/// An open stream of frames.
#[async_trait]
pub trait EventStream: Send {
    /// Next frame, or `Ok(None)` once the server closes the stream.
    async fn next_frame(&mut self) -> Result<Option<SseFrame>, ChannelError>;
}

/// Server-sent events over HTTP.
pub struct SseEventSource {
    http: Client,
    url: String,
}

impl SseEventSource {
    /// Builds a source for `config.events_url()`. The client has a connect
    /// timeout but no overall timeout since the stream is long-lived.
    pub fn new(config: &ClientConfig) -> Result<Self, ChannelError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ChannelError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            url: config.events_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventSource for SseEventSource {
    async fn connect(&self, token: &SecretString) -> Result<Box<dyn EventStream>, ChannelError> {
        debug!("Opening push channel at {}", self.url);
        let response = self
            .http
            .get(&self.url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Rejected(rejection_reason(status, &body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Transport(format!(
                "push channel returned {}: {}",
                status,
                truncate_body(body.trim())
            )));
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| ChannelError::Transport(e.to_string()))
            })
            .boxed();
        Ok(Box::new(SseStream::new(chunks)))
    }
}

fn rejection_reason(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unauthorized")
                .to_string()
        })
}

/// Decodes a byte stream into frames.
pub struct SseStream {
    chunks: BoxStream<'static, Result<Vec<u8>, ChannelError>>,
    decoder: SseDecoder,
    pending: VecDeque<SseFrame>,
}

impl SseStream {
    pub fn new(chunks: BoxStream<'static, Result<Vec<u8>, ChannelError>>) -> Self {
        Self {
            chunks,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl EventStream for SseStream {
    async fn next_frame(&mut self) -> Result<Option<SseFrame>, ChannelError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            match self.chunks.next().await {
                Some(Ok(bytes)) => self.pending.extend(self.decoder.push(&bytes)),
                Some(Err(e)) => return Err(e),
                None => return Ok(None),
            }
        }
    }
}
