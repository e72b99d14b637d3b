//! Shared test utilities for certdesk integration tests.
//!
//! This module provides:
//! - Builders for preview rows, batch-start responses and status events
//! - `MockServer`, a local HTTP server for the REST API and the SSE channel

pub mod builders;
pub mod server;

pub use builders::*;
