//! Push channel: server-sent status updates routed into the tracker.

pub mod binding;
pub mod source;
pub mod sse;

pub use binding::{ChannelBinding, ChannelState, ReconnectPolicy, SESSION_TERMINATED};
pub use source::{EventSource, EventStream, SseEventSource, SseStream};
pub use sse::{SseDecoder, SseFrame};
