//! Incremental decoder for `text/event-stream` bodies.
//!
//! Chunks may split lines and multibyte characters anywhere; complete events
//! are returned as soon as their terminating blank line arrives. Lines end in
//! LF or CRLF.

/// Event name used when a frame has no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

impl SseFrame {
    pub fn new(event: &str, data: &str) -> Self {
        Self {
            event: event.to_string(),
            data: data.to_string(),
            id: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
    retry_ms: Option<u64>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last `id:` seen on the stream.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_id.as_deref()
    }

    /// Reconnection delay requested by the server with `retry:`.
    pub fn retry_ms(&self) -> Option<u64> {
        self.retry_ms
    }

    /// Feeds a chunk and returns every frame it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let mut line = &self.buffer[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line).into_owned();
            start = end + 1;

            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        self.buffer.drain(..start);
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.parse() {
                    self.retry_ms = Some(ms);
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            id: self.last_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let frames =
            decoder.push(b"event: issuanceStatusUpdate\ndata: {\"taskId\":\"t1\"}\n\n");
        assert_eq!(
            frames,
            vec![SseFrame::new("issuanceStatusUpdate", "{\"taskId\":\"t1\"}")]
        );
    }

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: issuance").is_empty());
        assert!(decoder.push(b"StatusUpdate\r\ndata: {\"a\"").is_empty());
        let frames = decoder.push(b":1}\r\n\r\nevent: x\n");
        assert_eq!(frames, vec![SseFrame::new("issuanceStatusUpdate", "{\"a\":1}")]);
    }

    #[test]
    fn test_split_multibyte_character() {
        let mut decoder = SseDecoder::new();
        let payload = "data: Zoë\n\n".as_bytes();
        let cut = payload.iter().position(|&b| b == 0xc3).unwrap() + 1;
        assert!(decoder.push(&payload[..cut]).is_empty());
        let frames = decoder.push(&payload[cut..]);
        assert_eq!(frames[0].data, "Zoë");
    }

    #[test]
    fn test_multiline_data_comments_and_default_event() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b": keep-alive\n\ndata: line one\ndata:line two\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, DEFAULT_EVENT);
        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[test]
    fn test_event_without_data_is_not_dispatched() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: sessionTerminated\n\n").is_empty());
        // The event name does not leak into the next frame
        let frames = decoder.push(b"data: x\n\n");
        assert_eq!(frames[0].event, DEFAULT_EVENT);
    }

    #[test]
    fn test_id_and_retry() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"id: 42\nretry: 1500\nretry: soon\ndata: x\n\ndata: y\n\n");
        assert_eq!(frames[0].id.as_deref(), Some("42"));
        assert_eq!(frames[1].id.as_deref(), Some("42"));
        assert_eq!(decoder.last_event_id(), Some("42"));
        assert_eq!(decoder.retry_ms(), Some(1500));
    }

    #[test]
    fn test_incomplete_event_is_held() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: partial\n").is_empty());
        assert_eq!(decoder.push(b"\n").len(), 1);
    }
}
