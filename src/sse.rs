//! Provider-agnostic Server-Sent Events framer.
//!
//! Generalizes the teacher's `utils::parse_sse_stream` (which decoded bytes
//! straight into `OpenAIChunk`) into a pure byte-feed parser that knows
//! nothing about any provider's JSON shape. Each adapter owns one
//! `SseFramer` and interprets the resulting [`SseEvent`]s itself.

/// One parsed SSE event: an optional event name plus joined `data:` lines.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE parser driven by feeding raw byte chunks as they arrive
/// off the wire.
#[derive(Debug, Default)]
pub struct SseFramer {
    buffer: String,
    pending_event: Option<String>,
    pending_data: Vec<String>,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes (decoded lossily as UTF-8) and return any complete
    /// events found. Call with an empty slice to flush a trailing event that
    /// wasn't terminated by a blank line (some servers close the connection
    /// without a final newline).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\r', '\n']);

            if line.is_empty() {
                if let Some(event) = self.take_pending_event() {
                    events.push(event);
                }
                continue;
            }
            self.consume_line(line);
        }

        events
    }

    /// Flush any buffered event that never received a terminating blank
    /// line (e.g. the connection closed mid-stream).
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.take_pending_event()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending_event = None;
        self.pending_data.clear();
    }

    fn consume_line(&mut self, line: &str) {
        if line.starts_with(':') {
            return; // comment line, ignored per the SSE spec
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => self.pending_event = Some(value.to_string()),
            "data" => self.pending_data.push(value.to_string()),
            // `id` and `retry` fields are part of the SSE spec but unused by
            // any provider this runtime talks to; ignored rather than erroring.
            _ => {}
        }
    }

    fn take_pending_event(&mut self) -> Option<SseEvent> {
        if self.pending_data.is_empty() && self.pending_event.is_none() {
            return None;
        }
        let data = self.pending_data.join("\n");
        let event = self.pending_event.take();
        self.pending_data.clear();
        Some(SseEvent { event, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_data_line() {
        let mut framer = SseFramer::new();
        let events = framer.feed(b"data: hello\n\n");
        assert_eq!(events, vec![SseEvent { event: None, data: "hello".into() }]);
    }

    #[test]
    fn joins_multiline_data() {
        let mut framer = SseFramer::new();
        let events = framer.feed(b"data: line one\ndata: line two\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn captures_event_name() {
        let mut framer = SseFramer::new();
        let events = framer.feed(b"event: content_block_delta\ndata: {}\n\n");
        assert_eq!(events[0].event.as_deref(), Some("content_block_delta"));
    }

    #[test]
    fn ignores_comment_lines() {
        let mut framer = SseFramer::new();
        let events = framer.feed(b": keep-alive\ndata: ping\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "ping");
    }

    #[test]
    fn handles_chunk_split_mid_line() {
        let mut framer = SseFramer::new();
        let mut events = framer.feed(b"data: par");
        assert!(events.is_empty());
        events = framer.feed(b"tial\n\n");
        assert_eq!(events[0].data, "partial");
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut framer = SseFramer::new();
        let events = framer.feed(b"data: no-trailing-blank-line\n");
        assert!(events.is_empty());
        let flushed = framer.finish().expect("pending event");
        assert_eq!(flushed.data, "no-trailing-blank-line");
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut framer = SseFramer::new();
        let events = framer.feed(b"data: one\n\ndata: two\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "one");
        assert_eq!(events[1].data, "two");
    }
}
