//! Incremental `text/event-stream` decoder.
//!
//! Bytes are fed in whatever chunks the network delivers. Lines may end in
//! `\n`, `\r\n` or `\r`, and a chunk boundary may fall anywhere, including
//! inside a UTF-8 sequence or between `\r` and `\n`. Complete events come
//! out in order.
//!
//! A line or an event larger than [`MAX_EVENT_BYTES`] is dropped whole so a
//! server that never ends a line cannot grow the buffers without bound.

use tracing::warn;

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type from the `event:` field; `None` means `message`.
    pub event: Option<String>,
    /// Data lines joined with `\n`.
    pub data: String,
    /// Last event id seen on the stream so far.
    pub id: Option<String>,
}

impl SseEvent {
    /// Whether a browser would deliver this to `onmessage`.
    pub fn is_message(&self) -> bool {
        self.event.as_deref().is_none_or(|t| t == "message")
    }
}

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Upper bound on one line and on the joined data of one event.
pub const MAX_EVENT_BYTES: usize = 1 << 20;

/// Decoder state carried between chunks.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    /// Previous byte was `\r`; a following `\n` belongs to the same line end.
    after_cr: bool,
    /// Bytes of the stream seen so far, capped at the BOM length.
    seen: usize,
    data: String,
    event_type: Option<String>,
    last_event_id: Option<String>,
    /// The current line outgrew the limit; the rest of it is skipped.
    line_overflow: bool,
    /// The pending event outgrew the limit and will not be dispatched.
    event_overflow: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk and return the events it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();

        for &byte in chunk {
            if self.seen < BOM.len() {
                self.seen += 1;
                self.line.push(byte);
                if self.line.as_slice() == BOM {
                    self.line.clear();
                    continue;
                }
                if !BOM.starts_with(&self.line) {
                    // Not a BOM after all; replay what was held back.
                    self.seen = BOM.len();
                    let held = std::mem::take(&mut self.line);
                    events.extend(self.feed(&held));
                }
                continue;
            }

            if self.after_cr {
                self.after_cr = false;
                if byte == b'\n' {
                    continue;
                }
            }

            match byte {
                b'\n' => self.end_line(&mut events),
                b'\r' => {
                    self.after_cr = true;
                    self.end_line(&mut events);
                }
                _ if self.line.len() < MAX_EVENT_BYTES => self.line.push(byte),
                _ => self.line_overflow = true,
            }
        }

        events
    }

    fn end_line(&mut self, events: &mut Vec<SseEvent>) {
        let raw = std::mem::take(&mut self.line);
        if std::mem::take(&mut self.line_overflow) {
            warn!(limit = MAX_EVENT_BYTES, "dropping oversized event-stream line");
            self.event_overflow = true;
            return;
        }
        let line = String::from_utf8_lossy(&raw);

        if line.is_empty() {
            if let Some(event) = self.dispatch() {
                events.push(event);
            }
            return;
        }

        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };

        match field {
            "data" if self.event_overflow => {}
            "data" if self.data.len() + value.len() >= MAX_EVENT_BYTES => {
                warn!(limit = MAX_EVENT_BYTES, "dropping oversized event");
                self.event_overflow = true;
                self.data = String::new();
            }
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "event" => self.event_type = Some(value.to_string()),
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_string()),
            // `retry` and unknown fields are ignored.
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event_type = self.event_type.take();
        if std::mem::take(&mut self.event_overflow) {
            self.data = String::new();
            return None;
        }
        if self.data.is_empty() {
            return None;
        }

        let mut data = std::mem::take(&mut self.data);
        data.pop();

        Some(SseEvent {
            event: event_type.filter(|t| !t.is_empty()),
            data,
            id: self.last_event_id.clone(),
        })
    }
}
