//! Line framing for streamed upstream bodies.
//!
//! Network reads do not line up with frame boundaries: one read may carry
//! half a frame, or several. Bytes are buffered until a full line is
//! available, so multi-byte characters split across reads survive intact.

use std::mem;

/// Splits a byte stream into complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line completed by them, without terminators.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&raw));
        }
        lines
    }

    /// Whatever trailed the last newline when the stream ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = mem::take(&mut self.pending);
        let line = decode_line(&rest);
        if line.trim().is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(|c| c == '\n' || c == '\r')
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Payload of a `data:` field.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Server-sent events parser over a `LineBuffer`.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    lines: LineBuffer,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.lines
            .push(bytes)
            .iter()
            .filter_map(|line| parse_line(line))
            .collect()
    }

    pub fn flush(&mut self) -> Vec<SseEvent> {
        self.lines
            .finish()
            .and_then(|line| parse_line(&line))
            .into_iter()
            .collect()
    }
}

/// Only `data:` fields matter upstream; `event:`, `id:`, `retry:` and `:` comments are dropped.
fn parse_line(line: &str) -> Option<SseEvent> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    let trimmed = data.trim();

    if trimmed.is_empty() {
        None
    } else if trimmed == "[DONE]" {
        Some(SseEvent::Done)
    } else {
        Some(SseEvent::Data(data.to_string()))
    }
}
