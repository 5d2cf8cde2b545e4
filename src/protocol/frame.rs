//! Wire framing for run events.
//!
//! Three encodings are produced and accepted:
//! - SSE with an event line: `event: <TYPE>\ndata: <json>\n\n`
//! - SSE data only: `data: <json>\n\n`
//! - bare newline-delimited JSON: `<json>\n`

use serde_json::Value;
use thiserror::Error;

use super::events::RunEvent;
use crate::error::RunlineError;

/// How frames are written to the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FrameStyle {
    #[default]
    SseWithEvent,
    SseData,
    Ndjson,
}

/// Encode one event as a complete frame.
pub fn encode_frame(event: &RunEvent, style: FrameStyle) -> Result<String, RunlineError> {
    let json = serde_json::to_string(event)?;
    Ok(match style {
        FrameStyle::SseWithEvent => format!("event: {}\ndata: {json}\n\n", event.kind()),
        FrameStyle::SseData => format!("data: {json}\n\n"),
        FrameStyle::Ndjson => format!("{json}\n"),
    })
}

/// A frame that could not be decoded. Callers log and skip it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed frame: {reason}")]
pub struct FrameError {
    pub frame: String,
    pub reason: String,
}

/// Longest line the decoder will hold while waiting for its terminator.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Prefix of an oversized line kept in the [`FrameError`].
const OVERSIZED_PREVIEW_BYTES: usize = 64;

/// Incremental decoder with a carry-over buffer for partial lines.
///
/// A line longer than the cap is reported once as a [`FrameError`] and the
/// rest of it, up to the next newline, is discarded.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    pending_event: Option<String>,
    max_line: usize,
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE_BYTES)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            pending_event: None,
            max_line: max_line.max(1),
            discarding: false,
        }
    }

    /// Feed one I/O chunk; returns every frame completed by it, in order.
    pub fn push(&mut self, mut chunk: &[u8]) -> Vec<Result<RunEvent, FrameError>> {
        let mut frames = Vec::new();

        if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(offset) => {
                    self.discarding = false;
                    chunk = &chunk[offset + 1..];
                }
                None => return frames,
            }
        }

        self.buffer.extend_from_slice(chunk);
        let mut start = 0;

        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if end - start > self.max_line {
                frames.push(Err(self.oversized(&self.buffer[start..end])));
            } else {
                let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
                if let Some(frame) = self.decode_line(line.trim_end_matches('\r')) {
                    frames.push(frame);
                }
            }
            start = end + 1;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }
        if self.buffer.len() > self.max_line {
            frames.push(Err(self.oversized(&self.buffer)));
            self.buffer.clear();
            self.discarding = true;
        }
        frames
    }

    /// Decode whatever is left once the transport has closed.
    pub fn finish(&mut self) -> Option<Result<RunEvent, FrameError>> {
        self.discarding = false;
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest).into_owned();
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        self.decode_line(line)
    }

    /// Bytes held back waiting for a line terminator.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn oversized(&self, line: &[u8]) -> FrameError {
        let preview = &line[..line.len().min(OVERSIZED_PREVIEW_BYTES)];
        FrameError {
            frame: String::from_utf8_lossy(preview).into_owned(),
            reason: format!("line exceeds {} bytes", self.max_line),
        }
    }

    fn decode_line(&mut self, line: &str) -> Option<Result<RunEvent, FrameError>> {
        if line.trim().is_empty() {
            self.pending_event = None;
            return None;
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(name) = sse_field(line, "event") {
            self.pending_event = Some(name.to_string());
            return None;
        }
        if sse_field(line, "id").is_some() || sse_field(line, "retry").is_some() {
            return None;
        }
        if let Some(data) = sse_field(line, "data") {
            if data == "[DONE]" {
                return None;
            }
            let event_name = self.pending_event.clone();
            return Some(decode_payload(data, event_name.as_deref()));
        }
        Some(decode_payload(line.trim(), None))
    }
}

fn sse_field<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest).trim_end())
}

/// Decode a JSON body. When the body has no `type`, the SSE event name
/// supplies it and the body is taken as the event's data.
fn decode_payload(body: &str, event_name: Option<&str>) -> Result<RunEvent, FrameError> {
    let malformed = |reason: String| FrameError {
        frame: body.to_string(),
        reason,
    };

    let mut value: Value = serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;
    let Some(obj) = value.as_object_mut() else {
        return Err(malformed("frame is not a JSON object".to_string()));
    };

    if !obj.contains_key("type") {
        let Some(name) = event_name else {
            return Err(malformed("frame has no type".to_string()));
        };
        let data = Value::Object(std::mem::take(obj));
        obj.insert("type".to_string(), Value::String(name.to_string()));
        obj.insert("data".to_string(), data);
    }
    if !obj.contains_key("data") {
        obj.insert("data".to_string(), Value::Object(Default::default()));
    }

    serde_json::from_value(value).map_err(|e| malformed(e.to_string()))
}
