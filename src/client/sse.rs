//! Incremental decoding of the gateway's `text/event-stream` responses.
//!
//! Raw bytes are buffered until a newline, so a chunk boundary can fall
//! anywhere (inside a JSON object, inside a multi-byte character) without
//! changing the decoded output. Each `data:` line is then decoded into a
//! [`StreamPayload`].

use crate::error::{GatewayError, GatewayResult};
use crate::types::StreamChunk;
use serde_json::Value;
use serde_json::error::Category;
use tracing::debug;

const DONE_SENTINEL: &str = "[DONE]";

/// Parse failures that are expected from fragmented upstream output and
/// must not abort the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentIssue {
    /// The payload ended before the JSON value was complete.
    Incomplete,
    /// The payload is not valid JSON syntax.
    Malformed,
}

/// Shape of one decoded event payload, in fallback order.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamPayload {
    /// An explicit `error` field. Fatal.
    Failure(String),
    /// Delta carried in `content`.
    Content(String),
    /// Delta carried in `text`.
    Text(String),
    /// Valid JSON with no usable field (keep-alives, metadata).
    Empty,
}

impl StreamPayload {
    pub fn from_value(value: &Value) -> Self {
        if let Some(error) = value.get("error").filter(|e| is_truthy(e)) {
            let message = match error {
                Value::String(s) => s.clone(),
                Value::Object(map) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
                other => other.to_string(),
            };
            return Self::Failure(message);
        }
        if let Some(content) = non_empty_str(value, "content") {
            return Self::Content(content.to_string());
        }
        if let Some(text) = non_empty_str(value, "text") {
            return Self::Text(text.to_string());
        }
        Self::Empty
    }

    pub fn delta(&self) -> Option<&str> {
        match self {
            Self::Content(delta) | Self::Text(delta) => Some(delta),
            Self::Failure(_) | Self::Empty => None,
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn non_empty_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Result of decoding one `data:` payload.
#[derive(Clone, Debug, PartialEq)]
pub enum DecodedEvent {
    Payload(StreamPayload),
    Done,
    Skipped(FragmentIssue),
}

/// Decodes the text after `data:`.
pub fn decode_payload(payload: &str) -> GatewayResult<DecodedEvent> {
    if payload == DONE_SENTINEL {
        return Ok(DecodedEvent::Done);
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => Ok(DecodedEvent::Payload(StreamPayload::from_value(&value))),
        Err(err) => match err.classify() {
            Category::Eof => Ok(DecodedEvent::Skipped(FragmentIssue::Incomplete)),
            Category::Syntax => Ok(DecodedEvent::Skipped(FragmentIssue::Malformed)),
            Category::Data | Category::Io => Err(GatewayError::malformed(err.to_string())),
        },
    }
}

/// Decodes one complete line. Non-`data:` lines (comments, `event:`, `id:`)
/// and empty payloads yield `None`.
pub fn decode_line(line: &str) -> Option<GatewayResult<DecodedEvent>> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    Some(decode_payload(payload))
}

/// Splits a byte stream into lines regardless of chunk boundaries.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends bytes and returns every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let line = self.pending[start..end]
                .strip_suffix(b"\r")
                .unwrap_or(&self.pending[start..end]);
            lines.push(String::from_utf8_lossy(line).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Returns whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Whether the caller should keep reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished,
}

/// Turns raw stream bytes into ordered deltas and the accumulated text.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    lines: LineBuffer,
    text: String,
    finished: bool,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Feeds one transport chunk, invoking `on_chunk(delta, accumulated)`
    /// for each delta in arrival order.
    pub fn feed<F>(&mut self, bytes: &[u8], on_chunk: &mut F) -> GatewayResult<Flow>
    where
        F: FnMut(&str, &str) + ?Sized,
    {
        if self.finished {
            return Ok(Flow::Finished);
        }
        for line in self.lines.push(bytes) {
            if self.apply_line(&line, on_chunk)? == Flow::Finished {
                return Ok(Flow::Finished);
            }
        }
        Ok(Flow::Continue)
    }

    /// Flushes a trailing line that had no newline.
    pub fn finish<F>(&mut self, on_chunk: &mut F) -> GatewayResult<()>
    where
        F: FnMut(&str, &str) + ?Sized,
    {
        if self.finished {
            return Ok(());
        }
        if let Some(line) = self.lines.finish() {
            self.apply_line(&line, on_chunk)?;
        }
        self.finished = true;
        Ok(())
    }

    fn apply_line<F>(&mut self, line: &str, on_chunk: &mut F) -> GatewayResult<Flow>
    where
        F: FnMut(&str, &str) + ?Sized,
    {
        let Some(event) = decode_line(line) else {
            return Ok(Flow::Continue);
        };
        match event? {
            DecodedEvent::Skipped(issue) => {
                debug!(?issue, "skipping undecodable stream fragment");
                Ok(Flow::Continue)
            }
            DecodedEvent::Payload(StreamPayload::Failure(message)) => {
                Err(GatewayError::Stream(message))
            }
            event => match to_stream_chunk(&event) {
                Some(StreamChunk::Delta(delta)) => {
                    self.text.push_str(&delta);
                    on_chunk(&delta, &self.text);
                    Ok(Flow::Continue)
                }
                Some(StreamChunk::Done) => {
                    self.finished = true;
                    Ok(Flow::Finished)
                }
                None => Ok(Flow::Continue),
            },
        }
    }
}

/// Maps a decoded event to the public chunk type.
pub fn to_stream_chunk(event: &DecodedEvent) -> Option<StreamChunk> {
    match event {
        DecodedEvent::Done => Some(StreamChunk::Done),
        DecodedEvent::Payload(payload) => payload.delta().map(|d| StreamChunk::Delta(d.to_string())),
        DecodedEvent::Skipped(_) => None,
    }
}
