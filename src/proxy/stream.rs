//! Upstream stream frame decoding.
//!
//! Provides [`FrameDecoder`] for line-buffered extraction of token deltas
//! from event-stream style upstream responses. Handles TCP chunk boundary
//! reassembly: a record split across chunks is decoded once it is complete.

use serde_json::Value;

use super::extract::{extract_text, STREAM_SHAPES};
use crate::error::Error;

/// Cap on the carry buffer when no newline arrives.
const MAX_CARRY_BYTES: usize = 64 * 1024;

/// Record field marker.
const DATA_PREFIX: &str = "data:";

/// Terminal sentinel payload.
const DONE_SENTINEL: &str = "[DONE]";

/// Responses API completion event type, treated as a terminal sentinel.
const RESPONSE_COMPLETED: &str = "response.completed";

/// A decoded upstream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of generated text.
    Delta(String),
    /// The upstream signalled completion.
    Done,
}

/// How non-`data:` lines are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `text/event-stream`: SSE fields, comments and blank lines are noise.
    EventStream,
    /// Anything else: every non-blank, non-`data:` line is forwarded raw.
    Plain,
}

impl Framing {
    /// Pick framing from an upstream `Content-Type` header value.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.to_ascii_lowercase().contains("text/event-stream") => {
                Framing::EventStream
            }
            _ => Framing::Plain,
        }
    }
}

/// Line-buffered decoder for one upstream call.
///
/// Buffers raw bytes across chunk boundaries, reassembles complete lines,
/// and turns them into [`StreamEvent`]s. After [`StreamEvent::Done`] has been
/// emitted, further input is ignored.
pub struct FrameDecoder {
    carry: Vec<u8>,
    framing: Framing,
    done: bool,
    /// Skipping the tail of an overlong line up to its `\n`.
    discarding: bool,
}

impl FrameDecoder {
    /// Create a new decoder with an empty carry buffer.
    pub fn new(framing: Framing) -> Self {
        Self {
            carry: Vec::new(),
            framing,
            done: false,
            discarding: false,
        }
    }

    /// Whether the terminal sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one chunk of upstream bytes and collect the events it completes.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        self.carry.extend_from_slice(bytes);

        if self.discarding {
            match self.carry.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.carry.drain(..=pos);
                    self.discarding = false;
                }
                None => {
                    self.carry.clear();
                    return events;
                }
            }
        }

        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            self.process_line(&line[..pos], &mut events);
            if self.done {
                self.carry.clear();
                return events;
            }
        }

        if self.carry.len() > MAX_CARRY_BYTES {
            tracing::warn!(
                carry_bytes = self.carry.len(),
                "Stream line exceeded carry limit without newline; dropping it"
            );
            self.carry.clear();
            self.discarding = true;
        }

        events
    }

    /// Flush any remaining carry as a final line once the upstream has closed.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done || self.discarding || self.carry.is_empty() {
            return events;
        }

        let line = std::mem::take(&mut self.carry);
        self.process_line(&line, &mut events);
        events
    }

    /// Process a single complete line (without its `\n`).
    fn process_line(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            return;
        }

        match line.strip_prefix(DATA_PREFIX) {
            Some(payload) => self.process_data(payload.trim_start(), events),
            None if self.framing == Framing::EventStream && is_framing_noise(line) => {}
            None => events.push(StreamEvent::Delta(line.to_string())),
        }
    }

    /// Process the payload of a `data:` line.
    fn process_data(&mut self, payload: &str, events: &mut Vec<StreamEvent>) {
        if payload == DONE_SENTINEL {
            self.done = true;
            events.push(StreamEvent::Done);
            return;
        }

        match parse_record(payload) {
            Ok(value) => {
                if value.get("type").and_then(Value::as_str) == Some(RESPONSE_COMPLETED) {
                    self.done = true;
                    events.push(StreamEvent::Done);
                    return;
                }
                if let Some((shape, text)) = extract_text(&value, STREAM_SHAPES) {
                    tracing::trace!(shape = ?shape, len = text.len(), "Decoded token delta");
                    events.push(StreamEvent::Delta(text));
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Forwarding unparseable stream record as raw text");
                events.push(StreamEvent::Delta(payload.to_string()));
            }
        }
    }
}

fn parse_record(payload: &str) -> Result<Value, Error> {
    serde_json::from_str(payload).map_err(|e| Error::StreamParse(e.to_string()))
}

/// SSE `event:`/`id:`/`retry:` fields and `:` comments.
fn is_framing_noise(line: &str) -> bool {
    line.starts_with(':')
        || line.starts_with("event:")
        || line.starts_with("id:")
        || line.starts_with("retry:")
}
