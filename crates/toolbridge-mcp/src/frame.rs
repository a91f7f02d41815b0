//! Stream frame parsing and capability scanning.
//!
//! Responses from HTTP servers arrive as plain JSON, server-sent events, or
//! newline-delimited JSON, split into arbitrary chunks. [`FrameDecoder`]
//! buffers the chunks into complete data units, and [`scan_capabilities`]
//! looks for capability-shaped data inside each unit.

use std::fmt;
use std::time::Duration;

use bytes::BytesMut;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::capability::CapabilityDescriptor;
use crate::error::{McpError, TransportError};
use crate::protocol::{PromptDefinition, ResourceDefinition};

/// End-of-stream sentinel some servers emit.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// The event type (from "event:" line)
    pub event: Option<String>,
    /// The event data (from "data:" lines)
    pub data: String,
    /// The event ID (from "id:" line)
    pub id: Option<String>,
    /// Retry value (from "retry:" line)
    pub retry: Option<u64>,
}

impl SseEvent {
    fn data(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: data.into(),
            id: None,
            retry: None,
        }
    }

    /// Check if this is a [DONE] marker.
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_SENTINEL
    }

    /// Whether this is the handshake event naming a session endpoint.
    pub fn is_endpoint(&self) -> bool {
        self.event.as_deref() == Some("endpoint")
    }
}

/// Bytes of a partial line. Lines are decoded only once complete, so a
/// multi-byte character split across chunks stays intact.
#[derive(Default)]
struct LineBuffer {
    bytes: BytesMut,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Next complete line without its `\n`.
    fn next_line(&mut self) -> Option<String> {
        let pos = self.bytes.iter().position(|b| *b == b'\n')?;
        let line = self.bytes.split_to(pos + 1);
        Some(String::from_utf8_lossy(&line[..pos]).into_owned())
    }

    /// Whatever follows the last newline.
    fn take_rest(&mut self) -> String {
        let rest = self.bytes.split();
        String::from_utf8_lossy(&rest).into_owned()
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }
}

impl fmt::Debug for LineBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineBuffer").field("len", &self.len()).finish()
    }
}

/// SSE parser that handles line buffering across TCP packets.
#[derive(Default)]
pub struct SseParser {
    /// Buffer for incomplete lines
    buffer: LineBuffer,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_id: Option<String>,
    current_retry: Option<u64>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the parser and return any complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(bytes);
        let mut events = Vec::new();

        while let Some(raw) = self.buffer.next_line() {
            let line = raw.trim_end_matches('\r');

            // Empty line signals end of event
            if line.is_empty() {
                if let Some(event) = self.finalize_event() {
                    events.push(event);
                }
                continue;
            }

            if let Some((field, value)) = Self::parse_field(line) {
                match field {
                    "event" => self.current_event = Some(value.to_string()),
                    "data" => self.current_data.push(value.to_string()),
                    "id" => self.current_id = Some(value.to_string()),
                    "retry" => {
                        if let Ok(ms) = value.parse() {
                            self.current_retry = Some(ms);
                        }
                    }
                    _ => {}
                }
            }
        }

        events
    }

    /// Flush an event left open when the stream ended without a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = self.buffer.take_rest();
        let rest = rest.trim_end_matches('\r');
        if !rest.is_empty() {
            if let Some((field, value)) = Self::parse_field(rest) {
                if field == "data" {
                    self.current_data.push(value.to_string());
                }
            }
        }
        self.finalize_event()
    }

    fn parse_field(line: &str) -> Option<(&str, &str)> {
        // Lines starting with : are comments
        if line.starts_with(':') {
            return None;
        }

        match line.split_once(':') {
            Some((field, value)) => Some((field, value.strip_prefix(' ').unwrap_or(value))),
            None => Some((line, "")),
        }
    }

    fn finalize_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            self.current_event = None;
            self.current_id = None;
            self.current_retry = None;
            return None;
        }

        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
            id: self.current_id.take(),
            retry: self.current_retry.take(),
        };

        self.current_data.clear();
        Some(event)
    }
}

impl fmt::Debug for SseParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseParser")
            .field("buffer_len", &self.buffer.len())
            .field("current_data_lines", &self.current_data.len())
            .finish()
    }
}

/// How a byte stream is split into data units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// `text/event-stream`
    EventStream,
    /// One JSON document per line.
    NdJson,
}

impl Framing {
    /// Pick a framing from a content type. Plain JSON yields `None`.
    pub fn detect(content_type: Option<&str>) -> Option<Self> {
        let ct = content_type?.to_ascii_lowercase();
        if ct.contains("text/event-stream") {
            Some(Self::EventStream)
        } else if ct.contains("ndjson") || ct.contains("jsonl") || ct.contains("json-seq") {
            Some(Self::NdJson)
        } else {
            None
        }
    }

    /// Guess a framing from body text when the content type says nothing.
    pub fn sniff(body: &str) -> Self {
        let first = body.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        if ["data:", "event:", "id:", ":"].iter().any(|p| first.starts_with(p)) {
            Self::EventStream
        } else {
            Self::NdJson
        }
    }
}

/// Incremental decoder producing one [`SseEvent`] per data unit.
///
/// Newline-delimited units are reported as events with only `data` set.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    sse: SseParser,
    lines: LineBuffer,
    done: bool,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            sse: SseParser::new(),
            lines: LineBuffer::default(),
            done: false,
        }
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Whether the end-of-stream sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed a chunk; returns the data units it completed.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        let events = match self.framing {
            Framing::EventStream => self.sse.feed(bytes),
            Framing::NdJson => {
                self.lines.extend(bytes);
                let mut events = Vec::new();
                while let Some(raw) = self.lines.next_line() {
                    let line = raw.trim();
                    if !line.is_empty() {
                        events.push(SseEvent::data(line));
                    }
                }
                events
            }
        };
        self.cut_at_sentinel(events)
    }

    /// Flush whatever is buffered once the stream ends.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.done {
            return Vec::new();
        }
        let events = match self.framing {
            Framing::EventStream => self.sse.finish().into_iter().collect(),
            Framing::NdJson => {
                let rest = self.lines.take_rest();
                let rest = rest.trim();
                if rest.is_empty() {
                    Vec::new()
                } else {
                    vec![SseEvent::data(rest)]
                }
            }
        };
        self.cut_at_sentinel(events)
    }

    fn cut_at_sentinel(&mut self, events: Vec<SseEvent>) -> Vec<SseEvent> {
        match events.iter().position(SseEvent::is_done) {
            Some(pos) => {
                self.done = true;
                events.into_iter().take(pos).collect()
            }
            None => events,
        }
    }
}

/// Decode a complete body into data units.
pub fn decode_body(body: &str, framing: Framing) -> Vec<SseEvent> {
    let mut decoder = FrameDecoder::new(framing);
    let mut events = decoder.feed(body.as_bytes());
    events.extend(decoder.finish());
    events
}

fn looks_like_descriptor(value: &Value) -> bool {
    value.get("name").map(Value::is_string).unwrap_or(false)
}

fn descriptor_array(value: &Value) -> Option<Vec<CapabilityDescriptor>> {
    let items = value.as_array()?;
    let caps: Vec<_> = items
        .iter()
        .filter(|v| looks_like_descriptor(v))
        .filter_map(CapabilityDescriptor::from_value)
        .collect();
    (!caps.is_empty()).then_some(caps)
}

/// Collect `tools`, `prompts` and `resources` arrays from an object.
fn listing_fields(value: &Value) -> Option<Vec<CapabilityDescriptor>> {
    let obj = value.as_object()?;
    let mut caps = Vec::new();

    if let Some(tools) = obj.get("tools").and_then(Value::as_array) {
        caps.extend(tools.iter().filter_map(CapabilityDescriptor::from_value));
    }
    if let Some(prompts) = obj.get("prompts").and_then(Value::as_array) {
        caps.extend(
            prompts
                .iter()
                .filter_map(|p| serde_json::from_value::<PromptDefinition>(p.clone()).ok())
                .map(CapabilityDescriptor::from),
        );
    }
    if let Some(resources) = obj.get("resources").and_then(Value::as_array) {
        caps.extend(
            resources
                .iter()
                .filter_map(|r| serde_json::from_value::<ResourceDefinition>(r.clone()).ok())
                .map(CapabilityDescriptor::from),
        );
    }

    (!caps.is_empty()).then_some(caps)
}

/// Look for capability-shaped data in one decoded document.
///
/// Shapes are tried in order: a JSON-RPC `result` carrying a listing (or
/// itself a descriptor array), a bare descriptor array, top-level listing
/// fields, then a `payload` wrapper, decoded again when it is a string.
pub fn scan_capabilities(value: &Value) -> Option<Vec<CapabilityDescriptor>> {
    if let Some(result) = value.get("result") {
        if let Some(caps) = listing_fields(result).or_else(|| descriptor_array(result)) {
            return Some(caps);
        }
    }

    if let Some(caps) = descriptor_array(value) {
        return Some(caps);
    }

    if let Some(caps) = listing_fields(value) {
        return Some(caps);
    }

    match value.get("payload")? {
        Value::String(text) => scan_text(text),
        nested => scan_capabilities(nested),
    }
}

/// Parse `text` as JSON and scan it. Non-JSON text matches nothing.
pub fn scan_text(text: &str) -> Option<Vec<CapabilityDescriptor>> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    scan_capabilities(&value)
}

/// Scan a complete response body, framed or plain.
pub fn scan_body(body: &str, content_type: Option<&str>) -> Option<Vec<CapabilityDescriptor>> {
    let framing = match Framing::detect(content_type) {
        Some(framing) => framing,
        None => {
            if let Some(caps) = scan_text(body) {
                return Some(caps);
            }
            Framing::sniff(body)
        }
    };
    decode_body(body, framing)
        .iter()
        .find_map(|event| scan_text(&event.data))
}

/// Consume a byte stream until capability-shaped data appears.
///
/// Stops at the first match, the `[DONE]` sentinel, or the end of the
/// stream; the latter two yield an empty list. Expiry of `deadline` is an
/// error.
pub async fn collect_capabilities<S, B, E>(
    mut stream: S,
    framing: Framing,
    deadline: Duration,
) -> Result<Vec<CapabilityDescriptor>, McpError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<TransportError>,
{
    let mut decoder = FrameDecoder::new(framing);

    let scan = async {
        loop {
            let events = match stream.next().await {
                Some(Ok(chunk)) => decoder.feed(chunk.as_ref()),
                Some(Err(e)) => return Err(McpError::Transport(e.into())),
                None => {
                    let events = decoder.finish();
                    return Ok(events
                        .iter()
                        .find_map(|e| scan_text(&e.data))
                        .unwrap_or_default());
                }
            };

            if let Some(caps) = events.iter().find_map(|e| scan_text(&e.data)) {
                debug!(count = caps.len(), "Capabilities found in stream");
                return Ok(caps);
            }
            if decoder.is_done() {
                return Ok(Vec::new());
            }
        }
    };

    tokio::time::timeout(deadline, scan)
        .await
        .map_err(|_| McpError::timeout("stream scan", deadline))?
}
