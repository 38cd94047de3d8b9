use memchr::memchr;
use std::error::Error;
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use crate::api::GenerateContentResponse;

/// Provider or network failure while talking to the generation endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The request never produced a response (DNS, TLS, connection reset...).
    Request(String),
    /// The endpoint answered with a non-success status.
    Status { code: u16, body: String },
    /// The body broke off while a stream was being read.
    Stream(String),
    /// A payload could not be decoded, or carried an error object.
    Decode(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Request(message) => write!(f, "Request failed: {message}"),
            TransportError::Status { code, body } => {
                write!(f, "HTTP {code}\n{}", format_api_error(body))
            }
            TransportError::Stream(message) => write!(f, "Stream interrupted: {message}"),
            TransportError::Decode(payload) => write!(f, "{}", format_api_error(payload)),
        }
    }
}

impl Error for TransportError {}

#[derive(Clone, Debug)]
pub enum StreamMessage {
    Chunk(String),
    Error(TransportError),
    End,
}

/// Producer half of a [`FragmentStream`].
#[derive(Clone, Debug)]
pub struct StreamSender {
    tx: mpsc::UnboundedSender<StreamMessage>,
}

impl StreamSender {
    /// Returns false once the consumer is gone.
    pub fn chunk(&self, text: impl Into<String>) -> bool {
        self.tx.send(StreamMessage::Chunk(text.into())).is_ok()
    }

    pub fn error(&self, error: TransportError) {
        let _ = self.tx.send(StreamMessage::Error(error));
    }

    pub fn end(&self) {
        let _ = self.tx.send(StreamMessage::End);
    }
}

/// A finite, non-restartable sequence of text fragments.
///
/// `next` yields fragments in emission order, then `None`. An error ends the
/// sequence: it is yielded once and every later call returns `None`.
#[derive(Debug)]
pub struct FragmentStream {
    rx: mpsc::UnboundedReceiver<StreamMessage>,
    finished: bool,
    _cancel_on_drop: Option<DropGuard>,
}

impl FragmentStream {
    pub fn channel() -> (StreamSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            StreamSender { tx },
            Self {
                rx,
                finished: false,
                _cancel_on_drop: None,
            },
        )
    }

    /// A stream that replays prepared items, then ends.
    pub fn from_fragments(items: impl IntoIterator<Item = Result<String, TransportError>>) -> Self {
        let (sender, stream) = Self::channel();
        for item in items {
            match item {
                Ok(text) => {
                    sender.chunk(text);
                }
                Err(error) => sender.error(error),
            }
        }
        sender.end();
        stream
    }

    /// Cancels the producer's token when the stream is dropped.
    pub fn with_cancel_guard(mut self, guard: DropGuard) -> Self {
        self._cancel_on_drop = Some(guard);
        self
    }

    pub async fn next(&mut self) -> Option<Result<String, TransportError>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(StreamMessage::Chunk(text)) => Some(Ok(text)),
            Some(StreamMessage::Error(error)) => {
                self.finished = true;
                Some(Err(error))
            }
            Some(StreamMessage::End) | None => {
                self.finished = true;
                None
            }
        }
    }
}

fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

fn handle_data_payload(payload: &str, tx: &StreamSender) -> bool {
    if payload.trim().is_empty() {
        return false;
    }

    let value = match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => value,
        Err(_) => {
            tx.error(TransportError::Decode(payload.to_string()));
            return true;
        }
    };

    if value.get("error").is_some() {
        tx.error(TransportError::Decode(payload.to_string()));
        return true;
    }

    match serde_json::from_value::<GenerateContentResponse>(value) {
        Ok(response) => {
            let text = response.text();
            if !text.is_empty() && !tx.chunk(text) {
                return true;
            }
            false
        }
        Err(_) => {
            tx.error(TransportError::Decode(payload.to_string()));
            true
        }
    }
}

/// Handles one SSE line. Returns true when the stream should stop.
fn process_sse_line(line: &str, tx: &StreamSender) -> bool {
    extract_data_payload(line)
        .map(|payload| handle_data_payload(payload, tx))
        .unwrap_or(false)
}

/// Splits a byte stream into SSE lines and forwards decoded fragments.
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw body bytes. Returns true when the stream should stop.
    pub fn push(&mut self, bytes: &[u8], tx: &StreamSender) -> bool {
        self.buffer.extend_from_slice(bytes);

        while let Some(newline_pos) = memchr(b'\n', &self.buffer) {
            let should_end = match std::str::from_utf8(&self.buffer[..newline_pos]) {
                Ok(line) => process_sse_line(line.trim(), tx),
                Err(e) => {
                    tracing::debug!("Invalid UTF-8 in stream: {e}");
                    false
                }
            };
            self.buffer.drain(..=newline_pos);
            if should_end {
                return true;
            }
        }
        false
    }

    /// Flushes a trailing line that arrived without a newline.
    pub fn finish(&mut self, tx: &StreamSender) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        let rest = std::mem::take(&mut self.buffer);
        match std::str::from_utf8(&rest) {
            Ok(line) => process_sse_line(line.trim(), tx),
            Err(_) => false,
        }
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value
                .get("error")
                .and_then(|v| v.as_str().map(str::to_owned))
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            if let Some(summary) = extract_error_summary(&json_value) {
                if !summary.is_empty() {
                    return format!("API Error: {}\n```json\n{}\n```", summary, pretty_json);
                }
            }
            return format!("API Error:\n```json\n{}\n```", pretty_json);
        }
    }

    format!("API Error:\n```\n{}\n```", trimmed)
}
