//! Data types for captured HTTP exchanges.
//!
//! Snapshots are immutable once frozen: headers are fixed when the respective
//! phase begins, bodies when their capture reaches a terminal state. Each
//! [`ExchangeRecord`] is exclusively owned by one exchange and dropped after
//! it has been logged.

use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use bytes::Bytes;
use std::fmt;
use std::time::{Duration, SystemTime};

use crate::body_capture::{CaptureState, CapturedBody};

/// Which side of the service the exchange was intercepted on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// The service received a request and produced a response.
    Inbound,
    /// The service issued a request to an external system.
    Outbound,
}

impl Direction {
    /// Travel direction of the request message, as rendered in the record.
    pub(crate) fn request_label(self) -> &'static str {
        match self {
            Direction::Inbound => "Inbound",
            Direction::Outbound => "Outbound",
        }
    }

    /// Travel direction of the response message; the opposite of the request.
    pub(crate) fn response_label(self) -> &'static str {
        match self {
            Direction::Inbound => "Outbound",
            Direction::Outbound => "Inbound",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.request_label())
    }
}

/// Character encoding declared by a body's content type.
///
/// Anything other than the encodings listed here is treated as UTF-8, as is a
/// missing or unparseable `charset` parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Charset {
    #[default]
    Utf8,
    Latin1,
}

impl Charset {
    fn parse(name: &str) -> Charset {
        match name.trim().trim_matches('"').to_ascii_lowercase().as_str() {
            "iso-8859-1" | "latin1" | "latin-1" => Charset::Latin1,
            _ => Charset::Utf8,
        }
    }
}

/// An owned, immutable copy of a request or response body, frozen once the
/// underlying stream reached a terminal state.
#[derive(Clone, Debug)]
pub struct BodySnapshot {
    bytes: Bytes,
    content_type: Option<String>,
    charset: Charset,
    state: CaptureState,
}

impl BodySnapshot {
    /// Buffered capture: copy a fully resident body.
    pub fn new(bytes: Bytes, content_type: Option<String>) -> Self {
        let charset = charset_of(content_type.as_deref());
        Self {
            bytes,
            content_type,
            charset,
            state: CaptureState::Complete,
        }
    }

    /// Freeze the output of a streaming capture, carrying over its terminal
    /// state so partial bodies are distinguishable from complete ones.
    pub(crate) fn from_capture(captured: CapturedBody, headers: &HeaderMap) -> Self {
        let content_type = content_type_of(headers);
        let charset = charset_of(content_type.as_deref());
        Self {
            bytes: captured.bytes,
            content_type,
            charset,
            state: captured.state,
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    /// True when the stream failed or was cancelled before exhaustion and the
    /// snapshot holds only the bytes observed up to that point.
    pub fn is_partial(&self) -> bool {
        !matches!(self.state, CaptureState::Complete)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decode the bytes under the declared charset. `None` means the bytes
    /// are not valid text in that encoding.
    pub fn text(&self) -> Option<String> {
        match self.charset {
            Charset::Utf8 => std::str::from_utf8(&self.bytes).ok().map(str::to_owned),
            Charset::Latin1 => Some(self.bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

/// Request-phase snapshot. Metadata is fixed at phase start; the body is
/// attached once its collector finishes.
#[derive(Clone, Debug)]
pub struct RequestSnapshot {
    /// When the interception point observed the request.
    pub timestamp: SystemTime,
    pub method: Method,
    /// Full URL for outbound calls, path + query for inbound ones.
    pub target: Uri,
    pub headers: HeaderMap,
    /// `None` when body capture is disabled by configuration.
    pub body: Option<BodySnapshot>,
}

/// Response-phase snapshot.
#[derive(Clone, Debug)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// `None` when body capture is disabled by configuration.
    pub body: Option<BodySnapshot>,
}

/// How the exchange ended, driving log severity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// A response arrived with an error status (>= 400).
    HttpError(StatusCode),
    /// No response arrived at all.
    TransportFailure(String),
}

impl Outcome {
    pub(crate) fn classify(status: StatusCode) -> Outcome {
        if status.is_client_error() || status.is_server_error() {
            Outcome::HttpError(status)
        } else {
            Outcome::Success
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, Outcome::Success)
    }
}

/// One fully assembled exchange, handed to the handler exactly once.
#[derive(Clone, Debug)]
pub struct ExchangeRecord {
    /// Matches concurrent log output back to a single exchange.
    pub correlation_id: u64,
    pub direction: Direction,
    pub request: RequestSnapshot,
    /// Absent for transport failures.
    pub response: Option<ResponseSnapshot>,
    pub outcome: Outcome,
    /// From request start until the response stream completed (or the
    /// failure was observed).
    pub elapsed: Duration,
}

pub(crate) fn content_type_of(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn charset_of(content_type: Option<&str>) -> Charset {
    let Some(raw) = content_type else {
        return Charset::Utf8;
    };
    raw.split(';')
        .skip(1)
        .find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| Charset::parse(value))
        })
        .unwrap_or_default()
}
