//! Text frames of the push channel's pub/sub protocol (a STOMP 1.2 dialect).
//!
//! A frame on the wire is a command line, zero or more `key:value` header
//! lines, a blank line, the body, and a trailing NUL byte.

use std::{fmt, time::Duration};

use indexmap::IndexMap;
use thiserror::Error;

/// Byte terminating every frame.
pub const FRAME_TERMINATOR: char = '\0';
/// Payload of a heart-beat, which is a bare end-of-line outside any frame.
pub const HEARTBEAT_EOL: &str = "\n";
/// Protocol versions advertised in the CONNECT handshake.
pub const ACCEPT_VERSION: &str = "1.1,1.2";

/// Commands understood by the codec.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Alternative spelling of the client handshake.
    Stomp,
    /// Server handshake reply.
    Connected,
    /// Start receiving a destination.
    Subscribe,
    /// Stop receiving a destination.
    Unsubscribe,
    /// Client publish.
    Send,
    /// Acknowledge a message.
    Ack,
    /// Refuse a message.
    Nack,
    /// Graceful client goodbye.
    Disconnect,
    /// Payload delivered on a subscription.
    Message,
    /// Server confirmation of a `receipt` request.
    Receipt,
    /// Server-side failure; the session is over.
    Error,
    /// Any other command token; kept verbatim so it survives a round-trip.
    Other(String),
}

impl Command {
    /// Wire representation of the command.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Other(other) => other,
        }
    }

    fn parse(token: &str) -> Self {
        match token {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "SEND" => Self::Send,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    /// CONNECT and CONNECTED frames carry their headers unescaped.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasons a raw text message could not be decoded into a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameDecodeError {
    /// The message held nothing but whitespace.
    #[error("empty frame")]
    Empty,
    /// The first line is not a command token.
    #[error("frame has no command line")]
    MissingCommand,
    /// No blank line separates the headers from the body.
    #[error("{command} frame has no blank line before its body")]
    MissingBodySeparator {
        /// Command of the truncated frame.
        command: String,
    },
    /// A header line lacks the `:` separator.
    #[error("malformed header line `{line}`")]
    MalformedHeader {
        /// Offending header line.
        line: String,
    },
    /// A header uses an escape sequence outside the protocol's set.
    #[error("invalid escape sequence `\\{sequence}` in header")]
    InvalidEscape {
        /// Character following the backslash.
        sequence: char,
    },
    /// `content-length` is not a number or points past the received data.
    #[error("invalid content-length `{value}`")]
    InvalidContentLength {
        /// Raw header value.
        value: String,
    },
}

/// A decoded protocol frame. Header order is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Command line.
    pub command: Command,
    /// Decoded headers; the first occurrence of a repeated name wins.
    pub headers: IndexMap<String, String>,
    /// Body text, without the terminator.
    pub body: String,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: IndexMap::new(),
            body: String::new(),
        }
    }

    /// Append a header, keeping the first value when the name repeats.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_insert(value.into());
        self
    }

    /// Replace the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Handshake frame opening a session on `host`.
    pub fn connect(host: &str, heartbeat: HeartBeat) -> Self {
        Self::new(Command::Connect)
            .with_header("accept-version", ACCEPT_VERSION)
            .with_header("host", host)
            .with_header("heart-beat", heartbeat.header_value())
    }

    /// Subscribe to `destination` under subscription `id`.
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
    }

    /// Drop subscription `id`.
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).with_header("id", id)
    }

    /// Graceful end of session.
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Whether `raw` is a heart-beat (only end-of-line characters).
    pub fn is_heartbeat(raw: &str) -> bool {
        !raw.is_empty() && raw.chars().all(|c| c == '\n' || c == '\r')
    }

    /// Serialize the frame to its wire form.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(FRAME_TERMINATOR);
        out
    }

    /// Parse a raw text message into a frame.
    pub fn decode(raw: &str) -> Result<Self, FrameDecodeError> {
        let raw = raw.trim_start_matches(['\r', '\n']);
        if raw.trim().is_empty() {
            return Err(FrameDecodeError::Empty);
        }

        let first_line = raw.split('\n').next().unwrap_or_default();
        let token = first_line.trim_end_matches('\r').trim();
        if token.is_empty() || token.contains(':') || token.contains(FRAME_TERMINATOR) {
            return Err(FrameDecodeError::MissingCommand);
        }
        let command = Command::parse(token);

        let Some((head, rest)) = split_head(raw) else {
            return Err(FrameDecodeError::MissingBodySeparator {
                command: command.to_string(),
            });
        };

        let escaped = command.escapes_headers();
        let mut headers = IndexMap::new();
        for line in head.split('\n').skip(1) {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) =
                line.split_once(':')
                    .ok_or_else(|| FrameDecodeError::MalformedHeader {
                        line: line.to_string(),
                    })?;
            let (name, value) = if escaped {
                (unescape(name)?, unescape(value)?)
            } else {
                (name.to_string(), value.to_string())
            };
            headers.entry(name).or_insert(value);
        }

        let body = match headers.get("content-length") {
            Some(value) => value
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|len| rest.get(..len))
                .ok_or_else(|| FrameDecodeError::InvalidContentLength {
                    value: value.clone(),
                })?,
            None => rest
                .split_once(FRAME_TERMINATOR)
                .map_or(rest, |(body, _)| body),
        };

        Ok(Self {
            command,
            headers,
            body: body.to_string(),
        })
    }
}

/// Split at the first blank line, returning the header block and the remainder.
fn split_head(raw: &str) -> Option<(&str, &str)> {
    let lf = raw.find("\n\n").map(|at| (at, 2));
    let crlf = raw.find("\n\r\n").map(|at| (at, 3));
    let (at, width) = match (lf, crlf) {
        (Some(a), Some(b)) => a.min(b),
        (a, b) => a.or(b)?,
    };
    Some((&raw[..at], &raw[at + width..]))
}

fn push_escaped(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape(value: &str) -> Result<String, FrameDecodeError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => return Err(FrameDecodeError::InvalidEscape { sequence: other }),
            None => return Err(FrameDecodeError::InvalidEscape { sequence: ' ' }),
        }
    }
    Ok(out)
}

/// Heart-beat intervals as carried by the `heart-beat` header.
///
/// `outgoing` is how often this side can send, `incoming` how often it wants
/// to receive. A zero duration means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// Interval this side can send at.
    pub outgoing: Duration,
    /// Interval this side wants to receive at.
    pub incoming: Duration,
}

impl HeartBeat {
    /// Build from two intervals in milliseconds.
    pub fn from_millis(outgoing: u64, incoming: u64) -> Self {
        Self {
            outgoing: Duration::from_millis(outgoing),
            incoming: Duration::from_millis(incoming),
        }
    }

    /// `"<outgoing>,<incoming>"` in milliseconds.
    pub fn header_value(&self) -> String {
        format!(
            "{},{}",
            self.outgoing.as_millis(),
            self.incoming.as_millis()
        )
    }

    /// Parse a `heart-beat` header value.
    pub fn parse(value: &str) -> Option<Self> {
        let (outgoing, incoming) = value.split_once(',')?;
        Some(Self::from_millis(
            outgoing.trim().parse().ok()?,
            incoming.trim().parse().ok()?,
        ))
    }

    /// Agree on effective intervals between this client and the `server` side.
    pub fn negotiate(&self, server: &HeartBeat) -> NegotiatedHeartBeat {
        let pick = |ours: Duration, theirs: Duration| {
            (!ours.is_zero() && !theirs.is_zero()).then(|| ours.max(theirs))
        };
        NegotiatedHeartBeat {
            send_every: pick(self.outgoing, server.incoming),
            expect_every: pick(self.incoming, server.outgoing),
        }
    }
}

/// Effective heart-beat schedule once both sides have spoken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiatedHeartBeat {
    /// Interval at which the client must emit a heart-beat.
    pub send_every: Option<Duration>,
    /// Interval at which the server promised to emit something.
    pub expect_every: Option<Duration>,
}
