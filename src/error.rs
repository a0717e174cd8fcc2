//! Error types shared across the crate.

use std::{error::Error as StdError, time::Duration};

use thiserror::Error;

use crate::{dao::BackendError, state::reconciler::Rejection};

/// Boxed error used where the concrete source depends on an optional backend.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Failures of the push channel. All of them are recovered by reconnecting.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("failed to connect to `{url}`")]
    Connect {
        /// Endpoint that was dialed.
        url: String,
        /// Underlying client error.
        #[source]
        source: BoxError,
    },
    /// Sending or receiving on an open socket failed.
    #[error("socket failure")]
    Socket(#[source] BoxError),
    /// The remote end closed the socket.
    #[error("socket closed by remote host")]
    Closed,
    /// The broker answered with an ERROR frame.
    #[error("broker error: {message}")]
    Broker {
        /// `message` header of the ERROR frame, or its body.
        message: String,
    },
    /// CONNECTED did not arrive in time.
    #[error("no CONNECTED frame within {0:?}")]
    HandshakeTimeout(Duration),
    /// The server went quiet for longer than its heart-beat promise allows.
    #[error("no traffic from server for {0:?}")]
    HeartbeatTimeout(Duration),
}

impl TransportError {
    /// Wrap any socket-level failure.
    pub fn socket(source: impl StdError + Send + Sync + 'static) -> Self {
        TransportError::Socket(Box::new(source))
    }
}

/// Reasons a raw JSON payload could not become an update.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The body is not JSON.
    #[error("payload is not valid JSON")]
    Json(#[from] serde_json::Error),
    /// The body is JSON but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,
    /// Unknown event type and nothing score-shaped to fall back on.
    #[error("unrecognized event `{event_type}` without score fields")]
    UnrecognizedEvent {
        /// Upper-cased event type, empty when none was given.
        event_type: String,
    },
    /// A known field holds a value that is not a non-negative integer.
    #[error("field `{field}` has invalid value {value}")]
    InvalidField {
        /// JSON key of the offending field.
        field: &'static str,
        /// Value found under that key.
        value: serde_json::Value,
    },
}

/// The engine task has stopped and no longer accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("reconciliation engine is not running")]
pub struct EngineClosed;

/// Result of a user-initiated scoring action that did not go through.
#[derive(Debug, Error)]
pub enum WriteError {
    /// Another write for this match is still in flight.
    #[error("another scoring action is in progress")]
    Busy,
    /// The match has already ended.
    #[error("match is already completed")]
    MatchCompleted,
    /// The backend refused or failed the write; the caller may retry.
    #[error("scoring backend failed")]
    Backend(#[from] BackendError),
    /// The engine discarded the confirmed result.
    #[error("update rejected: {0}")]
    Rejected(Rejection),
    /// The engine is gone (match left).
    #[error(transparent)]
    EngineClosed(#[from] EngineClosed),
}

/// Configuration values that cannot be honored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A duration that drives a timer must be positive.
    #[error("`{field}` must be greater than zero")]
    ZeroDuration {
        /// Setting name.
        field: &'static str,
    },
    /// A channel capacity must be positive.
    #[error("`{field}` must be at least 1")]
    ZeroCapacity {
        /// Setting name.
        field: &'static str,
    },
    /// A URL setting is empty.
    #[error("`{field}` must not be empty")]
    EmptyUrl {
        /// Setting name.
        field: &'static str,
    },
}
