//! Access to the scoring REST API.

/// HTTP implementation of the scoring backend.
#[cfg(feature = "http-backend")]
pub mod http;
pub mod models;

use std::error::Error;

use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use crate::{
    dao::models::{AddPointRequest, AddPointResponse, UndoResponse},
    dto::payload::MatchId,
};

/// Result alias for scoring backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Failures of the scoring REST collaborator, independent of the HTTP client.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build scoring API client")]
    ClientBuilder {
        /// Client error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The request could not be sent.
    #[error("failed to send request to `{path}`")]
    RequestSend {
        /// Endpoint path relative to the API base.
        path: String,
        /// Client error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The API answered with a non-success status.
    #[error("unexpected response status {status} for `{path}`")]
    RequestStatus {
        /// Endpoint path relative to the API base.
        path: String,
        /// HTTP status code.
        status: u16,
    },
    /// The response body is not what the endpoint promises.
    #[error("failed to decode response for `{path}`")]
    DecodeResponse {
        /// Endpoint path relative to the API base.
        path: String,
        /// Parser error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The match does not exist on the server.
    #[error("match {match_id} not found")]
    NotFound {
        /// Requested match.
        match_id: MatchId,
    },
}

impl BackendError {
    /// Construct a send failure from any client error.
    pub fn send(path: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        BackendError::RequestSend {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Construct a decode failure from any parser error.
    pub fn decode(path: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        BackendError::DecodeResponse {
            path: path.into(),
            source: Box::new(source),
        }
    }
}

/// The scoring REST API as seen by the client.
///
/// Snapshots are returned as raw JSON so the normalizer can cope with the
/// server's shape drift; writes use typed bodies.
pub trait ScoreBackend: Send + Sync {
    /// `GET match/{id}`: current score snapshot.
    fn fetch_score(&self, match_id: MatchId) -> BoxFuture<'static, BackendResult<Value>>;
    /// `POST match-scoring/add-point`: score one point.
    fn add_point(&self, request: AddPointRequest) -> BoxFuture<'static, BackendResult<AddPointResponse>>;
    /// `POST match-scoring/undo`: revert the last scoring event.
    fn undo(&self, match_id: MatchId) -> BoxFuture<'static, BackendResult<UndoResponse>>;
}
