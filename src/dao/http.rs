use std::{sync::Arc, time::Duration};

use futures::{FutureExt, future::BoxFuture};
use reqwest::{Client, Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::debug;

use crate::{
    dao::{
        BackendError, BackendResult, ScoreBackend,
        models::{AddPointRequest, AddPointResponse, UndoRequest, UndoResponse},
    },
    dto::payload::MatchId,
};

const ADD_POINT_PATH: &str = "match-scoring/add-point";
const UNDO_PATH: &str = "match-scoring/undo";

/// Connection settings for the scoring REST API.
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Base URL including the `/api` prefix.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub auth_token: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

/// [`ScoreBackend`] talking to the scoring REST API over `reqwest`.
#[derive(Clone)]
pub struct HttpScoreBackend {
    client: Client,
    base_url: Arc<str>,
    auth_token: Option<Arc<str>>,
}

impl HttpScoreBackend {
    /// Build the client; fails only when the TLS stack cannot be set up.
    pub fn new(config: HttpBackendConfig) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| BackendError::ClientBuilder {
                source: Box::new(source),
            })?;

        Ok(Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            auth_token: config
                .auth_token
                .filter(|token| !token.is_empty())
                .map(Arc::from),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match self.auth_token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T>(&self, path: String) -> BackendResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, &path)
            .send()
            .await
            .map_err(|source| BackendError::send(&path, source))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<T>()
                .await
                .map(Some)
                .map_err(|source| BackendError::decode(&path, source)),
            other => Err(BackendError::RequestStatus {
                path,
                status: other.as_u16(),
            }),
        }
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> BackendResult<T>
    where
        B: ?Sized + Serialize,
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::POST, path)
            .json(body)
            .send()
            .await
            .map_err(|source| BackendError::send(path, source))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::RequestStatus {
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| BackendError::decode(path, source))
    }
}

impl ScoreBackend for HttpScoreBackend {
    fn fetch_score(&self, match_id: MatchId) -> BoxFuture<'static, BackendResult<Value>> {
        let backend = self.clone();
        async move {
            let path = format!("match/{match_id}");
            debug!(%match_id, "fetching score snapshot");
            backend
                .get_json::<Value>(path)
                .await?
                .ok_or(BackendError::NotFound { match_id })
        }
        .boxed()
    }

    fn add_point(
        &self,
        request: AddPointRequest,
    ) -> BoxFuture<'static, BackendResult<AddPointResponse>> {
        let backend = self.clone();
        async move {
            debug!(
                match_id = %request.match_id,
                team_id = request.team_id,
                method = %request.method,
                "adding point"
            );
            backend.post_json(ADD_POINT_PATH, &request).await
        }
        .boxed()
    }

    fn undo(&self, match_id: MatchId) -> BoxFuture<'static, BackendResult<UndoResponse>> {
        let backend = self.clone();
        async move {
            debug!(%match_id, "undoing last scoring event");
            backend.post_json(UNDO_PATH, &UndoRequest { match_id }).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_and_empty_token_are_normalized() {
        let backend = HttpScoreBackend::new(HttpBackendConfig {
            base_url: "https://scores.example.org/api/".into(),
            auth_token: Some(String::new()),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();

        assert_eq!(&*backend.base_url, "https://scores.example.org/api");
        assert!(backend.auth_token.is_none());
    }
}
