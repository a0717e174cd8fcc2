//! Client configuration: JSON file, environment overrides, built-in defaults.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

#[cfg(feature = "http-backend")]
use crate::dao::http::HttpBackendConfig;
use crate::{
    dto::frame::HeartBeat,
    error::ConfigError,
    services::{polling_service::DEFAULT_POLL_INTERVAL, transport_service::TransportConfig},
    state::{DEFAULT_ENGINE_CAPACITY, ReconcilePolicy},
};

/// Default location on disk where the client looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/client.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "COURTSIDE_CONFIG_PATH";
const WS_URL_ENV: &str = "COURTSIDE_WS_URL";
const API_URL_ENV: &str = "COURTSIDE_API_URL";
const AUTH_TOKEN_ENV: &str = "COURTSIDE_AUTH_TOKEN";

const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws/websocket";
const DEFAULT_API_URL: &str = "http://localhost:8080/api";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_EVENT_CAPACITY: usize = 32;

/// Immutable runtime configuration of a live-score client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Push endpoint (`ws://` or `wss://`).
    pub ws_url: String,
    /// REST base URL including the `/api` prefix.
    pub api_url: String,
    /// Bearer token for the REST API.
    pub auth_token: Option<String>,
    /// Push-channel settings.
    pub transport: TransportConfig,
    /// Period of the REST fallback poller.
    pub poll_interval: Duration,
    /// Per-request timeout of the REST client.
    pub request_timeout: Duration,
    /// Depth of the engine's inbound queue.
    pub engine_capacity: usize,
    /// Per-listener buffer of the event broadcast.
    pub event_capacity: usize,
    /// Arbitration tunables.
    pub policy: ReconcilePolicy,
}

impl ClientConfig {
    /// Load the configuration from disk and the environment, falling back to
    /// built-in defaults when the file is missing or unusable.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let config = match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded client config");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "invalid client config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };

        config.with_overrides(|name| env::var(name).ok())
    }

    /// Parse and validate a JSON document.
    pub fn from_json(contents: &str) -> Result<Self, LoadError> {
        let raw = serde_json::from_str::<RawConfig>(contents)?;
        Ok(Self::try_from(raw)?)
    }

    /// Apply `COURTSIDE_*` overrides looked up through `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(url) = lookup(WS_URL_ENV) {
            if self.transport.host == host_of(&self.ws_url) {
                self.transport.host = host_of(&url);
            }
            self.ws_url = url;
        }
        if let Some(url) = lookup(API_URL_ENV) {
            self.api_url = url;
        }
        if let Some(token) = lookup(AUTH_TOKEN_ENV) {
            self.auth_token = Some(token);
        }
        self
    }

    /// Settings for the REST collaborator.
    #[cfg(feature = "http-backend")]
    pub fn backend_config(&self) -> HttpBackendConfig {
        HttpBackendConfig {
            base_url: self.api_url.clone(),
            auth_token: self.auth_token.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.into(),
            api_url: DEFAULT_API_URL.into(),
            auth_token: None,
            transport: TransportConfig {
                host: host_of(DEFAULT_WS_URL),
                ..TransportConfig::default()
            },
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            engine_capacity: DEFAULT_ENGINE_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            policy: ReconcilePolicy::default(),
        }
    }
}

/// Failure to turn a configuration document into a [`ClientConfig`].
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The document is not valid JSON for the expected shape.
    #[error("failed to parse config")]
    Parse(#[from] serde_json::Error),
    /// A value is out of range.
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    ws_url: Option<String>,
    api_url: Option<String>,
    auth_token: Option<String>,
    topic_prefix: Option<String>,
    stomp_host: Option<String>,
    reconnect_delay_ms: Option<u64>,
    handshake_timeout_ms: Option<u64>,
    heartbeat_outgoing_ms: Option<u64>,
    heartbeat_incoming_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    engine_capacity: Option<usize>,
    event_capacity: Option<usize>,
    policy: Option<RawPolicy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
/// Arbitration tunables inside the configuration file.
struct RawPolicy {
    lockout_ms: Option<u64>,
    regression_tolerance: Option<u32>,
    suppress_zero_reset: Option<bool>,
    reject_stale_sets: Option<bool>,
}

impl TryFrom<RawConfig> for ClientConfig {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let defaults = Self::default();

        let ws_url = url(raw.ws_url, "wsUrl", defaults.ws_url)?;
        let api_url = url(raw.api_url, "apiUrl", defaults.api_url)?;
        let host = raw
            .stomp_host
            .filter(|host| !host.trim().is_empty())
            .unwrap_or_else(|| host_of(&ws_url));

        let heartbeat = HeartBeat {
            outgoing: raw
                .heartbeat_outgoing_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.transport.heartbeat.outgoing),
            incoming: raw
                .heartbeat_incoming_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.transport.heartbeat.incoming),
        };
        let transport = TransportConfig {
            topic_prefix: raw
                .topic_prefix
                .unwrap_or(defaults.transport.topic_prefix),
            host,
            heartbeat,
            reconnect_delay: positive(
                raw.reconnect_delay_ms,
                "reconnectDelayMs",
                defaults.transport.reconnect_delay,
            )?,
            handshake_timeout: positive(
                raw.handshake_timeout_ms,
                "handshakeTimeoutMs",
                defaults.transport.handshake_timeout,
            )?,
        };

        let raw_policy = raw.policy.unwrap_or_default();
        let policy = ReconcilePolicy {
            lockout: raw_policy
                .lockout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.policy.lockout),
            regression_tolerance: raw_policy
                .regression_tolerance
                .unwrap_or(defaults.policy.regression_tolerance),
            suppress_zero_reset: raw_policy
                .suppress_zero_reset
                .unwrap_or(defaults.policy.suppress_zero_reset),
            reject_stale_sets: raw_policy
                .reject_stale_sets
                .unwrap_or(defaults.policy.reject_stale_sets),
        };

        Ok(Self {
            ws_url,
            api_url,
            auth_token: raw.auth_token.filter(|token| !token.is_empty()),
            transport,
            poll_interval: positive(raw.poll_interval_ms, "pollIntervalMs", defaults.poll_interval)?,
            request_timeout: positive(
                raw.request_timeout_ms,
                "requestTimeoutMs",
                defaults.request_timeout,
            )?,
            engine_capacity: capacity(
                raw.engine_capacity,
                "engineCapacity",
                defaults.engine_capacity,
            )?,
            event_capacity: capacity(raw.event_capacity, "eventCapacity", defaults.event_capacity)?,
            policy,
        })
    }
}

fn url(value: Option<String>, field: &'static str, default: String) -> Result<String, ConfigError> {
    match value {
        Some(url) if url.trim().is_empty() => Err(ConfigError::EmptyUrl { field }),
        Some(url) => Ok(url.trim().to_string()),
        None => Ok(default),
    }
}

fn positive(
    millis: Option<u64>,
    field: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match millis {
        Some(0) => Err(ConfigError::ZeroDuration { field }),
        Some(millis) => Ok(Duration::from_millis(millis)),
        None => Ok(default),
    }
}

fn capacity(value: Option<usize>, field: &'static str, default: usize) -> Result<usize, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::ZeroCapacity { field }),
        Some(value) => Ok(value),
        None => Ok(default),
    }
}

/// Host part of a URL, without scheme, credentials, port or path.
fn host_of(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = if host.starts_with('[') {
        host.split_inclusive(']').next().unwrap_or(host)
    } else {
        host.split(':').next().unwrap_or(host)
    };
    if host.is_empty() {
        "/".to_string()
    } else {
        host.to_string()
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
