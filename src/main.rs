//! courtside-live binary: follow one match and log every score event until it ends.

use std::{env, sync::Arc};

use anyhow::{Context, bail};
use courtside_live::{
    config::ClientConfig,
    dao::http::HttpScoreBackend,
    dto::payload::MatchId,
    services::{
        match_session::{MatchSession, SessionDeps},
        socket::WebSocketConnector,
    },
    state::{MatchEvent, ScoreState, SystemClock},
};
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let match_id = parse_match_id()?;
    let config = ClientConfig::load();

    let backend =
        HttpScoreBackend::new(config.backend_config()).context("building scoring API client")?;
    let deps = SessionDeps {
        connector: Arc::new(WebSocketConnector::new(config.ws_url.clone())),
        backend: Arc::new(backend),
        clock: Arc::new(SystemClock),
    };

    info!(%match_id, ws_url = %config.ws_url, api_url = %config.api_url, "joining match");
    let session = MatchSession::join(match_id, ScoreState::default(), deps, &config)
        .await
        .context("starting match session")?;

    let mut events = Box::pin(session.hub().events());
    if session.prime().await.is_none() {
        warn!(%match_id, "initial snapshot unavailable; waiting for live updates");
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            event = events.next() => {
                let Some(event) = event else { break };
                log_event(&event);
                if matches!(event, MatchEvent::MatchEnded { .. }) {
                    break;
                }
            }
        }
    }

    if let Ok(counters) = session.rejection_counters().await {
        info!(rejected = counters.total(), "session summary");
    }
    session.leave().await;
    Ok(())
}

fn parse_match_id() -> anyhow::Result<MatchId> {
    let Some(raw) = env::args().nth(1) else {
        bail!("usage: courtside-live <match-id>");
    };
    raw.parse::<u64>()
        .map(MatchId)
        .with_context(|| format!("invalid match id `{raw}`"))
}

fn log_event(event: &MatchEvent) {
    let json = serde_json::to_string(event).unwrap_or_default();
    match event {
        MatchEvent::ScoreChanged(snapshot) => info!(
            team1 = snapshot.state.team1_score,
            team2 = snapshot.state.team2_score,
            set = snapshot.state.current_set,
            version = snapshot.version,
            %json,
            "score changed"
        ),
        MatchEvent::SetCompleted { set_number, .. } => {
            info!(set = set_number, %json, "set completed")
        }
        MatchEvent::MatchEnded { winner_name, .. } => info!(
            winner = winner_name.as_deref().unwrap_or("unknown"),
            %json,
            "match ended"
        ),
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,courtside_live=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
