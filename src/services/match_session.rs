//! Wiring of one joined match: engine, push channel, poll fallback, writes.

use std::sync::Arc;

use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

use crate::{
    config::ClientConfig,
    dao::ScoreBackend,
    dto::payload::MatchId,
    error::EngineClosed,
    services::{
        polling_service::{PollingHandle, PollingSource},
        scoring_service::ScoringService,
        socket::SocketConnector,
        transport_service::{ConnectionState, Transport},
    },
    state::{
        Clock, EngineHandle, Outcome, ReconciliationEngine, RejectionCounters, ScoreHub,
        ScoreState,
    },
};

/// External collaborators injected into a session.
#[derive(Clone)]
pub struct SessionDeps {
    /// Opens push-channel sockets.
    pub connector: Arc<dyn SocketConnector>,
    /// Scoring REST API.
    pub backend: Arc<dyn ScoreBackend>,
    /// Time source of the lockout window.
    pub clock: Arc<dyn Clock>,
}

/// A joined match. Dropping it without [`MatchSession::leave`] leaves the
/// background tasks to wind down on their own.
pub struct MatchSession {
    match_id: MatchId,
    engine: EngineHandle,
    engine_task: JoinHandle<()>,
    transport: Transport,
    polling: PollingSource,
    poller: PollingHandle,
    scoring: ScoringService,
}

impl MatchSession {
    /// Start every component for `match_id`, seeded with `initial`.
    pub async fn join(
        match_id: MatchId,
        initial: ScoreState,
        deps: SessionDeps,
        config: &ClientConfig,
    ) -> Result<Self, EngineClosed> {
        let hub = Arc::new(ScoreHub::new(config.event_capacity));
        let engine = ReconciliationEngine::new(initial, config.policy, deps.clock);
        let (engine, engine_task) = EngineHandle::spawn(engine, hub, config.engine_capacity);
        engine.activate(match_id, initial).await?;

        let transport = Transport::new(deps.connector, engine.clone(), config.transport.clone());
        let polling = PollingSource::new(
            deps.backend.clone(),
            engine.clone(),
            transport.watch_state(),
            config.poll_interval,
        );
        let poller = polling.spawn(match_id);
        transport.connect(match_id).await;

        let scoring = ScoringService::new(deps.backend, engine.clone(), match_id);
        info!(%match_id, "joined match");

        Ok(Self {
            match_id,
            engine,
            engine_task,
            transport,
            polling,
            poller,
            scoring,
        })
    }

    /// Fetch a snapshot right away instead of waiting for the first poll tick.
    ///
    /// Returns once the engine has arbitrated it; `None` when the fetch failed.
    pub async fn prime(&self) -> Option<Vec<Outcome>> {
        self.polling.poll_now(self.match_id).await
    }

    /// Listener side: snapshots and milestone events.
    pub fn hub(&self) -> &Arc<ScoreHub> {
        self.engine.hub()
    }

    /// Add-point and undo for this match.
    pub fn scoring(&self) -> &ScoringService {
        &self.scoring
    }

    /// Current state of the push channel.
    pub fn connection_state(&self) -> ConnectionState {
        self.transport.connection_state()
    }

    /// Observe push-channel state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.transport.watch_state()
    }

    /// Rejections recorded by the engine so far.
    pub async fn rejection_counters(&self) -> Result<RejectionCounters, EngineClosed> {
        self.engine.rejection_counters().await
    }

    /// Discard in-flight updates, close the push channel and stop polling.
    pub async fn leave(self) {
        let match_id = self.match_id;

        if let Err(err) = self.engine.deactivate().await {
            warn!(%match_id, error = %err, "engine already stopped");
        }
        self.transport.disconnect().await;
        self.poller.stop().await;
        if self.engine.shutdown().await.is_ok()
            && let Err(err) = self.engine_task.await
        {
            warn!(%match_id, error = %err, "engine task ended abnormally");
        }

        info!(%match_id, "left match");
    }
}
