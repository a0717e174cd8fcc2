//! REST fallback used while the push channel is down.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

use crate::{
    dao::{BackendError, ScoreBackend},
    dto::payload::{MatchId, UpdateSource},
    error::{EngineClosed, NormalizeError},
    services::{normalizer::normalize_snapshot, transport_service::ConnectionState},
    state::{EngineHandle, Outcome},
};

/// Default period between two snapshot fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Why a single poll produced nothing.
#[derive(Debug, Error)]
enum PollError {
    #[error("snapshot fetch failed")]
    Backend(#[from] BackendError),
    #[error("snapshot could not be normalized")]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Engine(#[from] EngineClosed),
}

/// Periodic snapshot fetcher feeding the engine with `Poll` updates.
#[derive(Clone)]
pub struct PollingSource {
    backend: Arc<dyn ScoreBackend>,
    engine: EngineHandle,
    connection: watch::Receiver<ConnectionState>,
    interval: Duration,
}

/// Running poll loop.
pub struct PollingHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PollingHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.task.await {
            warn!(error = %err, "polling task ended abnormally");
        }
    }
}

impl PollingSource {
    /// Poller for `backend` that stays idle while `connection` reports `Connected`.
    pub fn new(
        backend: Arc<dyn ScoreBackend>,
        engine: EngineHandle,
        connection: watch::Receiver<ConnectionState>,
        interval: Duration,
    ) -> Self {
        Self {
            backend,
            engine,
            connection,
            interval,
        }
    }

    /// Start polling `match_id` in the background.
    pub fn spawn(&self, match_id: MatchId) -> PollingHandle {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(self.clone().run(match_id, shutdown_rx));
        PollingHandle { shutdown, task }
    }

    /// Fetch one snapshot whatever the connection state and wait for the
    /// engine's verdict on each event it produced.
    ///
    /// Returns `None` when the snapshot could not be fetched or normalized.
    pub async fn poll_now(&self, match_id: MatchId) -> Option<Vec<Outcome>> {
        match self.poll_once(match_id).await {
            Ok(outcomes) => Some(outcomes),
            Err(err) => {
                warn!(%match_id, error = %err, "snapshot poll failed");
                None
            }
        }
    }

    async fn run(self, match_id: MatchId, mut shutdown: oneshot::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(%match_id, every = ?self.interval, "polling fallback started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            if *self.connection.borrow() == ConnectionState::Connected {
                continue;
            }

            match self.poll_once(match_id).await {
                Ok(_) => {}
                Err(PollError::Engine(_)) => {
                    debug!(%match_id, "engine closed; stopping poll loop");
                    break;
                }
                Err(err) => warn!(%match_id, error = %err, "snapshot poll failed"),
            }
        }

        info!(%match_id, "polling fallback stopped");
    }

    async fn poll_once(&self, match_id: MatchId) -> Result<Vec<Outcome>, PollError> {
        let snapshot = self.backend.fetch_score(match_id).await?;
        let mut outcomes = Vec::new();
        for event in normalize_snapshot(&snapshot, UpdateSource::Poll)? {
            let outcome = self.engine.submit_and_wait(match_id, event).await?;
            debug!(%match_id, ?outcome, "snapshot arbitrated");
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        dao::testing::ScriptedBackend,
        state::{ManualClock, ReconcilePolicy, ReconciliationEngine, ScoreHub, ScoreState},
    };

    async fn setup(
        backend: Arc<ScriptedBackend>,
        connection: watch::Receiver<ConnectionState>,
    ) -> (PollingSource, EngineHandle) {
        let engine = ReconciliationEngine::new(
            ScoreState::default(),
            ReconcilePolicy::default(),
            Arc::new(ManualClock::new()),
        );
        let (handle, _task) = EngineHandle::spawn(engine, Arc::new(ScoreHub::new(16)), 16);
        handle.activate(MatchId(9), ScoreState::default()).await.unwrap();
        let source = PollingSource::new(backend, handle.clone(), connection, DEFAULT_POLL_INTERVAL);
        (source, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn polls_only_while_disconnected() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_snapshot(Ok(json!({ "team1Score": 2, "team2Score": 1 })));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (source, engine) = setup(backend.clone(), state_rx).await;

        let poller = source.spawn(MatchId(9));
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3).await;
        assert_eq!(backend.fetch_count(), 0);

        state_tx.send_replace(ConnectionState::Error);
        let mut snapshots = engine.hub().watch();
        snapshots.wait_for(|s| s.state.team1_score == 2).await.unwrap();
        assert_eq!(backend.fetch_count(), 1);

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_loop() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_snapshot(Err(BackendError::RequestStatus {
            path: "match/9".into(),
            status: 500,
        }));
        backend.push_snapshot(Ok(json!("garbage")));
        backend.push_snapshot(Ok(json!({
            "scoreState": { "scoreA": 4, "scoreB": 4 },
            "currentSet": 1
        })));
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (source, engine) = setup(backend.clone(), state_rx).await;

        let poller = source.spawn(MatchId(9));
        let mut snapshots = engine.hub().watch();
        snapshots.wait_for(|s| s.state.team1_score == 4).await.unwrap();
        assert_eq!(backend.fetch_count(), 3);

        poller.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_prompt() {
        let backend = Arc::new(ScriptedBackend::default());
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (source, _engine) = setup(backend.clone(), state_rx).await;

        let started = Instant::now();
        source.spawn(MatchId(9)).stop().await;
        assert!(started.elapsed() < DEFAULT_POLL_INTERVAL);
        assert_eq!(backend.fetch_count(), 0);
    }

    #[tokio::test]
    async fn terminal_snapshot_ends_the_match() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_snapshot(Ok(json!({
            "team1Score": 21,
            "team2Score": 18,
            "team1SetsWon": 2,
            "status": "COMPLETED"
        })));
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (source, engine) = setup(backend, state_rx).await;

        let outcomes = source.poll_now(MatchId(9)).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(Outcome::is_applied));
        assert!(engine.hub().snapshot().state.is_completed());
    }

    #[tokio::test]
    async fn poll_now_returns_after_the_hub_updated() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_snapshot(Ok(json!({
            "scoreState": { "scoreA": 6, "scoreB": 2 },
            "currentSet": 2,
            "setHistory": [{ "set": 1, "team1": 21, "team2": 12 }]
        })));
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);
        let (source, engine) = setup(backend.clone(), state_rx).await;

        let outcomes = source.poll_now(MatchId(9)).await.unwrap();

        assert!(outcomes[0].is_applied());
        let snapshot = engine.hub().snapshot();
        assert_eq!((snapshot.state.team1_score, snapshot.state.team2_score), (6, 2));
        assert_eq!(snapshot.set_history.len(), 1);
        assert_eq!(snapshot.set_history[0].team1_score, 21);

        assert_eq!(source.poll_now(MatchId(9)).await, None);
    }
}
