/// Time source used by the lockout window.
pub mod clock;
/// Fan-out of snapshots and milestone events to listeners.
pub mod dispatch;
pub mod reconciler;
/// Displayed score of a match.
pub mod score;

use std::sync::Arc;

use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info};

use crate::{
    dto::payload::{MatchId, UpdateEvent},
    error::EngineClosed,
};

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::dispatch::{MatchEvent, ScoreHub, ScoreSnapshot};
pub use self::reconciler::{
    Milestone, Outcome, ReconcilePolicy, ReconciliationEngine, Rejection, RejectionCounters,
};
pub use self::score::{MatchStatus, ScoreState};

/// Default depth of the engine's inbound queue.
pub const DEFAULT_ENGINE_CAPACITY: usize = 64;

enum EngineCommand {
    Submit {
        match_id: MatchId,
        event: UpdateEvent,
        reply: Option<oneshot::Sender<Outcome>>,
    },
    Activate {
        match_id: MatchId,
        initial: ScoreState,
        done: oneshot::Sender<()>,
    },
    Deactivate {
        done: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<RejectionCounters>,
    },
    Shutdown,
}

/// Cloneable entry point to the engine task.
///
/// Every producer (socket, poller, write path) talks to the engine through a
/// handle; the task is the only code that touches the anchor.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    hub: Arc<ScoreHub>,
}

impl EngineHandle {
    /// Start the engine task and return its handle together with the task.
    pub fn spawn(
        engine: ReconciliationEngine,
        hub: Arc<ScoreHub>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_engine(engine, hub.clone(), rx));
        (Self { tx, hub }, task)
    }

    /// Listener side of the engine.
    pub fn hub(&self) -> &Arc<ScoreHub> {
        &self.hub
    }

    /// Route events tagged with `match_id` to the engine, starting from `initial`.
    ///
    /// Returns once the anchor and the hub have been reset.
    pub async fn activate(&self, match_id: MatchId, initial: ScoreState) -> Result<(), EngineClosed> {
        let (done, rx) = oneshot::channel();
        self.send(EngineCommand::Activate {
            match_id,
            initial,
            done,
        })
        .await?;
        rx.await.map_err(|_| EngineClosed)
    }

    /// Stop accepting events; anything queued after this call is discarded.
    pub async fn deactivate(&self) -> Result<(), EngineClosed> {
        let (done, rx) = oneshot::channel();
        self.send(EngineCommand::Deactivate { done }).await?;
        rx.await.map_err(|_| EngineClosed)
    }

    /// Queue an update without waiting for the verdict.
    pub async fn submit(&self, match_id: MatchId, event: UpdateEvent) -> Result<(), EngineClosed> {
        self.send(EngineCommand::Submit {
            match_id,
            event,
            reply: None,
        })
        .await
    }

    /// Queue an update and wait until the engine has arbitrated it.
    pub async fn submit_and_wait(
        &self,
        match_id: MatchId,
        event: UpdateEvent,
    ) -> Result<Outcome, EngineClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Submit {
            match_id,
            event,
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| EngineClosed)
    }

    /// Rejection counts so far.
    pub async fn rejection_counters(&self) -> Result<RejectionCounters, EngineClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Stats { reply }).await?;
        rx.await.map_err(|_| EngineClosed)
    }

    /// Ask the task to exit once the queue ahead of this command is drained.
    pub async fn shutdown(&self) -> Result<(), EngineClosed> {
        self.send(EngineCommand::Shutdown).await
    }

    async fn send(&self, command: EngineCommand) -> Result<(), EngineClosed> {
        self.tx.send(command).await.map_err(|_| EngineClosed)
    }
}

async fn run_engine(
    mut engine: ReconciliationEngine,
    hub: Arc<ScoreHub>,
    mut rx: mpsc::Receiver<EngineCommand>,
) {
    let mut active: Option<MatchId> = None;

    while let Some(command) = rx.recv().await {
        match command {
            EngineCommand::Submit {
                match_id,
                event,
                reply,
            } => {
                let outcome = match active {
                    Some(current) if current == match_id => engine.arbitrate(event),
                    _ => {
                        debug!(%match_id, active = ?active, "discarding update for inactive match");
                        engine.record_rejection(Rejection::WrongMatch);
                        Outcome::Rejected(Rejection::WrongMatch)
                    }
                };

                if let Outcome::Applied { state, milestones } = &outcome {
                    hub.publish(match_id, *state, engine.set_history(), milestones);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            EngineCommand::Activate {
                match_id,
                initial,
                done,
            } => {
                info!(%match_id, "engine activated");
                engine.reset(initial);
                active = Some(match_id);
                hub.reset(Some(match_id), initial);
                let _ = done.send(());
            }
            EngineCommand::Deactivate { done } => {
                if let Some(match_id) = active.take() {
                    info!(%match_id, "engine deactivated");
                }
                let _ = done.send(());
            }
            EngineCommand::Stats { reply } => {
                let _ = reply.send(engine.counters().clone());
            }
            EngineCommand::Shutdown => break,
        }
    }

    debug!("engine task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::payload::UpdateSource;

    fn spawn_engine() -> (EngineHandle, JoinHandle<()>) {
        let engine = ReconciliationEngine::new(
            ScoreState::default(),
            ReconcilePolicy::default(),
            Arc::new(ManualClock::new()),
        );
        EngineHandle::spawn(engine, Arc::new(ScoreHub::new(16)), 8)
    }

    #[tokio::test]
    async fn applied_updates_reach_the_hub() {
        let (handle, _task) = spawn_engine();
        let mut events = handle.hub().subscribe();
        handle
            .activate(MatchId(7), ScoreState::default())
            .await
            .unwrap();

        let outcome = handle
            .submit_and_wait(MatchId(7), UpdateEvent::score(UpdateSource::Push, 2, 1, 1))
            .await
            .unwrap();

        assert!(outcome.is_applied());
        match events.recv().await.unwrap() {
            MatchEvent::ScoreChanged(snapshot) => {
                assert_eq!(snapshot.match_id, Some(MatchId(7)));
                assert_eq!(snapshot.state.team1_score, 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn in_flight_updates_for_old_match_are_discarded() {
        let (handle, _task) = spawn_engine();
        handle
            .activate(MatchId(1), ScoreState::default())
            .await
            .unwrap();
        handle.deactivate().await.unwrap();

        let outcome = handle
            .submit_and_wait(MatchId(1), UpdateEvent::score(UpdateSource::Poll, 5, 0, 1))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Rejected(Rejection::WrongMatch));

        handle
            .activate(MatchId(2), ScoreState::default())
            .await
            .unwrap();
        let outcome = handle
            .submit_and_wait(MatchId(1), UpdateEvent::score(UpdateSource::Push, 5, 0, 1))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Rejected(Rejection::WrongMatch));

        let counters = handle.rejection_counters().await.unwrap();
        assert_eq!(counters.get(Rejection::WrongMatch), 2);
        assert_eq!(handle.hub().snapshot().state.team1_score, 0);
    }

    #[tokio::test]
    async fn activate_returns_after_hub_reset() {
        let (handle, _task) = spawn_engine();
        let initial = ScoreState {
            team1_score: 3,
            current_set: 2,
            ..ScoreState::default()
        };

        handle.activate(MatchId(5), initial).await.unwrap();

        let snapshot = handle.hub().snapshot();
        assert_eq!(snapshot.match_id, Some(MatchId(5)));
        assert_eq!(snapshot.state, initial);
        assert_eq!(snapshot.version, 1);
    }

    #[tokio::test]
    async fn shutdown_closes_the_handle() {
        let (handle, task) = spawn_engine();
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(handle.deactivate().await, Err(EngineClosed));
    }
}
