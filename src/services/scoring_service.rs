//! User-initiated writes (add point, undo) with a single in-flight request.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    dao::{
        ScoreBackend,
        models::{AddPointRequest, ScoreResponse},
    },
    dto::payload::{MatchId, ScoreFields, UpdateEvent, UpdateKind, UpdateSource},
    error::WriteError,
    state::{EngineHandle, Outcome, ScoreState},
};

/// Optimistic write path of one match.
///
/// A write is sent to the REST API; the confirmed result enters the engine as
/// a trusted `Local` update, which opens the lockout window.
pub struct ScoringService {
    backend: Arc<dyn ScoreBackend>,
    engine: EngineHandle,
    match_id: MatchId,
    write_gate: Mutex<()>,
}

impl ScoringService {
    /// Write path for `match_id`.
    pub fn new(backend: Arc<dyn ScoreBackend>, engine: EngineHandle, match_id: MatchId) -> Self {
        Self {
            backend,
            engine,
            match_id,
            write_gate: Mutex::new(()),
        }
    }

    /// Whether a write is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.write_gate.try_lock().is_err()
    }

    /// Score a point for `team_id`. `player_id` falls back to the team and
    /// `method` to `ACE`.
    pub async fn add_point(
        &self,
        team_id: u64,
        player_id: Option<u64>,
        method: Option<&str>,
    ) -> Result<ScoreState, WriteError> {
        let _guard = self.write_gate.try_lock().map_err(|_| WriteError::Busy)?;
        self.ensure_live()?;

        let before = self.engine.hub().snapshot().state;
        let request = AddPointRequest::new(self.match_id, team_id, player_id, method);
        let response = self.backend.add_point(request).await.inspect_err(|err| {
            warn!(match_id = %self.match_id, team_id, error = %err, "add point failed");
        })?;

        if response.set_completed && response.score.current_set_number > before.current_set {
            info!(
                match_id = %self.match_id,
                set = before.current_set,
                "set completed by local point"
            );
            self.apply_local(
                UpdateKind::SetCompleted,
                closed_set_fields(&before, &response.score),
            )
            .await?;
        }
        self.apply_local(UpdateKind::ScoreUpdate, response.score.to_fields())
            .await?;
        if response.match_completed {
            info!(
                match_id = %self.match_id,
                winner = response.winner_name.as_deref().unwrap_or("unknown"),
                "match completed by local point"
            );
            self.apply_local(UpdateKind::MatchEnded, response.match_end_fields())
                .await?;
        }

        Ok(self.engine.hub().snapshot().state)
    }

    /// Revert the last scoring event.
    pub async fn undo(&self) -> Result<ScoreState, WriteError> {
        let _guard = self.write_gate.try_lock().map_err(|_| WriteError::Busy)?;
        self.ensure_live()?;

        let response = self.backend.undo(self.match_id).await.inspect_err(|err| {
            warn!(match_id = %self.match_id, error = %err, "undo failed");
        })?;

        self.apply_local(UpdateKind::ScoreUpdate, response.to_fields())
            .await?;
        Ok(self.engine.hub().snapshot().state)
    }

    fn ensure_live(&self) -> Result<(), WriteError> {
        if self.engine.hub().snapshot().state.is_completed() {
            return Err(WriteError::MatchCompleted);
        }
        Ok(())
    }

    async fn apply_local(&self, kind: UpdateKind, fields: ScoreFields) -> Result<(), WriteError> {
        let event = UpdateEvent::new(kind, fields, UpdateSource::Local);
        match self.engine.submit_and_wait(self.match_id, event).await? {
            Outcome::Rejected(reason) => Err(WriteError::Rejected(reason)),
            Outcome::Applied { .. } | Outcome::Unchanged => Ok(()),
        }
    }
}

/// Completion of the set a winning point closed.
///
/// `after` already shows the next set, so the final score is `before` plus
/// one point for the team whose sets-won count went up.
fn closed_set_fields(before: &ScoreState, after: &ScoreResponse) -> ScoreFields {
    let (mut final1, mut final2) = (before.team1_score, before.team2_score);
    if after.team1_sets_won > before.team1_sets_won {
        final1 += 1;
    } else if after.team2_sets_won > before.team2_sets_won {
        final2 += 1;
    }

    ScoreFields {
        team1_score: Some(final1),
        team2_score: Some(final2),
        current_set: before.current_set,
        team1_sets_won: Some(after.team1_sets_won),
        team2_sets_won: Some(after.team2_sets_won),
        set_number: Some(before.current_set),
        next_set_score1: Some(after.team1_score),
        next_set_score2: Some(after.team2_score),
        ..ScoreFields::default()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::*;
    use crate::{
        dao::{
            BackendError,
            models::{AddPointResponse, ScoreResponse},
            testing::ScriptedBackend,
        },
        dto::payload::SetScore,
        state::{
            ManualClock, MatchEvent, ReconcilePolicy, ReconciliationEngine, Rejection, ScoreHub,
        },
    };

    async fn service(backend: Arc<ScriptedBackend>) -> (ScoringService, EngineHandle, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let engine = ReconciliationEngine::new(
            ScoreState::default(),
            ReconcilePolicy::default(),
            clock.clone(),
        );
        let (handle, _task) = EngineHandle::spawn(engine, Arc::new(ScoreHub::new(16)), 16);
        handle.activate(MatchId(1), ScoreState::default()).await.unwrap();
        (
            ScoringService::new(backend, handle.clone(), MatchId(1)),
            handle,
            clock,
        )
    }

    fn point(team1: u32, team2: u32) -> AddPointResponse {
        AddPointResponse {
            score: ScoreResponse {
                team1_score: team1,
                team2_score: team2,
                ..ScoreResponse::default()
            },
            ..AddPointResponse::default()
        }
    }

    #[tokio::test]
    async fn confirmed_point_locks_out_stale_push() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_point(Ok(point(5, 3)));
        let (scoring, engine, clock) = service(backend.clone()).await;

        let state = scoring.add_point(11, None, Some("smash")).await.unwrap();
        assert_eq!((state.team1_score, state.team2_score), (5, 3));
        let request = backend.requests.lock().unwrap()[0].clone();
        assert_eq!(request.method, "SMASH");
        assert_eq!(request.player_id, 11);

        clock.advance(Duration::from_secs(2));
        let outcome = engine
            .submit_and_wait(MatchId(1), UpdateEvent::score(UpdateSource::Push, 0, 0, 1))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Rejected(Rejection::LockedOut));
        assert_eq!(engine.hub().snapshot().state.team1_score, 5);
    }

    #[tokio::test]
    async fn undo_may_lower_the_score() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_point(Ok(point(4, 2)));
        backend.push_undo(Ok(ScoreResponse {
            team1_score: 3,
            team2_score: 2,
            ..ScoreResponse::default()
        }));
        let (scoring, _engine, _clock) = service(backend).await;

        scoring.add_point(1, Some(7), None).await.unwrap();
        let state = scoring.undo().await.unwrap();
        assert_eq!((state.team1_score, state.team2_score), (3, 2));
    }

    #[tokio::test]
    async fn backend_failure_leaves_state_untouched() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_point(Err(BackendError::RequestStatus {
            path: "match-scoring/add-point".into(),
            status: 409,
        }));
        let (scoring, engine, _clock) = service(backend).await;

        let err = scoring.add_point(1, None, None).await.unwrap_err();
        assert!(matches!(
            err,
            WriteError::Backend(BackendError::RequestStatus { status: 409, .. })
        ));
        let snapshot = engine.hub().snapshot();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.state, ScoreState::default());
    }

    #[tokio::test]
    async fn concurrent_write_is_rejected_as_busy() {
        let gate = Arc::new(Notify::new());
        let backend = Arc::new(ScriptedBackend::gated(gate.clone()));
        backend.push_point(Ok(point(1, 0)));
        let (scoring, _engine, _clock) = service(backend).await;
        let scoring = Arc::new(scoring);

        let first = tokio::spawn({
            let scoring = scoring.clone();
            async move { scoring.add_point(1, None, None).await }
        });
        while !scoring.is_busy() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(scoring.undo().await, Err(WriteError::Busy)));
        gate.notify_one();
        let state = first.await.unwrap().unwrap();
        assert_eq!(state.team1_score, 1);
        assert!(!scoring.is_busy());
    }

    #[tokio::test]
    async fn winning_point_completes_the_match() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_point(Ok(AddPointResponse {
            match_completed: true,
            winner_team_id: Some(2),
            winner_name: Some("Team B".into()),
            ..point(15, 21)
        }));
        let (scoring, engine, _clock) = service(backend).await;
        let mut events = engine.hub().subscribe();

        let state = scoring.add_point(2, None, None).await.unwrap();
        assert!(state.is_completed());

        let mut saw_end = false;
        while let Ok(event) = events.try_recv() {
            if let MatchEvent::MatchEnded { winner_id, .. } = event {
                assert_eq!(winner_id, Some(2));
                saw_end = true;
            }
        }
        assert!(saw_end);
        assert!(matches!(
            scoring.add_point(1, None, None).await,
            Err(WriteError::MatchCompleted)
        ));
    }

    #[tokio::test]
    async fn set_winning_point_reports_the_final_set_score() {
        let backend = Arc::new(ScriptedBackend::default());
        backend.push_point(Ok(AddPointResponse {
            score: ScoreResponse {
                team1_score: 0,
                team2_score: 0,
                current_set_number: 2,
                team1_sets_won: 1,
                team2_sets_won: 0,
            },
            set_completed: true,
            ..AddPointResponse::default()
        }));
        let (scoring, engine, _clock) = service(backend).await;
        engine
            .submit_and_wait(MatchId(1), UpdateEvent::score(UpdateSource::Push, 20, 18, 1))
            .await
            .unwrap();
        let mut events = engine.hub().subscribe();

        let state = scoring.add_point(1, None, None).await.unwrap();

        assert_eq!(state.current_set, 2);
        assert_eq!((state.team1_score, state.team2_score), (0, 0));
        assert_eq!((state.team1_sets_won, state.team2_sets_won), (1, 0));
        assert_eq!(
            events.recv().await.unwrap(),
            MatchEvent::SetCompleted {
                match_id: MatchId(1),
                set_number: 1,
                team1_score: 21,
                team2_score: 18,
                team1_sets_won: 1,
                team2_sets_won: 0,
            }
        );
        let history = engine.hub().snapshot().set_history;
        assert_eq!(
            history,
            vec![SetScore {
                set_number: 1,
                team1_score: 21,
                team2_score: 18,
            }]
        );
    }
}
