//! Listener side of the engine: latest snapshot plus ordered events.

use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

use crate::{
    dto::{
        format_system_time,
        payload::{MatchId, SetScore},
    },
    state::{reconciler::Milestone, score::ScoreState},
};

/// Latest displayed score, versioned so consumers can detect gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSnapshot {
    /// Match the state belongs to; `None` before a match is joined.
    pub match_id: Option<MatchId>,
    /// Displayed score.
    pub state: ScoreState,
    /// Closed sets, ordered by set number.
    pub set_history: Vec<SetScore>,
    /// Incremented on every emitted change.
    pub version: u64,
    /// RFC 3339 time the snapshot was produced.
    pub updated_at: String,
}

/// Events fanned out to UI listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchEvent {
    /// The displayed score changed.
    ScoreChanged(ScoreSnapshot),
    /// A set has been closed.
    #[serde(rename_all = "camelCase")]
    SetCompleted {
        /// Match the set belongs to.
        match_id: MatchId,
        /// Number of the closed set.
        set_number: u32,
        /// Team 1 points when the set closed.
        team1_score: u32,
        /// Team 2 points when the set closed.
        team2_score: u32,
        /// Team 1 sets won after the set.
        team1_sets_won: u32,
        /// Team 2 sets won after the set.
        team2_sets_won: u32,
    },
    /// The match is over.
    #[serde(rename_all = "camelCase")]
    MatchEnded {
        /// Match that ended.
        match_id: MatchId,
        /// Winning team, when reported.
        winner_id: Option<u64>,
        /// Display name of the winning team.
        winner_name: Option<String>,
        /// Sets summary such as `2-1`.
        sets_score: Option<String>,
        /// Terminal state of the match.
        final_state: ScoreState,
    },
}

impl MatchEvent {
    fn from_milestone(match_id: MatchId, milestone: &Milestone) -> Self {
        match milestone.clone() {
            Milestone::SetCompleted {
                set_number,
                team1_score,
                team2_score,
                team1_sets_won,
                team2_sets_won,
            } => MatchEvent::SetCompleted {
                match_id,
                set_number,
                team1_score,
                team2_score,
                team1_sets_won,
                team2_sets_won,
            },
            Milestone::MatchEnded {
                winner_id,
                winner_name,
                sets_score,
                final_state,
            } => MatchEvent::MatchEnded {
                match_id,
                winner_id,
                winner_name,
                sets_score,
                final_state,
            },
        }
    }
}

/// Fan-out point for engine emissions.
///
/// The `watch` side always holds the latest snapshot; the `broadcast` side
/// carries every change and milestone in order.
pub struct ScoreHub {
    snapshot: watch::Sender<ScoreSnapshot>,
    events: broadcast::Sender<MatchEvent>,
}

impl ScoreHub {
    /// Build a hub whose event channel buffers `capacity` items per listener.
    pub fn new(capacity: usize) -> Self {
        let (snapshot, _rx) = watch::channel(ScoreSnapshot {
            match_id: None,
            state: ScoreState::default(),
            set_history: Vec::new(),
            version: 0,
            updated_at: format_system_time(SystemTime::now()),
        });
        let (events, _rx) = broadcast::channel(capacity);
        Self { snapshot, events }
    }

    /// Clone of the latest snapshot.
    pub fn snapshot(&self) -> ScoreSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that always sees the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<ScoreSnapshot> {
        self.snapshot.subscribe()
    }

    /// Receiver of every change and milestone from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MatchEvent> {
        self.events.subscribe()
    }

    /// Event stream that silently skips items lost to lag.
    pub fn events(&self) -> impl Stream<Item = MatchEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(Result::ok)
    }

    /// Publish a new anchor: milestones first, then the score change.
    pub(crate) fn publish(
        &self,
        match_id: MatchId,
        state: ScoreState,
        set_history: &[SetScore],
        milestones: &[Milestone],
    ) {
        for milestone in milestones {
            let _ = self
                .events
                .send(MatchEvent::from_milestone(match_id, milestone));
        }

        let mut published = None;
        self.snapshot.send_modify(|current| {
            current.match_id = Some(match_id);
            current.state = state;
            current.set_history = set_history.to_vec();
            current.version += 1;
            current.updated_at = format_system_time(SystemTime::now());
            published = Some(current.clone());
        });
        if let Some(snapshot) = published {
            let _ = self.events.send(MatchEvent::ScoreChanged(snapshot));
        }
    }

    /// Point the hub at a new match without emitting a change event.
    pub(crate) fn reset(&self, match_id: Option<MatchId>, state: ScoreState) {
        self.snapshot.send_modify(|current| {
            current.match_id = match_id;
            current.state = state;
            current.set_history.clear();
            current.version += 1;
            current.updated_at = format_system_time(SystemTime::now());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_orders_milestones_before_score() {
        let hub = ScoreHub::new(8);
        let mut rx = hub.subscribe();
        let state = ScoreState {
            current_set: 2,
            team1_sets_won: 1,
            ..ScoreState::default()
        };

        let history = [SetScore {
            set_number: 1,
            team1_score: 21,
            team2_score: 17,
        }];
        hub.publish(
            MatchId(9),
            state,
            &history,
            &[Milestone::SetCompleted {
                set_number: 1,
                team1_score: 21,
                team2_score: 17,
                team1_sets_won: 1,
                team2_sets_won: 0,
            }],
        );

        assert!(matches!(
            rx.recv().await.unwrap(),
            MatchEvent::SetCompleted { set_number: 1, .. }
        ));
        match rx.recv().await.unwrap() {
            MatchEvent::ScoreChanged(snapshot) => {
                assert_eq!(snapshot.match_id, Some(MatchId(9)));
                assert_eq!(snapshot.state, state);
                assert_eq!(snapshot.version, 1);
                assert_eq!(snapshot.set_history, history);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(hub.snapshot().state.current_set, 2);
    }

    #[tokio::test]
    async fn watchers_see_latest_snapshot() {
        let hub = ScoreHub::new(4);
        let mut watch = hub.watch();

        hub.publish(MatchId(1), ScoreState::default(), &[], &[]);
        watch.changed().await.unwrap();
        assert_eq!(watch.borrow().version, 1);

        hub.reset(None, ScoreState::default());
        watch.changed().await.unwrap();
        assert_eq!(watch.borrow().match_id, None);
    }

    #[tokio::test]
    async fn event_stream_skips_lagged_items() {
        let hub = ScoreHub::new(1);
        let mut events = Box::pin(hub.events());

        hub.publish(MatchId(1), ScoreState::default(), &[], &[]);
        hub.publish(
            MatchId(1),
            ScoreState {
                team1_score: 1,
                ..ScoreState::default()
            },
            &[],
            &[],
        );

        match events.next().await {
            Some(MatchEvent::ScoreChanged(snapshot)) => assert_eq!(snapshot.state.team1_score, 1),
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = MatchEvent::MatchEnded {
            match_id: MatchId(3),
            winner_id: Some(7),
            winner_name: None,
            sets_score: Some("2-0".into()),
            final_state: ScoreState::default(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "match_ended");
        assert_eq!(json["matchId"], 3);
        assert_eq!(json["finalState"]["status"], "LIVE");
    }
}
