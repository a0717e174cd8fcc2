use std::{fmt, time::SystemTime};

use serde::{Deserialize, Serialize};

/// Backend identifier of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub u64);

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an update came from. `Local` marks the outcome of the user's own write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    /// MESSAGE frame from the socket subscription.
    Push,
    /// REST snapshot fetched by the fallback poller.
    Poll,
    /// Server-confirmed result of a write made by this client.
    Local,
}

/// Kind of score event carried by an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// Current score of the set in play.
    ScoreUpdate,
    /// The set in play has been closed.
    SetCompleted,
    /// The match is over.
    MatchEnded,
}

/// Final score of one closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetScore {
    /// 1-based number of the set.
    pub set_number: u32,
    /// Points of team 1 when the set closed.
    pub team1_score: u32,
    /// Points of team 2 when the set closed.
    pub team2_score: u32,
}

/// Canonical, producer-independent view of a score payload.
///
/// Team scores stay `None` when the payload said nothing about them, so an
/// explicit zero can be told apart from missing information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreFields {
    /// Points of team 1 in the current set.
    pub team1_score: Option<u32>,
    /// Points of team 2 in the current set.
    pub team2_score: Option<u32>,
    /// 1-based set the scores belong to; `1` when the payload omits it.
    pub current_set: u32,
    /// Sets already won by team 1.
    pub team1_sets_won: Option<u32>,
    /// Sets already won by team 2.
    pub team2_sets_won: Option<u32>,
    /// Set a completion event refers to.
    pub set_number: Option<u32>,
    /// Team 1 points carried into the next set.
    pub next_set_score1: Option<u32>,
    /// Team 2 points carried into the next set.
    pub next_set_score2: Option<u32>,
    /// Winning team; `None` when unknown.
    pub winner_id: Option<u64>,
    /// Display name of the winning team.
    pub winner_name: Option<String>,
    /// Human-readable sets summary such as `2-1`.
    pub sets_score: Option<String>,
    /// Closed sets reported by a REST snapshot.
    pub set_history: Option<Vec<SetScore>>,
}

impl Default for ScoreFields {
    fn default() -> Self {
        Self {
            team1_score: None,
            team2_score: None,
            current_set: 1,
            team1_sets_won: None,
            team2_sets_won: None,
            set_number: None,
            next_set_score1: None,
            next_set_score2: None,
            winner_id: None,
            winner_name: None,
            sets_score: None,
            set_history: None,
        }
    }
}

impl ScoreFields {
    /// Whether neither team score is known.
    pub fn has_no_scores(&self) -> bool {
        self.team1_score.is_none() && self.team2_score.is_none()
    }

    /// Whether the payload reported any sets-won figure.
    pub fn reports_sets_won(&self) -> bool {
        self.team1_sets_won.is_some() || self.team2_sets_won.is_some()
    }

    /// Seed for the next set, present only when both sides are given.
    pub fn next_set_seed(&self) -> Option<(u32, u32)> {
        self.next_set_score1.zip(self.next_set_score2)
    }
}

/// A single update headed for the reconciliation engine. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEvent {
    /// What the event reports.
    pub kind: UpdateKind,
    /// Normalized payload.
    pub fields: ScoreFields,
    /// Producer of the event.
    pub source: UpdateSource,
    /// Wall-clock time the event was built.
    pub received_at: SystemTime,
}

impl UpdateEvent {
    /// Stamp a new event with the current wall-clock time.
    pub fn new(kind: UpdateKind, fields: ScoreFields, source: UpdateSource) -> Self {
        Self {
            kind,
            fields,
            source,
            received_at: SystemTime::now(),
        }
    }

    /// Score update carrying both team scores for `set`.
    pub fn score(source: UpdateSource, team1: u32, team2: u32, set: u32) -> Self {
        Self::new(
            UpdateKind::ScoreUpdate,
            ScoreFields {
                team1_score: Some(team1),
                team2_score: Some(team2),
                current_set: set,
                ..ScoreFields::default()
            },
            source,
        )
    }

    /// Whether the event reflects the user's own confirmed write.
    pub fn is_local(&self) -> bool {
        self.source == UpdateSource::Local
    }
}
