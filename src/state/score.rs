use serde::Serialize;

/// Lifecycle of a match as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    /// Points are still being played.
    #[default]
    Live,
    /// The match has ended; no further updates are accepted.
    Completed,
}

/// Displayed score of a match.
///
/// Within one `current_set`, neither team score goes down unless the change
/// comes from the user's own action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreState {
    /// Team 1 points in the current set.
    pub team1_score: u32,
    /// Team 2 points in the current set.
    pub team2_score: u32,
    /// 1-based set number.
    pub current_set: u32,
    /// Sets won by team 1.
    pub team1_sets_won: u32,
    /// Sets won by team 2.
    pub team2_sets_won: u32,
    /// Live or completed.
    pub status: MatchStatus,
}

impl Default for ScoreState {
    fn default() -> Self {
        Self {
            team1_score: 0,
            team2_score: 0,
            current_set: 1,
            team1_sets_won: 0,
            team2_sets_won: 0,
            status: MatchStatus::Live,
        }
    }
}

impl ScoreState {
    /// Score at 0-0 in the current set.
    pub fn is_blank_score(&self) -> bool {
        self.team1_score == 0 && self.team2_score == 0
    }

    /// Whether the match has reached its terminal state.
    pub fn is_completed(&self) -> bool {
        self.status == MatchStatus::Completed
    }
}
