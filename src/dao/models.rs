//! Request and response bodies of the scoring REST API.

use serde::{Deserialize, Serialize};

use crate::dto::payload::{MatchId, ScoreFields};

/// Default scoring method when the caller does not name one.
pub const DEFAULT_METHOD: &str = "ACE";

/// Body of `POST /match-scoring/add-point`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPointRequest {
    /// Match being scored.
    pub match_id: MatchId,
    /// Team that won the point.
    pub team_id: u64,
    /// The API requires a player; callers fall back to the team id.
    pub player_id: u64,
    /// Upper-case scoring method (`ACE`, `SMASH`, `DROP`, `NET`, ...).
    pub method: String,
}

impl AddPointRequest {
    /// Build a request, filling in the player and method defaults.
    pub fn new(match_id: MatchId, team_id: u64, player_id: Option<u64>, method: Option<&str>) -> Self {
        let method = method
            .map(str::trim)
            .filter(|method| !method.is_empty())
            .unwrap_or(DEFAULT_METHOD)
            .to_uppercase();

        Self {
            match_id,
            team_id,
            player_id: player_id.filter(|id| *id != 0).unwrap_or(team_id),
            method,
        }
    }
}

/// Body of `POST /match-scoring/undo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoRequest {
    /// Match whose last event is reverted.
    pub match_id: MatchId,
}

/// Score block shared by write responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreResponse {
    /// Team 1 points in the current set.
    pub team1_score: u32,
    /// Team 2 points in the current set.
    pub team2_score: u32,
    /// Set now in play.
    #[serde(alias = "currentSet")]
    pub current_set_number: u32,
    /// Sets won by team 1.
    pub team1_sets_won: u32,
    /// Sets won by team 2.
    pub team2_sets_won: u32,
}

impl Default for ScoreResponse {
    fn default() -> Self {
        Self {
            team1_score: 0,
            team2_score: 0,
            current_set_number: 1,
            team1_sets_won: 0,
            team2_sets_won: 0,
        }
    }
}

impl ScoreResponse {
    /// Server-confirmed score as payload fields.
    pub fn to_fields(&self) -> ScoreFields {
        ScoreFields {
            team1_score: Some(self.team1_score),
            team2_score: Some(self.team2_score),
            current_set: self.current_set_number.max(1),
            team1_sets_won: Some(self.team1_sets_won),
            team2_sets_won: Some(self.team2_sets_won),
            ..ScoreFields::default()
        }
    }
}

/// Response of `POST /match-scoring/add-point`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddPointResponse {
    /// Score after the point.
    #[serde(flatten)]
    pub score: ScoreResponse,
    /// The point closed a set; `score` already shows the next one.
    pub set_completed: bool,
    /// The point won the match.
    pub match_completed: bool,
    /// `0` from the server means "no winner".
    pub winner_team_id: Option<u64>,
    /// Display name of the winning team.
    pub winner_name: Option<String>,
}

impl AddPointResponse {
    /// Winning team, ignoring the server's `0` placeholder.
    pub fn winner_id(&self) -> Option<u64> {
        self.winner_team_id.filter(|id| *id != 0)
    }

    /// Fields for the match-ended event that follows a winning point.
    pub fn match_end_fields(&self) -> ScoreFields {
        ScoreFields {
            team1_sets_won: Some(self.score.team1_sets_won),
            team2_sets_won: Some(self.score.team2_sets_won),
            current_set: self.score.current_set_number.max(1),
            winner_id: self.winner_id(),
            winner_name: self.winner_name.clone(),
            ..ScoreFields::default()
        }
    }
}

/// Response of `POST /match-scoring/undo`.
pub type UndoResponse = ScoreResponse;
