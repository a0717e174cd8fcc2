//! Maps the differently-shaped JSON payloads of push messages and REST
//! snapshots onto one [`UpdateEvent`] shape.

use serde_json::{Map, Value};

use crate::{
    dto::payload::{ScoreFields, SetScore, UpdateEvent, UpdateKind, UpdateSource},
    error::NormalizeError,
};

type Object = Map<String, Value>;

const SCORE_UPDATE_TYPES: &[&str] = &[
    "POINT",
    "GOAL",
    "SCORING_EVENT",
    "SCORE_UPDATE",
    "UNDO",
    "UNDO_SCORE",
];
const SET_COMPLETED_TYPES: &[&str] = &["SET_COMPLETED"];
const MATCH_ENDED_TYPES: &[&str] = &["MATCH_COMPLETED", "MATCH_END", "MATCH_ENDED"];
const TERMINAL_STATUSES: &[&str] = &["COMPLETED", "ENDED", "FINISHED"];
const SCORE_SHAPED_KEYS: &[&str] = &["team1Score", "team2Score", "scoreA", "scoreB", "scoreState"];

/// Normalize the body of a push MESSAGE frame.
pub fn normalize_message(body: &str, source: UpdateSource) -> Result<UpdateEvent, NormalizeError> {
    let value: Value = serde_json::from_str(body)?;
    normalize_value(&value, source)
}

/// Normalize an already-parsed event payload.
pub fn normalize_value(value: &Value, source: UpdateSource) -> Result<UpdateEvent, NormalizeError> {
    let root = value.as_object().ok_or(NormalizeError::NotAnObject)?;
    let data = match root.get("data") {
        Some(Value::Object(inner)) => inner,
        _ => root,
    };

    let kind = resolve_kind(root, data)?;
    let fields = match kind {
        UpdateKind::ScoreUpdate => score_fields(data)?,
        UpdateKind::SetCompleted => set_completed_fields(data)?,
        UpdateKind::MatchEnded => match_ended_fields(data)?,
    };

    Ok(UpdateEvent::new(kind, fields, source))
}

/// Normalize a REST score snapshot.
///
/// Yields a score update carrying the reported set history, followed by a
/// match-ended event when the snapshot's status says the match is over.
pub fn normalize_snapshot(
    value: &Value,
    source: UpdateSource,
) -> Result<Vec<UpdateEvent>, NormalizeError> {
    let data = value.as_object().ok_or(NormalizeError::NotAnObject)?;
    let fields = ScoreFields {
        set_history: set_history(data),
        ..score_fields(data)?
    };
    let mut events = vec![UpdateEvent::new(UpdateKind::ScoreUpdate, fields, source)];

    let finished = data
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|status| TERMINAL_STATUSES.contains(&status.to_uppercase().as_str()));
    if finished {
        events.push(UpdateEvent::new(
            UpdateKind::MatchEnded,
            match_ended_fields(data)?,
            source,
        ));
    }

    Ok(events)
}

fn resolve_kind(root: &Object, data: &Object) -> Result<UpdateKind, NormalizeError> {
    let event_type = ["eventType", "type"]
        .iter()
        .find_map(|key| {
            root.get(*key)
                .or_else(|| data.get(*key))
                .and_then(Value::as_str)
        })
        .map(|raw| raw.trim().to_uppercase())
        .unwrap_or_default();

    let kind = if SCORE_UPDATE_TYPES.contains(&event_type.as_str()) {
        UpdateKind::ScoreUpdate
    } else if SET_COMPLETED_TYPES.contains(&event_type.as_str()) {
        UpdateKind::SetCompleted
    } else if MATCH_ENDED_TYPES.contains(&event_type.as_str()) {
        UpdateKind::MatchEnded
    } else if SCORE_SHAPED_KEYS.iter().any(|key| data.contains_key(*key)) {
        UpdateKind::ScoreUpdate
    } else {
        return Err(NormalizeError::UnrecognizedEvent { event_type });
    };

    Ok(kind)
}

fn score_fields(data: &Object) -> Result<ScoreFields, NormalizeError> {
    Ok(ScoreFields {
        team1_score: team_score(data, "scoreA", &["team1Score", "scoreA"])?,
        team2_score: team_score(data, "scoreB", &["team2Score", "scoreB"])?,
        current_set: current_set(data)?,
        team1_sets_won: count(data, "team1SetsWon")?,
        team2_sets_won: count(data, "team2SetsWon")?,
        ..ScoreFields::default()
    })
}

fn set_completed_fields(data: &Object) -> Result<ScoreFields, NormalizeError> {
    let team1_score = match count(data, "team1SetScore")? {
        Some(score) => Some(score),
        None => team_score(data, "scoreA", &["team1Score", "scoreA"])?,
    };
    let team2_score = match count(data, "team2SetScore")? {
        Some(score) => Some(score),
        None => team_score(data, "scoreB", &["team2Score", "scoreB"])?,
    };

    Ok(ScoreFields {
        team1_score,
        team2_score,
        current_set: current_set(data)?,
        team1_sets_won: count(data, "team1SetsWon")?,
        team2_sets_won: count(data, "team2SetsWon")?,
        set_number: first_count(data, &["setNumber", "set"])?,
        next_set_score1: count(data, "nextSetScore1")?,
        next_set_score2: count(data, "nextSetScore2")?,
        ..ScoreFields::default()
    })
}

fn match_ended_fields(data: &Object) -> Result<ScoreFields, NormalizeError> {
    let winner_id = match first_count(data, &["winnerTeamId", "winnerId"])? {
        Some(0) | None => None,
        Some(id) => Some(u64::from(id)),
    };

    Ok(ScoreFields {
        team1_sets_won: count(data, "team1SetsWon")?,
        team2_sets_won: count(data, "team2SetsWon")?,
        current_set: current_set(data)?,
        winner_id,
        winner_name: text(data, "winnerName"),
        sets_score: text(data, "setsScore"),
        ..ScoreFields::default()
    })
}

/// Closed sets listed under `setHistory`. Entries that are not objects or
/// carry invalid numbers are skipped; a missing set number falls back to the
/// entry's position.
fn set_history(data: &Object) -> Option<Vec<SetScore>> {
    let entries = data.get("setHistory")?.as_array()?;
    let history = entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let entry = entry.as_object()?;
            let position = u32::try_from(index + 1).ok()?;
            let set_number = first_count(entry, &["set", "setNumber"]).ok()?.unwrap_or(position);
            if set_number == 0 {
                return None;
            }
            Some(SetScore {
                set_number,
                team1_score: first_count(entry, &["team1", "team1Score"]).ok()?.unwrap_or(0),
                team2_score: first_count(entry, &["team2", "team2Score"]).ok()?.unwrap_or(0),
            })
        })
        .collect();
    Some(history)
}

/// Score for one team: nested `scoreState.<nested_key>` first, then the flat
/// keys in order. The first present field wins.
fn team_score(
    data: &Object,
    nested_key: &'static str,
    flat_keys: &[&'static str],
) -> Result<Option<u32>, NormalizeError> {
    if let Some(Value::Object(state)) = data.get("scoreState")
        && let Some(score) = count(state, nested_key)?
    {
        return Ok(Some(score));
    }
    first_count(data, flat_keys)
}

fn current_set(data: &Object) -> Result<u32, NormalizeError> {
    match first_count(data, &["currentSetNumber", "currentSet"])? {
        Some(0) => Err(NormalizeError::InvalidField {
            field: "currentSet",
            value: Value::from(0),
        }),
        Some(set) => Ok(set),
        None => Ok(1),
    }
}

fn first_count(data: &Object, keys: &[&'static str]) -> Result<Option<u32>, NormalizeError> {
    for &key in keys {
        if let Some(value) = count(data, key)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// Read a non-negative integer. Absent and `null` mean "not present";
/// numeric strings are accepted.
fn count(data: &Object, key: &'static str) -> Result<Option<u32>, NormalizeError> {
    let invalid = |value: &Value| NormalizeError::InvalidField {
        field: key,
        value: value.clone(),
    };

    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value @ Value::Number(number)) => number
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| invalid(value)),
        Some(value @ Value::String(raw)) => raw
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| invalid(value)),
        Some(other) => Err(invalid(other)),
    }
}

fn text(data: &Object, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
