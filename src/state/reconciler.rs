//! Arbitration between push, poll and local score updates.
//!
//! [`ReconciliationEngine`] is plain synchronous state: it owns the confirmed
//! anchor and decides, one event at a time, whether the event replaces it.
//! The async actor in [`crate::state`] serializes calls into it.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, trace};

use crate::{
    dto::payload::{ScoreFields, SetScore, UpdateEvent, UpdateKind},
    state::{
        clock::Clock,
        score::{MatchStatus, ScoreState},
    },
};

/// Window after a local write during which external updates are ignored.
pub const DEFAULT_LOCKOUT: Duration = Duration::from_secs(10);

/// Tunables of the arbitration heuristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// How long a confirmed local write shields the anchor from push/poll.
    pub lockout: Duration,
    /// Points a non-local update may fall below the anchor before it counts
    /// as a regression.
    pub regression_tolerance: u32,
    /// Reject a same-set 0-0 from push/poll while the anchor has points.
    pub suppress_zero_reset: bool,
    /// Reject push/poll updates that refer to an earlier set than the anchor.
    pub reject_stale_sets: bool,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            lockout: DEFAULT_LOCKOUT,
            regression_tolerance: 0,
            suppress_zero_reset: true,
            reject_stale_sets: true,
        }
    }
}

/// Why an update left the anchor untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// The match already ended.
    MatchCompleted,
    /// A local write happened inside the lockout window.
    LockedOut,
    /// Neither team score was present.
    NoInformation,
    /// Same-set 0-0 over a non-zero anchor.
    SpuriousReset,
    /// A score went down within the same set.
    Regression,
    /// The update refers to a set the anchor has already left.
    StaleSet,
    /// The update was produced for a match that is no longer active.
    WrongMatch,
}

impl Rejection {
    /// Stable snake_case label used in logs and counters.
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::MatchCompleted => "match_completed",
            Rejection::LockedOut => "locked_out",
            Rejection::NoInformation => "no_information",
            Rejection::SpuriousReset => "spurious_reset",
            Rejection::Regression => "regression",
            Rejection::StaleSet => "stale_set",
            Rejection::WrongMatch => "wrong_match",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of rejected updates per reason, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RejectionCounters {
    counts: IndexMap<Rejection, u64>,
}

impl RejectionCounters {
    /// Count one more rejection for `reason`.
    pub fn record(&mut self, reason: Rejection) {
        *self.counts.entry(reason).or_default() += 1;
    }

    /// Rejections recorded for `reason`.
    pub fn get(&self, reason: Rejection) -> u64 {
        self.counts.get(&reason).copied().unwrap_or(0)
    }

    /// Rejections recorded across all reasons.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Notable transitions emitted alongside a new anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Milestone {
    /// A set closed with the given final score.
    SetCompleted {
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
    /// The match ended.
    MatchEnded {
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

/// Result of arbitrating one update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The anchor changed; listeners must be told.
    Applied {
        /// New anchor state.
        state: ScoreState,
        /// Transitions to announce before the score change.
        milestones: Vec<Milestone>,
    },
    /// Accepted but identical to the anchor; nothing to emit.
    Unchanged,
    /// Dropped by policy.
    Rejected(Rejection),
}

impl Outcome {
    /// Whether the anchor changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }
}

/// Last accepted state plus the time of the last trusted local write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedAnchor {
    /// Displayed state.
    pub state: ScoreState,
    /// Closed sets, ordered by set number.
    pub set_history: Vec<SetScore>,
    /// When the last `Local` update was committed.
    pub last_local_update_at: Option<Instant>,
}

impl ConfirmedAnchor {
    fn new(state: ScoreState) -> Self {
        Self {
            state,
            set_history: Vec::new(),
            last_local_update_at: None,
        }
    }
}

/// Candidate anchor computed from an event before it is committed.
struct Transition {
    state: ScoreState,
    milestones: Vec<Milestone>,
    set_history: Vec<SetScore>,
}

/// Insert or replace the entry for `entry.set_number`, keeping the list sorted.
fn record_set(history: &mut Vec<SetScore>, entry: SetScore) {
    match history.binary_search_by_key(&entry.set_number, |set| set.set_number) {
        Ok(index) => history[index] = entry,
        Err(index) => history.insert(index, entry),
    }
}

/// Single owner of the confirmed anchor.
pub struct ReconciliationEngine {
    anchor: ConfirmedAnchor,
    policy: ReconcilePolicy,
    clock: Arc<dyn Clock>,
    counters: RejectionCounters,
}

impl ReconciliationEngine {
    /// Engine anchored at `initial` with an empty history and no lockout.
    pub fn new(initial: ScoreState, policy: ReconcilePolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            anchor: ConfirmedAnchor::new(initial),
            policy,
            clock,
            counters: RejectionCounters::default(),
        }
    }

    /// Currently displayed state.
    pub fn state(&self) -> ScoreState {
        self.anchor.state
    }

    /// Closed sets of the match so far.
    pub fn set_history(&self) -> &[SetScore] {
        &self.anchor.set_history
    }

    /// Full anchor, including the lockout timestamp.
    pub fn anchor(&self) -> &ConfirmedAnchor {
        &self.anchor
    }

    /// Rejections recorded since the engine was created.
    pub fn counters(&self) -> &RejectionCounters {
        &self.counters
    }

    /// Start over from `initial`, forgetting the lockout and the set history.
    /// Counters are kept.
    pub fn reset(&mut self, initial: ScoreState) {
        self.anchor = ConfirmedAnchor::new(initial);
    }

    /// Decide whether `event` replaces the anchor.
    pub fn arbitrate(&mut self, event: UpdateEvent) -> Outcome {
        let now = self.clock.now();
        let local = event.is_local();

        let planned = self.screen(local, now).and_then(|()| match event.kind {
            UpdateKind::ScoreUpdate => self.plan_score_update(&event.fields, local),
            UpdateKind::SetCompleted => self.plan_set_completed(&event.fields, local),
            UpdateKind::MatchEnded => Ok(self.plan_match_ended(event.fields)),
        });

        match planned {
            Ok(transition) => self.commit(transition, local, now),
            Err(reason) => {
                self.record_rejection(reason);
                debug!(
                    reason = %reason,
                    kind = ?event.kind,
                    source = ?event.source,
                    "update rejected"
                );
                Outcome::Rejected(reason)
            }
        }
    }

    pub(crate) fn record_rejection(&mut self, reason: Rejection) {
        self.counters.record(reason);
    }

    /// Checks shared by every event kind.
    fn screen(&self, local: bool, now: Instant) -> Result<(), Rejection> {
        if self.anchor.state.is_completed() {
            return Err(Rejection::MatchCompleted);
        }
        if !local && self.within_lockout(now) {
            return Err(Rejection::LockedOut);
        }
        Ok(())
    }

    fn within_lockout(&self, now: Instant) -> bool {
        self.anchor
            .last_local_update_at
            .is_some_and(|last| now.saturating_duration_since(last) < self.policy.lockout)
    }

    fn plan_score_update(&self, fields: &ScoreFields, local: bool) -> Result<Transition, Rejection> {
        let anchor = self.anchor.state;
        if !local && fields.has_no_scores() {
            return Err(Rejection::NoInformation);
        }

        let candidate = ScoreState {
            team1_score: fields.team1_score.unwrap_or(anchor.team1_score),
            team2_score: fields.team2_score.unwrap_or(anchor.team2_score),
            current_set: fields.current_set,
            team1_sets_won: fields.team1_sets_won.unwrap_or(anchor.team1_sets_won),
            team2_sets_won: fields.team2_sets_won.unwrap_or(anchor.team2_sets_won),
            status: MatchStatus::Live,
        };

        if !local {
            self.check_external(&candidate)?;
        }

        let mut set_history = self.anchor.set_history.clone();
        for entry in fields.set_history.iter().flatten() {
            record_set(&mut set_history, *entry);
        }

        let mut milestones = Vec::new();
        if candidate.current_set > anchor.current_set {
            // A reported final score beats the last one we saw.
            let closed = match set_history
                .iter()
                .find(|set| set.set_number == anchor.current_set)
            {
                Some(reported) => *reported,
                None => {
                    let seen = SetScore {
                        set_number: anchor.current_set,
                        team1_score: anchor.team1_score,
                        team2_score: anchor.team2_score,
                    };
                    record_set(&mut set_history, seen);
                    seen
                }
            };
            milestones.push(Milestone::SetCompleted {
                set_number: closed.set_number,
                team1_score: closed.team1_score,
                team2_score: closed.team2_score,
                team1_sets_won: candidate.team1_sets_won,
                team2_sets_won: candidate.team2_sets_won,
            });
        }

        Ok(Transition {
            state: candidate,
            milestones,
            set_history,
        })
    }

    /// Guards that only apply to push and poll.
    fn check_external(&self, candidate: &ScoreState) -> Result<(), Rejection> {
        let anchor = self.anchor.state;

        if candidate.current_set < anchor.current_set {
            if self.policy.reject_stale_sets {
                return Err(Rejection::StaleSet);
            }
            return Ok(());
        }
        if candidate.current_set > anchor.current_set {
            return Ok(());
        }

        if self.policy.suppress_zero_reset && candidate.is_blank_score() && !anchor.is_blank_score()
        {
            return Err(Rejection::SpuriousReset);
        }

        let tolerance = self.policy.regression_tolerance;
        if candidate.team1_score.saturating_add(tolerance) < anchor.team1_score
            || candidate.team2_score.saturating_add(tolerance) < anchor.team2_score
        {
            return Err(Rejection::Regression);
        }
        Ok(())
    }

    fn plan_set_completed(&self, fields: &ScoreFields, local: bool) -> Result<Transition, Rejection> {
        let anchor = self.anchor.state;

        if !local
            && self.policy.reject_stale_sets
            && fields
                .set_number
                .is_some_and(|closed| closed != anchor.current_set)
        {
            return Err(Rejection::StaleSet);
        }

        let final1 = fields.team1_score.unwrap_or(anchor.team1_score);
        let final2 = fields.team2_score.unwrap_or(anchor.team2_score);
        let (sets1, sets2) = if fields.reports_sets_won() {
            (
                fields.team1_sets_won.unwrap_or(anchor.team1_sets_won),
                fields.team2_sets_won.unwrap_or(anchor.team2_sets_won),
            )
        } else if final1 > final2 {
            (anchor.team1_sets_won + 1, anchor.team2_sets_won)
        } else if final2 > final1 {
            (anchor.team1_sets_won, anchor.team2_sets_won + 1)
        } else {
            (anchor.team1_sets_won, anchor.team2_sets_won)
        };
        let (seed1, seed2) = fields.next_set_seed().unwrap_or((0, 0));

        let next = ScoreState {
            team1_score: seed1,
            team2_score: seed2,
            current_set: anchor.current_set + 1,
            team1_sets_won: sets1,
            team2_sets_won: sets2,
            status: MatchStatus::Live,
        };

        let mut set_history = self.anchor.set_history.clone();
        record_set(
            &mut set_history,
            SetScore {
                set_number: anchor.current_set,
                team1_score: final1,
                team2_score: final2,
            },
        );

        Ok(Transition {
            state: next,
            set_history,
            milestones: vec![Milestone::SetCompleted {
                set_number: anchor.current_set,
                team1_score: final1,
                team2_score: final2,
                team1_sets_won: sets1,
                team2_sets_won: sets2,
            }],
        })
    }

    fn plan_match_ended(&self, fields: ScoreFields) -> Transition {
        let anchor = self.anchor.state;
        let final_state = ScoreState {
            team1_sets_won: fields.team1_sets_won.unwrap_or(anchor.team1_sets_won),
            team2_sets_won: fields.team2_sets_won.unwrap_or(anchor.team2_sets_won),
            status: MatchStatus::Completed,
            ..anchor
        };

        Transition {
            state: final_state,
            set_history: self.anchor.set_history.clone(),
            milestones: vec![Milestone::MatchEnded {
                winner_id: fields.winner_id,
                winner_name: fields.winner_name,
                sets_score: fields.sets_score,
                final_state,
            }],
        }
    }

    fn commit(&mut self, transition: Transition, local: bool, now: Instant) -> Outcome {
        if local {
            self.anchor.last_local_update_at = Some(now);
        }

        if transition.state == self.anchor.state
            && transition.milestones.is_empty()
            && transition.set_history == self.anchor.set_history
        {
            trace!("update matches the anchor");
            return Outcome::Unchanged;
        }

        self.anchor.state = transition.state;
        self.anchor.set_history = transition.set_history;
        debug!(
            team1 = transition.state.team1_score,
            team2 = transition.state.team2_score,
            set = transition.state.current_set,
            local,
            "anchor updated"
        );
        Outcome::Applied {
            state: transition.state,
            milestones: transition.milestones,
        }
    }
}
