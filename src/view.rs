//! Per-connection view of a match
//!
//! A client showing a match needs to reset its local input whenever the
//! turn moves on. `TurnTracker` remembers the last match snapshot a session
//! saw and reports what changed in the next one.

use crate::types::{Match, MatchPhase, QuestionId, TeamId};

/// What changed between two observed snapshots
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewChange {
    pub phase_changed: bool,
    pub turn_changed: bool,
    pub question_changed: bool,
}

impl ViewChange {
    /// The client should drop any pending selection
    pub fn needs_reset(&self) -> bool {
        self.phase_changed || self.turn_changed || self.question_changed
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    phase: MatchPhase,
    turn_number: u64,
    turn_team: Option<TeamId>,
    question: Option<(QuestionId, TeamId)>,
}

impl Snapshot {
    fn of(m: &Match) -> Self {
        Self {
            phase: m.room_status,
            turn_number: m.turn_number,
            turn_team: m.current_turn_team_id,
            question: m
                .current_question
                .as_ref()
                .map(|active| (active.question.id.clone(), active.owner_team_id)),
        }
    }
}

#[derive(Debug, Default)]
pub struct TurnTracker {
    last: Option<Snapshot>,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `m` and report how it differs from the previous observation.
    /// The first observation counts as a change of everything.
    pub fn observe(&mut self, m: &Match) -> ViewChange {
        let next = Snapshot::of(m);
        let change = match &self.last {
            None => ViewChange {
                phase_changed: true,
                turn_changed: true,
                question_changed: true,
            },
            Some(prev) => ViewChange {
                phase_changed: prev.phase != next.phase,
                turn_changed: prev.turn_team != next.turn_team
                    || prev.turn_number != next.turn_number,
                question_changed: prev.question != next.question,
            },
        };
        self.last = Some(next);
        change
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}
