//! Turn resolution
//!
//! Given the match and the answer a team settled on (or `Pass` on timeout),
//! compute who plays next, on which question, and with what scores.
//!
//! | correct | steal | effect                                                   |
//! |---------|-------|----------------------------------------------------------|
//! | yes     | no    | +1, turn passes on, index advances after the last team   |
//! | yes     | yes   | +1, stealer keeps the turn with a fresh question         |
//! | no      | no    | turn passes on with the same question (steal sub-round)  |
//! | no      | yes   | turn returns to the owner with a fresh question          |

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{evaluate, EngineError, EngineResult};
use crate::types::{ActiveQuestion, Match, MatchPhase, SubmittedAnswer, TeamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Owner answered its own question correctly
    Answered,
    /// Opponent answered a stolen question correctly
    Stolen,
    /// Owner missed; the question goes up for a steal
    Missed,
    /// Steal attempt failed too
    StealMissed,
}

impl Outcome {
    pub fn is_correct(self) -> bool {
        matches!(self, Outcome::Answered | Outcome::Stolen)
    }
}

/// The next state computed by [`resolve`]
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub outcome: Outcome,
    pub answering_team: TeamId,
    pub awarded_to: Option<TeamId>,
    pub next_team: TeamId,
    pub question_index: u32,
    /// None once the match is finished
    pub question: Option<ActiveQuestion>,
    pub scores: BTreeMap<TeamId, u32>,
    pub finished: bool,
}

/// Compute the state that follows the active team's answer.
///
/// A `Pass` goes through the same rules as a real answer, forced incorrect.
pub fn resolve(m: &Match, answer: &SubmittedAnswer) -> EngineResult<Resolution> {
    if m.room_status != MatchPhase::InProgress {
        return Err(EngineError::NotInProgress);
    }
    let current = m
        .current_question
        .as_ref()
        .ok_or(EngineError::NoActiveQuestion)?;
    let active = m.current_turn_team_id.ok_or(EngineError::NoActiveQuestion)?;

    // A timeout must always move the match along, even past a broken question
    let is_correct = match answer {
        SubmittedAnswer::Pass => false,
        _ => evaluate(&current.question, answer)?,
    };
    let is_steal = active != current.owner_team_id;
    let index = m.current_question_index;
    let other = m.team_after(active).unwrap_or(active);

    let (outcome, next_team, next_index) = match (is_correct, is_steal) {
        (true, false) => {
            let next_index = if m.is_last_in_order(active) {
                index + 1
            } else {
                index
            };
            (Outcome::Answered, other, next_index)
        }
        (true, true) => (Outcome::Stolen, active, index + 1),
        (false, false) => (Outcome::Missed, other, index),
        (false, true) => (Outcome::StealMissed, current.owner_team_id, index + 1),
    };

    let mut scores = m.team_scores.clone();
    let awarded_to = outcome.is_correct().then_some(active);
    if let Some(team) = awarded_to {
        *scores.entry(team).or_insert(0) += 1;
    }

    let finished = next_index >= m.questions_per_team;
    let question = if finished {
        None
    } else if outcome == Outcome::Missed {
        Some(current.clone())
    } else {
        let q = m
            .deck_question(next_team, next_index)
            .ok_or(EngineError::DeckExhausted {
                team: next_team,
                index: next_index,
            })?;
        Some(ActiveQuestion {
            question: q.clone(),
            owner_team_id: next_team,
        })
    };

    Ok(Resolution {
        outcome,
        answering_team: active,
        awarded_to,
        next_team,
        question_index: next_index,
        question,
        scores,
        finished,
    })
}

impl Resolution {
    /// Write this resolution into `m`, clearing the answer bag.
    pub fn apply(self, m: &mut Match, deadline: Option<String>) {
        m.team_scores = self.scores;
        m.current_question_index = self.question_index;
        m.current_question = self.question;
        m.current_answers.clear();
        m.turn_number += 1;

        if self.finished {
            m.room_status = MatchPhase::Finished;
            m.current_turn_team_id = None;
            m.turn_deadline = None;
        } else {
            m.current_turn_team_id = Some(self.next_team);
            m.turn_deadline = deadline;
        }
    }
}
