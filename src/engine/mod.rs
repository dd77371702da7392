//! Turn engine
//!
//! Pure functions that decide whether an answer is correct, whether a team
//! agrees on an answer, and what the match looks like after a turn. Nothing
//! in here touches the store or the clock; the driver owns those.

mod consensus;
mod evaluate;
mod resolver;

pub use consensus::{answers_agree, check_consensus, ConsensusResult};
pub use evaluate::evaluate;
pub use resolver::{resolve, Outcome, Resolution};

use crate::types::{QuestionId, TeamId};

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("question {id} is malformed: {reason}")]
    MalformedQuestion { id: QuestionId, reason: String },

    #[error("match is not in progress")]
    NotInProgress,

    #[error("match has no active question")]
    NoActiveQuestion,

    #[error("team {team} has no question at index {index}")]
    DeckExhausted { team: TeamId, index: u32 },
}
