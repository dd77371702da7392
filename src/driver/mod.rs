//! Match driver
//!
//! Runs the turn engine against the match store. Every write is a
//! read-modify-write guarded by the match version, so two concurrent
//! resolutions of the same turn cannot both commit: the loser re-reads,
//! sees the turn already moved on, and does nothing.

mod lobby;
mod turn;

pub use turn::SubmitOutcome;

use std::sync::Arc;
use std::time::Duration;

use crate::engine::EngineError;
use crate::feedback::FeedbackGenerator;
use crate::questions::QuestionSource;
use crate::store::{MatchStore, MatchSubscription, StoreError};
use crate::types::*;

/// How often a write is retried after losing a version race
const MAX_COMMIT_ATTEMPTS: usize = 8;

/// Result type for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("match {0} not found")]
    MatchNotFound(MatchId),

    #[error("no match with join code {0}")]
    UnknownJoinCode(String),

    #[error("you are not part of this match")]
    NotParticipant,

    #[error("participant {0} not found")]
    ParticipantNotFound(ParticipantId),

    #[error("only the match creator can {0}")]
    NotHost(&'static str),

    #[error("not allowed while the match is {0:?}")]
    InvalidPhase(MatchPhase),

    #[error("team {0} does not exist in this match")]
    UnknownTeam(TeamId),

    #[error("only members of the active team can answer")]
    NotOnActiveTeam,

    #[error("every team needs at least one member before starting")]
    TeamsIncomplete,

    #[error("question source returned {got} questions, need at least {need}")]
    InsufficientQuestions { got: usize, need: usize },

    #[error("question source failed: {0}")]
    QuestionSource(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("invalid answer: {0}")]
    InvalidAnswer(String),

    #[error("match {0} kept changing, gave up after repeated conflicts")]
    Contention(MatchId),
}

impl DriverError {
    /// Stable error code for clients
    pub fn code(&self) -> &'static str {
        match self {
            DriverError::Engine(EngineError::MalformedQuestion { .. }) => "MALFORMED_QUESTION",
            DriverError::Engine(_) => "TURN_FAILED",
            DriverError::Store(_) => "STORE_ERROR",
            DriverError::MatchNotFound(_) => "MATCH_NOT_FOUND",
            DriverError::UnknownJoinCode(_) => "UNKNOWN_JOIN_CODE",
            DriverError::NotParticipant => "NOT_PARTICIPANT",
            DriverError::ParticipantNotFound(_) => "PARTICIPANT_NOT_FOUND",
            DriverError::NotHost(_) => "UNAUTHORIZED",
            DriverError::InvalidPhase(_) => "INVALID_PHASE",
            DriverError::UnknownTeam(_) => "UNKNOWN_TEAM",
            DriverError::NotOnActiveTeam => "NOT_YOUR_TURN",
            DriverError::TeamsIncomplete => "TEAMS_INCOMPLETE",
            DriverError::InsufficientQuestions { .. } => "INSUFFICIENT_QUESTIONS",
            DriverError::QuestionSource(_) => "QUESTION_SOURCE_FAILED",
            DriverError::InvalidSettings(_) => "INVALID_SETTINGS",
            DriverError::InvalidAnswer(_) => "INVALID_ANSWER",
            DriverError::Contention(_) => "CONFLICT",
        }
    }
}

/// What an edit closure decided to do with the match it was handed
pub(crate) enum Edit<T> {
    Commit(T),
    Unchanged(T),
}

#[derive(Clone)]
pub struct MatchDriver {
    store: Arc<dyn MatchStore>,
    questions: Arc<dyn QuestionSource>,
    feedback: Arc<dyn FeedbackGenerator>,
    match_ttl: Duration,
}

impl MatchDriver {
    pub fn new(
        store: Arc<dyn MatchStore>,
        questions: Arc<dyn QuestionSource>,
        feedback: Arc<dyn FeedbackGenerator>,
    ) -> Self {
        Self {
            store,
            questions,
            feedback,
            match_ttl: Duration::ZERO,
        }
    }

    /// Delete matches left untouched for longer than `ttl` (zero disables)
    pub fn with_match_ttl(mut self, ttl: Duration) -> Self {
        self.match_ttl = ttl;
        self
    }

    pub fn store(&self) -> &Arc<dyn MatchStore> {
        &self.store
    }

    pub async fn get_match(&self, match_id: &str) -> DriverResult<Match> {
        self.store
            .get_match(match_id)
            .await?
            .ok_or_else(|| DriverError::MatchNotFound(match_id.to_string()))
    }

    pub async fn find_by_join_code(&self, join_code: &str) -> DriverResult<Match> {
        self.store
            .find_by_join_code(join_code.trim())
            .await?
            .ok_or_else(|| DriverError::UnknownJoinCode(join_code.to_string()))
    }

    pub async fn participants(&self, match_id: &str) -> DriverResult<Vec<Participant>> {
        Ok(self.store.list_participants(match_id).await?)
    }

    pub async fn participant_for_user(
        &self,
        match_id: &str,
        user_id: &str,
    ) -> DriverResult<Option<Participant>> {
        Ok(self
            .participants(match_id)
            .await?
            .into_iter()
            .find(|p| p.user_id == user_id))
    }

    pub fn subscribe(&self, match_id: &str) -> MatchSubscription {
        self.store.subscribe(match_id)
    }

    /// Read-modify-write with optimistic retry.
    ///
    /// `edit` sees a fresh copy of the match and its participants on every
    /// attempt. An error from `edit` aborts without writing anything.
    pub(crate) async fn update_with_retry<T>(
        &self,
        match_id: &str,
        mut edit: impl FnMut(&mut Match, &[Participant]) -> DriverResult<Edit<T>>,
    ) -> DriverResult<(Match, T)> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let mut m = self.get_match(match_id).await?;
            let participants = self.store.list_participants(match_id).await?;
            let expected = m.version;

            let out = match edit(&mut m, &participants)? {
                Edit::Unchanged(out) => return Ok((m, out)),
                Edit::Commit(out) => out,
            };

            match self.store.update_match(m, expected).await {
                Ok(saved) => return Ok((saved, out)),
                Err(StoreError::VersionConflict { actual, .. }) => {
                    tracing::debug!(
                        "Match {} changed underneath (attempt {}, now v{}), retrying",
                        match_id,
                        attempt,
                        actual
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!("Giving up on match {} after repeated conflicts", match_id);
        Err(DriverError::Contention(match_id.to_string()))
    }
}

/// RFC 3339 deadline `seconds` from now
pub(crate) fn deadline_after(seconds: u32) -> String {
    (chrono::Utc::now() + chrono::Duration::seconds(i64::from(seconds))).to_rfc3339()
}
