//! Match persistence
//!
//! The match record and its participants live in an external real-time
//! store. The engine only needs row-level reads and writes plus a change
//! feed keyed by match id, which is what [`MatchStore`] describes.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::types::{Match, MatchId, Participant, ParticipantId};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("match {0} not found")]
    MatchNotFound(MatchId),

    #[error("participant {0} not found")]
    ParticipantNotFound(ParticipantId),

    #[error("version conflict on match {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: MatchId,
        expected: u64,
        actual: u64,
    },

    #[error("join code {0} is already in use")]
    DuplicateJoinCode(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A change pushed to subscribers of a match
#[derive(Debug, Clone)]
pub enum MatchEvent {
    Updated(Box<Match>),
    ParticipantsChanged(MatchId),
    Deleted(MatchId),
}

impl MatchEvent {
    pub fn match_id(&self) -> &str {
        match self {
            MatchEvent::Updated(m) => &m.id,
            MatchEvent::ParticipantsChanged(id) | MatchEvent::Deleted(id) => id,
        }
    }
}

/// Change feed for a single match
pub struct MatchSubscription {
    match_id: MatchId,
    rx: broadcast::Receiver<MatchEvent>,
}

impl MatchSubscription {
    pub fn new(match_id: MatchId, rx: broadcast::Receiver<MatchEvent>) -> Self {
        Self { match_id, rx }
    }

    pub fn match_id(&self) -> &str {
        &self.match_id
    }

    /// Wait for the next event on this match. Returns None once the feed closes.
    pub async fn recv(&mut self) -> Option<MatchEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.match_id() == self.match_id => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    // Every Updated event carries the full record; a missed delete shows up on the next read
                    tracing::warn!(
                        "Subscription for match {} lagged, skipped {} events",
                        self.match_id,
                        skipped
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn insert_match(&self, m: Match) -> StoreResult<Match>;

    async fn get_match(&self, id: &str) -> StoreResult<Option<Match>>;

    async fn find_by_join_code(&self, join_code: &str) -> StoreResult<Option<Match>>;

    async fn list_matches(&self) -> StoreResult<Vec<Match>>;

    /// Replace the match if its stored version still equals `expected_version`.
    /// The store bumps the version and `updated_at` and returns the saved record.
    async fn update_match(&self, m: Match, expected_version: u64) -> StoreResult<Match>;

    /// Delete the match together with its participants
    async fn delete_match(&self, id: &str) -> StoreResult<()>;

    async fn insert_participant(&self, p: Participant) -> StoreResult<Participant>;

    async fn update_participant(&self, p: Participant) -> StoreResult<Participant>;

    /// Replace a participant only while its match is still at `expected_version`.
    /// The match version is bumped in the same write, so a concurrent
    /// `update_match` based on the old roster fails with `VersionConflict`.
    async fn update_participant_guarded(
        &self,
        p: Participant,
        expected_version: u64,
    ) -> StoreResult<Participant>;

    async fn delete_participant(&self, id: &str) -> StoreResult<()>;

    async fn list_participants(&self, match_id: &str) -> StoreResult<Vec<Participant>>;

    fn subscribe(&self, match_id: &str) -> MatchSubscription;
}
