//! Match lifecycle outside of turns: creation, joining, teams, deletion

use rand::Rng;

use super::{DriverError, DriverResult, MatchDriver, MAX_COMMIT_ATTEMPTS};
use crate::store::StoreError;
use crate::types::*;

/// Safe character set for join codes (excludes 0/O, 1/I/L to avoid confusion)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 5;
const MAX_CODE_ATTEMPTS: usize = 16;

/// Generate a random short join code
fn generate_join_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

fn display_name_or_generated(display_name: Option<String>) -> String {
    display_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| petname::petname(2, " "))
        .unwrap_or_else(|| "Player".to_string())
}

impl MatchDriver {
    /// Create a match in the lobby with a fresh join code
    pub async fn create_match(&self, creator_id: &str, settings: MatchSettings) -> DriverResult<Match> {
        if settings.questions_per_team == 0 {
            return Err(DriverError::InvalidSettings(
                "questions_per_team must be at least 1".to_string(),
            ));
        }
        if settings.time_per_question == 0 {
            return Err(DriverError::InvalidSettings(
                "time_per_question must be at least 1 second".to_string(),
            ));
        }

        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = generate_join_code();
            if self.store.find_by_join_code(&code).await?.is_some() {
                continue;
            }

            let m = Match::new(
                ulid::Ulid::new().to_string(),
                code,
                creator_id.to_string(),
                settings.clone(),
            );
            match self.store.insert_match(m).await {
                Ok(m) => {
                    tracing::info!("Match {} created by {} (code {})", m.id, creator_id, m.join_code);
                    return Ok(m);
                }
                // Lost a race for the code - pick another
                Err(StoreError::DuplicateJoinCode(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(DriverError::Store(StoreError::Unavailable(
            "could not allocate a unique join code".to_string(),
        )))
    }

    /// Join a match by code. Re-joining returns the existing membership.
    pub async fn join(
        &self,
        join_code: &str,
        user_id: &str,
        display_name: Option<String>,
    ) -> DriverResult<(Match, Participant)> {
        let m = self.find_by_join_code(join_code).await?;

        if let Some(mut existing) = self.participant_for_user(&m.id, user_id).await? {
            if let Some(name) = display_name.map(|n| n.trim().to_string()) {
                if !name.is_empty() && name != existing.display_name {
                    existing.display_name = name;
                    existing = self.store.update_participant(existing).await?;
                }
            }
            return Ok((m, existing));
        }

        // Late joiners spectate until the next match; finished matches are closed
        if m.room_status == MatchPhase::Finished {
            return Err(DriverError::InvalidPhase(m.room_status));
        }

        let participant = Participant {
            id: ulid::Ulid::new().to_string(),
            match_id: m.id.clone(),
            user_id: user_id.to_string(),
            display_name: display_name_or_generated(display_name),
            team_id: None,
            joined_at: chrono::Utc::now().to_rfc3339(),
        };
        let participant = self.store.insert_participant(participant).await?;

        tracing::info!(
            "{} joined match {} as {}",
            user_id,
            m.id,
            participant.display_name
        );
        Ok((m, participant))
    }

    /// Put a participant on a team, or take them off with `None` (host only, lobby only)
    pub async fn assign_team(
        &self,
        actor_id: &str,
        match_id: &str,
        participant_id: &str,
        team: Option<TeamId>,
    ) -> DriverResult<Participant> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let m = self.get_match(match_id).await?;
            if !m.is_host(actor_id) {
                return Err(DriverError::NotHost("assign teams"));
            }
            if m.room_status != MatchPhase::Lobby {
                return Err(DriverError::InvalidPhase(m.room_status));
            }
            if let Some(team) = team {
                if !m.teams.contains(&team) {
                    return Err(DriverError::UnknownTeam(team));
                }
            }

            let mut participant = self
                .participants(match_id)
                .await?
                .into_iter()
                .find(|p| p.id == participant_id)
                .ok_or_else(|| DriverError::ParticipantNotFound(participant_id.to_string()))?;

            participant.team_id = team;
            match self
                .store
                .update_participant_guarded(participant, m.version)
                .await
            {
                Ok(participant) => {
                    tracing::info!(
                        "Participant {} assigned to team {:?} in match {}",
                        participant.id,
                        team,
                        match_id
                    );
                    return Ok(participant);
                }
                Err(StoreError::VersionConflict { actual, .. }) => {
                    tracing::debug!(
                        "Match {} changed during team assignment (attempt {}, now v{}), retrying",
                        match_id,
                        attempt,
                        actual
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!("Giving up on team assignment in match {} after repeated conflicts", match_id);
        Err(DriverError::Contention(match_id.to_string()))
    }

    /// Leave a match. If the leaver was on the answering team, their pending
    /// answer is dropped and the rest of the team may now agree.
    pub async fn leave(&self, match_id: &str, user_id: &str) -> DriverResult<()> {
        let participant = self
            .participant_for_user(match_id, user_id)
            .await?
            .ok_or(DriverError::NotParticipant)?;
        self.store.delete_participant(&participant.id).await?;
        tracing::info!("{} left match {}", user_id, match_id);

        let m = self.get_match(match_id).await?;
        if m.room_status == MatchPhase::InProgress
            && participant.team_id.is_some()
            && participant.team_id == m.current_turn_team_id
        {
            self.settle_turn(match_id).await?;
        }
        Ok(())
    }

    /// Delete a match in any phase (creator only)
    pub async fn delete_match(&self, actor_id: &str, match_id: &str) -> DriverResult<()> {
        let m = self.get_match(match_id).await?;
        if !m.is_host(actor_id) {
            return Err(DriverError::NotHost("delete the match"));
        }
        self.store.delete_match(match_id).await?;
        tracing::info!("Match {} deleted by {}", match_id, actor_id);
        Ok(())
    }

    /// Delete matches whose last write is older than the configured TTL
    pub async fn sweep_abandoned(&self, now: chrono::DateTime<chrono::Utc>) -> DriverResult<Vec<MatchId>> {
        if self.match_ttl.is_zero() {
            return Ok(Vec::new());
        }
        let ttl = chrono::Duration::from_std(self.match_ttl)
            .unwrap_or_else(|_| chrono::Duration::MAX);

        let mut removed = Vec::new();
        for m in self.store.list_matches().await? {
            let Ok(updated) = chrono::DateTime::parse_from_rfc3339(&m.updated_at) else {
                tracing::warn!("Match {} has unparseable updated_at {:?}", m.id, m.updated_at);
                continue;
            };
            if now.signed_duration_since(updated) <= ttl {
                continue;
            }
            match self.store.delete_match(&m.id).await {
                Ok(()) => {
                    tracing::info!("Swept abandoned match {} ({:?})", m.id, m.room_status);
                    removed.push(m.id);
                }
                // Deleted concurrently by its creator
                Err(StoreError::MatchNotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}
