use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use super::{MatchEvent, MatchStore, MatchSubscription, StoreError, StoreResult};
use crate::types::*;

/// In-process store with a broadcast change feed
#[derive(Clone)]
pub struct MemoryStore {
    matches: Arc<RwLock<HashMap<MatchId, Match>>>,
    participants: Arc<RwLock<HashMap<ParticipantId, Participant>>>,
    events: broadcast::Sender<MatchEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            matches: Arc::new(RwLock::new(HashMap::new())),
            participants: Arc::new(RwLock::new(HashMap::new())),
            events: tx,
        }
    }

    fn publish(&self, event: MatchEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn insert_match(&self, m: Match) -> StoreResult<Match> {
        let mut matches = self.matches.write().await;
        if matches.values().any(|existing| existing.join_code == m.join_code) {
            return Err(StoreError::DuplicateJoinCode(m.join_code));
        }
        matches.insert(m.id.clone(), m.clone());
        drop(matches);

        self.publish(MatchEvent::Updated(Box::new(m.clone())));
        Ok(m)
    }

    async fn get_match(&self, id: &str) -> StoreResult<Option<Match>> {
        Ok(self.matches.read().await.get(id).cloned())
    }

    async fn find_by_join_code(&self, join_code: &str) -> StoreResult<Option<Match>> {
        Ok(self
            .matches
            .read()
            .await
            .values()
            .find(|m| m.join_code.eq_ignore_ascii_case(join_code))
            .cloned())
    }

    async fn list_matches(&self) -> StoreResult<Vec<Match>> {
        Ok(self.matches.read().await.values().cloned().collect())
    }

    async fn update_match(&self, mut m: Match, expected_version: u64) -> StoreResult<Match> {
        let mut matches = self.matches.write().await;
        let stored = matches
            .get(&m.id)
            .ok_or_else(|| StoreError::MatchNotFound(m.id.clone()))?;

        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: m.id.clone(),
                expected: expected_version,
                actual: stored.version,
            });
        }

        m.version = expected_version + 1;
        m.updated_at = chrono::Utc::now().to_rfc3339();
        matches.insert(m.id.clone(), m.clone());
        drop(matches);

        self.publish(MatchEvent::Updated(Box::new(m.clone())));
        Ok(m)
    }

    async fn delete_match(&self, id: &str) -> StoreResult<()> {
        if self.matches.write().await.remove(id).is_none() {
            return Err(StoreError::MatchNotFound(id.to_string()));
        }
        self.participants
            .write()
            .await
            .retain(|_, p| p.match_id != id);

        self.publish(MatchEvent::Deleted(id.to_string()));
        Ok(())
    }

    async fn insert_participant(&self, p: Participant) -> StoreResult<Participant> {
        if !self.matches.read().await.contains_key(&p.match_id) {
            return Err(StoreError::MatchNotFound(p.match_id));
        }
        self.participants
            .write()
            .await
            .insert(p.id.clone(), p.clone());

        self.publish(MatchEvent::ParticipantsChanged(p.match_id.clone()));
        Ok(p)
    }

    async fn update_participant(&self, p: Participant) -> StoreResult<Participant> {
        let mut participants = self.participants.write().await;
        let slot = participants
            .get_mut(&p.id)
            .ok_or_else(|| StoreError::ParticipantNotFound(p.id.clone()))?;
        *slot = p.clone();
        drop(participants);

        self.publish(MatchEvent::ParticipantsChanged(p.match_id.clone()));
        Ok(p)
    }

    async fn update_participant_guarded(
        &self,
        p: Participant,
        expected_version: u64,
    ) -> StoreResult<Participant> {
        // Lock order: matches, then participants
        let mut matches = self.matches.write().await;
        let m = matches
            .get_mut(&p.match_id)
            .ok_or_else(|| StoreError::MatchNotFound(p.match_id.clone()))?;

        if m.version != expected_version {
            return Err(StoreError::VersionConflict {
                id: m.id.clone(),
                expected: expected_version,
                actual: m.version,
            });
        }

        let mut participants = self.participants.write().await;
        let slot = participants
            .get_mut(&p.id)
            .ok_or_else(|| StoreError::ParticipantNotFound(p.id.clone()))?;
        *slot = p.clone();
        drop(participants);

        m.version = expected_version + 1;
        m.updated_at = chrono::Utc::now().to_rfc3339();
        let saved = m.clone();
        drop(matches);

        self.publish(MatchEvent::Updated(Box::new(saved)));
        self.publish(MatchEvent::ParticipantsChanged(p.match_id.clone()));
        Ok(p)
    }

    async fn delete_participant(&self, id: &str) -> StoreResult<()> {
        let removed = self
            .participants
            .write()
            .await
            .remove(id)
            .ok_or_else(|| StoreError::ParticipantNotFound(id.to_string()))?;

        self.publish(MatchEvent::ParticipantsChanged(removed.match_id));
        Ok(())
    }

    async fn list_participants(&self, match_id: &str) -> StoreResult<Vec<Participant>> {
        let mut participants: Vec<Participant> = self
            .participants
            .read()
            .await
            .values()
            .filter(|p| p.match_id == match_id)
            .cloned()
            .collect();
        participants.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        Ok(participants)
    }

    fn subscribe(&self, match_id: &str) -> MatchSubscription {
        MatchSubscription::new(match_id.to_string(), self.events.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn new_match(id: &str, code: &str) -> Match {
        Match::new(
            id.to_string(),
            code.to_string(),
            "host".to_string(),
            MatchSettings::default(),
        )
    }

    fn participant(id: &str, match_id: &str) -> Participant {
        Participant {
            id: id.to_string(),
            match_id: match_id.to_string(),
            user_id: format!("user-{}", id),
            display_name: id.to_string(),
            team_id: None,
            joined_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = MemoryStore::new();
        let m = store.insert_match(new_match("m1", "AAAAA")).await.unwrap();

        let saved = store.update_match(m.clone(), m.version).await.unwrap();
        assert_eq!(saved.version, m.version + 1);
        assert_eq!(store.get_match("m1").await.unwrap().unwrap().version, saved.version);
    }

    #[tokio::test]
    async fn test_stale_update_is_rejected() {
        let store = MemoryStore::new();
        let m = store.insert_match(new_match("m1", "AAAAA")).await.unwrap();
        store.update_match(m.clone(), m.version).await.unwrap();

        let result = store.update_match(m.clone(), m.version).await;
        assert_eq!(
            result,
            Err(StoreError::VersionConflict {
                id: "m1".to_string(),
                expected: 1,
                actual: 2,
            })
        );
    }

    #[tokio::test]
    async fn test_guarded_participant_write_checks_match_version() {
        let store = MemoryStore::new();
        let m = store.insert_match(new_match("m1", "AAAAA")).await.unwrap();
        let p = store.insert_participant(participant("p1", "m1")).await.unwrap();

        // A match write lands between the read and the participant write
        let started = store.update_match(m.clone(), m.version).await.unwrap();

        let mut moved = p.clone();
        moved.team_id = Some(1);
        let stale = store.update_participant_guarded(moved.clone(), m.version).await;
        assert_eq!(
            stale,
            Err(StoreError::VersionConflict {
                id: "m1".to_string(),
                expected: m.version,
                actual: started.version,
            })
        );
        assert_eq!(store.list_participants("m1").await.unwrap()[0].team_id, None);

        // With the current version it goes through and bumps the match
        store
            .update_participant_guarded(moved, started.version)
            .await
            .unwrap();
        assert_eq!(store.list_participants("m1").await.unwrap()[0].team_id, Some(1));
        let after = store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(after.version, started.version + 1);

        // So a writer still holding the pre-assignment version loses
        let result = store.update_match(started.clone(), started.version).await;
        assert!(matches!(result, Err(StoreError::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn test_join_codes_are_unique_and_case_insensitive() {
        let store = MemoryStore::new();
        store.insert_match(new_match("m1", "ABCDE")).await.unwrap();

        let dup = store.insert_match(new_match("m2", "ABCDE")).await;
        assert!(matches!(dup, Err(StoreError::DuplicateJoinCode(_))));

        let found = store.find_by_join_code("abcde").await.unwrap();
        assert_eq!(found.map(|m| m.id), Some("m1".to_string()));
    }

    #[tokio::test]
    async fn test_delete_match_removes_participants() {
        let store = MemoryStore::new();
        store.insert_match(new_match("m1", "AAAAA")).await.unwrap();
        store.insert_participant(participant("p1", "m1")).await.unwrap();

        store.delete_match("m1").await.unwrap();
        assert!(store.get_match("m1").await.unwrap().is_none());
        assert!(store.list_participants("m1").await.unwrap().is_empty());
        assert!(store.delete_match("m1").await.is_err());
    }

    #[tokio::test]
    async fn test_participant_requires_match() {
        let store = MemoryStore::new();
        let result = store.insert_participant(participant("p1", "missing")).await;
        assert!(matches!(result, Err(StoreError::MatchNotFound(_))));
    }

    #[tokio::test]
    async fn test_subscription_only_sees_its_match() {
        let store = MemoryStore::new();
        let m1 = store.insert_match(new_match("m1", "AAAAA")).await.unwrap();
        let m2 = store.insert_match(new_match("m2", "BBBBB")).await.unwrap();

        let mut sub = store.subscribe("m1");
        store.update_match(m2.clone(), m2.version).await.unwrap();
        store.update_match(m1.clone(), m1.version).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event should arrive")
            .expect("feed open");
        match event {
            MatchEvent::Updated(m) => {
                assert_eq!(m.id, "m1");
                assert_eq!(m.version, 2);
            }
            other => panic!("Expected Updated, got {:?}", other),
        }
    }
}
