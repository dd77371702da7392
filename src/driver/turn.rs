//! Match start, answer collection, turn resolution and the end of a match

use serde::{Deserialize, Serialize};

use super::{deadline_after, DriverError, DriverResult, Edit, MatchDriver};
use crate::engine::{check_consensus, resolve, Outcome, Resolution};
use crate::feedback::FeedbackRequest;
use crate::questions::{split_into_decks, QuestionRequest};
use crate::types::*;

/// What happened to a submitted answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Stored; the team has not agreed yet
    Recorded { answered: usize, roster: usize },
    /// The team agreed and the turn moved on
    Resolved {
        outcome: Outcome,
        awarded_to: Option<TeamId>,
        finished: bool,
    },
}

impl From<&Resolution> for SubmitOutcome {
    fn from(r: &Resolution) -> Self {
        SubmitOutcome::Resolved {
            outcome: r.outcome,
            awarded_to: r.awarded_to,
            finished: r.finished,
        }
    }
}

fn teams_complete(m: &Match, participants: &[Participant]) -> bool {
    !m.teams.is_empty()
        && m.teams
            .iter()
            .all(|team| !roster(participants, *team).is_empty())
}

/// Drop bag entries from anyone no longer on the active team
fn prune_bag(m: &mut Match, active_roster: &[ParticipantId]) -> bool {
    let before = m.current_answers.len();
    m.current_answers
        .retain(|participant, _| active_roster.contains(participant));
    m.current_answers.len() != before
}

/// Resolve the current turn with `answer` and write the result into `m`
fn current_kind(m: &Match) -> QuestionKind {
    m.current_question
        .as_ref()
        .map(|active| active.question.kind)
        .unwrap_or_default()
}

fn resolve_into(m: &mut Match, answer: &SubmittedAnswer) -> DriverResult<Resolution> {
    let resolution = resolve(m, answer).inspect_err(|e| {
        tracing::error!("Turn resolution failed for match {}: {}", m.id, e);
    })?;
    let deadline = (!resolution.finished).then(|| deadline_after(m.time_per_question));
    resolution.clone().apply(m, deadline);
    Ok(resolution)
}

impl MatchDriver {
    /// Start the match: fetch questions, deal decks, and put the first team on the clock
    pub async fn start(&self, actor_id: &str, match_id: &str) -> DriverResult<Match> {
        let m = self.get_match(match_id).await?;
        if !m.is_host(actor_id) {
            return Err(DriverError::NotHost("start the match"));
        }
        if m.room_status != MatchPhase::Lobby {
            return Err(DriverError::InvalidPhase(m.room_status));
        }
        let participants = self.participants(match_id).await?;
        if !teams_complete(&m, &participants) {
            return Err(DriverError::TeamsIncomplete);
        }

        let team_count = m.teams.len();
        let wanted = m.questions_per_team as usize * team_count;
        let pool = self
            .questions
            .fetch(QuestionRequest {
                count: wanted,
                filter: m.question_filter.clone(),
            })
            .await
            .map_err(|e| {
                tracing::error!("Question source failed for match {}: {}", match_id, e);
                DriverError::QuestionSource(e.to_string())
            })?;

        // A short pool shrinks the match rather than failing it
        let per_team = (pool.len() / team_count).min(m.questions_per_team as usize);
        if per_team == 0 {
            return Err(DriverError::InsufficientQuestions {
                got: pool.len(),
                need: team_count,
            });
        }
        if per_team < m.questions_per_team as usize {
            tracing::warn!(
                "Match {} got {} of {} questions; playing {} per team",
                match_id,
                pool.len(),
                wanted,
                per_team
            );
        }
        let decks = split_into_decks(pool, &m.teams, per_team);

        let (saved, ()) = self
            .update_with_retry(match_id, |m, participants| {
                if m.room_status != MatchPhase::Lobby {
                    return Err(DriverError::InvalidPhase(m.room_status));
                }
                if !teams_complete(m, participants) {
                    return Err(DriverError::TeamsIncomplete);
                }
                let first = *m.teams.first().ok_or(DriverError::TeamsIncomplete)?;
                let opening = decks
                    .get(&first)
                    .and_then(|deck| deck.first())
                    .cloned()
                    .ok_or(DriverError::InsufficientQuestions { got: 0, need: team_count })?;

                m.team_questions = decks.clone();
                m.questions_per_team = per_team as u32;
                m.team_scores = m.teams.iter().map(|t| (*t, 0)).collect();
                m.room_status = MatchPhase::InProgress;
                m.current_turn_team_id = Some(first);
                m.current_question_index = 0;
                m.current_question = Some(ActiveQuestion {
                    question: opening,
                    owner_team_id: first,
                });
                m.current_answers.clear();
                m.turn_number += 1;
                m.turn_deadline = Some(deadline_after(m.time_per_question));
                Ok(Edit::Commit(()))
            })
            .await?;

        tracing::info!(
            "Match {} started with {} questions per team",
            saved.id,
            saved.questions_per_team
        );
        Ok(saved)
    }

    /// Record a participant's answer for the current turn. Resubmitting
    /// overwrites the earlier answer. Once the whole active team agrees,
    /// the turn is resolved in the same write.
    ///
    /// `PASS` is only ever forced by [`expire_turn`](Self::expire_turn).
    pub async fn submit_answer(
        &self,
        match_id: &str,
        user_id: &str,
        answer: SubmittedAnswer,
    ) -> DriverResult<SubmitOutcome> {
        if answer == SubmittedAnswer::Pass {
            return Err(DriverError::InvalidAnswer(
                "PASS is reserved for timed out turns".to_string(),
            ));
        }

        let participant = self
            .participant_for_user(match_id, user_id)
            .await?
            .ok_or(DriverError::NotParticipant)?;

        let (saved, outcome) = self
            .update_with_retry(match_id, |m, participants| {
                if m.room_status != MatchPhase::InProgress {
                    return Err(DriverError::InvalidPhase(m.room_status));
                }
                let active = m.current_turn_team_id.ok_or(DriverError::NotOnActiveTeam)?;
                let me = participants
                    .iter()
                    .find(|p| p.id == participant.id)
                    .ok_or(DriverError::NotParticipant)?;
                if me.team_id != Some(active) {
                    return Err(DriverError::NotOnActiveTeam);
                }

                let active_roster = roster(participants, active);
                m.current_answers.insert(me.id.clone(), answer.clone());
                prune_bag(m, &active_roster);

                let kind = current_kind(m);
                let consensus = check_consensus(&active_roster, &m.current_answers, kind);
                match consensus.value {
                    Some(agreed) if consensus.reached => {
                        let resolution = resolve_into(m, &agreed)?;
                        Ok(Edit::Commit(SubmitOutcome::from(&resolution)))
                    }
                    _ => Ok(Edit::Commit(SubmitOutcome::Recorded {
                        answered: m.current_answers.len(),
                        roster: active_roster.len(),
                    })),
                }
            })
            .await?;

        if let SubmitOutcome::Resolved { outcome, finished, .. } = &outcome {
            self.after_resolution(&saved, *outcome, *finished);
        }
        Ok(outcome)
    }

    /// Re-check the active team after its roster changed
    pub(crate) async fn settle_turn(&self, match_id: &str) -> DriverResult<Option<Outcome>> {
        let (saved, resolution) = self
            .update_with_retry(match_id, |m, participants| {
                let Some(active) = m.current_turn_team_id else {
                    return Ok(Edit::Unchanged(None));
                };
                if m.room_status != MatchPhase::InProgress {
                    return Ok(Edit::Unchanged(None));
                }

                let active_roster = roster(participants, active);
                let pruned = prune_bag(m, &active_roster);
                let kind = current_kind(m);
                let consensus = check_consensus(&active_roster, &m.current_answers, kind);
                match consensus.value {
                    Some(agreed) if consensus.reached => {
                        Ok(Edit::Commit(Some(resolve_into(m, &agreed)?)))
                    }
                    _ if pruned => Ok(Edit::Commit(None)),
                    _ => Ok(Edit::Unchanged(None)),
                }
            })
            .await?;

        Ok(resolution.map(|r| {
            self.after_resolution(&saved, r.outcome, r.finished);
            r.outcome
        }))
    }

    /// Resolve turn `turn_number` with a forced `PASS` if it is still current
    pub async fn expire_turn(&self, match_id: &str, turn_number: u64) -> DriverResult<Option<Outcome>> {
        let (saved, resolution) = self
            .update_with_retry(match_id, |m, _| {
                if m.room_status != MatchPhase::InProgress || m.turn_number != turn_number {
                    return Ok(Edit::Unchanged(None));
                }
                Ok(Edit::Commit(Some(resolve_into(m, &SubmittedAnswer::Pass)?)))
            })
            .await?;

        Ok(resolution.map(|r| {
            tracing::info!(
                "Turn {} of match {} timed out for team {}",
                turn_number,
                match_id,
                r.answering_team
            );
            self.after_resolution(&saved, r.outcome, r.finished);
            r.outcome
        }))
    }

    /// Expire every in-progress turn whose deadline is before `now`
    pub async fn expire_overdue(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> DriverResult<Vec<(MatchId, Outcome)>> {
        let mut expired = Vec::new();

        for m in self.store.list_matches().await? {
            if m.room_status != MatchPhase::InProgress {
                continue;
            }
            let Some(deadline) = m
                .turn_deadline
                .as_deref()
                .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
            else {
                continue;
            };
            if deadline > now {
                continue;
            }

            match self.expire_turn(&m.id, m.turn_number).await {
                Ok(Some(outcome)) => expired.push((m.id, outcome)),
                Ok(None) => {}
                // One broken match must not stall the others
                Err(e) => tracing::error!("Failed to expire turn in match {}: {}", m.id, e),
            }
        }
        Ok(expired)
    }

    fn after_resolution(&self, saved: &Match, outcome: Outcome, finished: bool) {
        tracing::info!(
            "Match {} turn resolved: {:?}, scores {:?}",
            saved.id,
            outcome,
            saved.team_scores
        );
        if finished {
            tracing::info!("Match {} finished", saved.id);
            self.spawn_feedback(saved.id.clone());
        }
    }

    /// Request feedback in the background; the match is already finished without it
    fn spawn_feedback(&self, match_id: MatchId) {
        let driver = self.clone();
        tokio::spawn(async move {
            if let Err(e) = driver.attach_feedback(&match_id).await {
                tracing::error!("Failed to attach feedback to match {}: {}", match_id, e);
            }
        });
    }

    /// Generate and store feedback for a finished match. Generation failures
    /// store the fallback payload. Feedback is written at most once.
    pub async fn attach_feedback(&self, match_id: &str) -> DriverResult<Feedback> {
        let m = self.get_match(match_id).await?;
        if let Some(existing) = m.feedback {
            return Ok(existing);
        }
        if m.room_status != MatchPhase::Finished {
            return Err(DriverError::InvalidPhase(m.room_status));
        }

        let feedback = match self.feedback.generate(FeedbackRequest::from_match(&m)).await {
            Ok(feedback) => feedback,
            Err(e) => {
                tracing::warn!("Feedback generation failed for match {}: {}", match_id, e);
                Feedback::fallback()
            }
        };

        let (_, stored) = self
            .update_with_retry(match_id, |m, _| {
                if let Some(existing) = &m.feedback {
                    return Ok(Edit::Unchanged(existing.clone()));
                }
                m.feedback = Some(feedback.clone());
                Ok(Edit::Commit(feedback.clone()))
            })
            .await?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{driver, driver_with, settings, started_match, FixedFeedback};
    use super::*;
    use crate::store::{MatchEvent, MatchStore};
    use std::sync::Arc;
    use std::time::Duration;

    const RIGHT: SubmittedAnswer = SubmittedAnswer::Index(0);
    const WRONG: SubmittedAnswer = SubmittedAnswer::Index(1);

    fn active_question(m: &Match) -> &ActiveQuestion {
        m.current_question.as_ref().expect("active question")
    }

    /// Every member of `team` submits `answer`; returns the last outcome
    async fn team_answers(driver: &MatchDriver, m: &Match, team: &[String], answer: &SubmittedAnswer) -> SubmitOutcome {
        let mut last = None;
        for user in team {
            last = Some(driver.submit_answer(&m.id, user, answer.clone()).await.unwrap());
        }
        last.expect("team has members")
    }

    #[tokio::test]
    async fn test_start_requires_host_and_full_teams() {
        let driver = driver(20);
        let m = driver.create_match("host", settings(5)).await.unwrap();

        assert!(matches!(
            driver.start("someone", &m.id).await,
            Err(DriverError::NotHost(_))
        ));
        assert!(matches!(
            driver.start("host", &m.id).await,
            Err(DriverError::TeamsIncomplete)
        ));
    }

    #[tokio::test]
    async fn test_start_deals_decks_and_seeds_first_question() {
        let driver = driver(20);
        let (m, _, _) = started_match(&driver, 5, 1).await;

        assert_eq!(m.room_status, MatchPhase::InProgress);
        assert_eq!(m.current_turn_team_id, Some(1));
        assert_eq!(m.current_question_index, 0);
        assert_eq!(m.team_questions[&1].len(), 5);
        assert_eq!(m.team_questions[&2].len(), 5);
        assert!(m.turn_deadline.is_some());

        let active = active_question(&m);
        assert_eq!(active.owner_team_id, 1);
        assert_eq!(active.question.id, m.team_questions[&1][0].id);
    }

    #[tokio::test]
    async fn test_short_pool_shrinks_match() {
        let driver = driver(6);
        let (m, _, _) = started_match(&driver, 10, 1).await;
        assert_eq!(m.questions_per_team, 3);
    }

    #[tokio::test]
    async fn test_empty_pool_refuses_to_start() {
        let driver = driver(1);
        let m = driver.create_match("host", settings(5)).await.unwrap();
        for (user, team) in [("a", 1u8), ("b", 2)] {
            let (_, p) = driver.join(&m.join_code, user, None).await.unwrap();
            driver.assign_team("host", &m.id, &p.id, Some(team)).await.unwrap();
        }
        assert!(matches!(
            driver.start("host", &m.id).await,
            Err(DriverError::InsufficientQuestions { got: 1, need: 2 })
        ));
        assert_eq!(driver.get_match(&m.id).await.unwrap().room_status, MatchPhase::Lobby);
    }

    #[tokio::test]
    async fn test_only_active_team_may_answer() {
        let driver = driver(20);
        let (m, _, team2) = started_match(&driver, 5, 1).await;

        let result = driver.submit_answer(&m.id, &team2[0], RIGHT).await;
        assert!(matches!(result, Err(DriverError::NotOnActiveTeam)));

        let result = driver.submit_answer(&m.id, "stranger", RIGHT).await;
        assert!(matches!(result, Err(DriverError::NotParticipant)));
    }

    #[tokio::test]
    async fn test_consensus_required_before_resolving() {
        let driver = driver(20);
        let (m, team1, _) = started_match(&driver, 5, 2).await;

        let first = driver.submit_answer(&m.id, &team1[0], RIGHT).await.unwrap();
        assert_eq!(first, SubmitOutcome::Recorded { answered: 1, roster: 2 });

        // Disagreement keeps the turn open
        let second = driver.submit_answer(&m.id, &team1[1], WRONG).await.unwrap();
        assert_eq!(second, SubmitOutcome::Recorded { answered: 2, roster: 2 });
        assert_eq!(driver.get_match(&m.id).await.unwrap().current_turn_team_id, Some(1));

        // Resubmission overwrites and settles it
        let third = driver.submit_answer(&m.id, &team1[1], RIGHT).await.unwrap();
        assert_eq!(
            third,
            SubmitOutcome::Resolved {
                outcome: Outcome::Answered,
                awarded_to: Some(1),
                finished: false,
            }
        );

        let after = driver.get_match(&m.id).await.unwrap();
        assert_eq!(after.current_turn_team_id, Some(2));
        assert!(after.current_answers.is_empty());
        assert_eq!(after.score(1), 1);
    }

    fn free_text_driver() -> MatchDriver {
        let questions = (0..4)
            .map(|i| Question {
                id: format!("f{}", i),
                kind: QuestionKind::FreeText,
                prompt: "Six times seven?".to_string(),
                answer: Some(CanonicalAnswer::Text("42".into())),
                ..Default::default()
            })
            .collect();
        MatchDriver::new(
            Arc::new(crate::store::MemoryStore::new()),
            Arc::new(crate::questions::QuestionBank::new(questions)),
            Arc::new(crate::feedback::NoFeedback),
        )
    }

    #[tokio::test]
    async fn test_free_text_number_and_string_reach_consensus() {
        let driver = free_text_driver();
        let (m, team1, _) = started_match(&driver, 2, 2).await;

        let first = driver
            .submit_answer(&m.id, &team1[0], SubmittedAnswer::Index(42))
            .await
            .unwrap();
        assert_eq!(first, SubmitOutcome::Recorded { answered: 1, roster: 2 });

        let second = driver
            .submit_answer(&m.id, &team1[1], SubmittedAnswer::Text(" 42 ".into()))
            .await
            .unwrap();
        assert_eq!(
            second,
            SubmitOutcome::Resolved {
                outcome: Outcome::Answered,
                awarded_to: Some(1),
                finished: false,
            }
        );
        assert_eq!(driver.get_match(&m.id).await.unwrap().score(1), 1);
    }

    #[tokio::test]
    async fn test_clients_cannot_submit_pass() {
        let driver = driver(20);
        let (m, team1, _) = started_match(&driver, 5, 1).await;
        let before = driver.get_match(&m.id).await.unwrap();

        let result = driver.submit_answer(&m.id, &team1[0], SubmittedAnswer::Pass).await;
        assert!(matches!(result, Err(DriverError::InvalidAnswer(_))));
        assert_eq!(result.unwrap_err().code(), "INVALID_ANSWER");

        let after = driver.get_match(&m.id).await.unwrap();
        assert_eq!(after.version, before.version);
        assert_eq!(after.current_turn_team_id, Some(1));
        assert!(after.current_answers.is_empty());
    }

    #[tokio::test]
    async fn test_miss_then_steal() {
        let driver = driver(20);
        let (m, team1, team2) = started_match(&driver, 5, 1).await;
        let owned = active_question(&m).clone();

        team_answers(&driver, &m, &team1, &WRONG).await;
        let steal = driver.get_match(&m.id).await.unwrap();
        assert_eq!(steal.current_turn_team_id, Some(2));
        assert_eq!(active_question(&steal), &owned);
        assert!(steal.is_steal());

        let outcome = team_answers(&driver, &m, &team2, &RIGHT).await;
        assert!(matches!(outcome, SubmitOutcome::Resolved { outcome: Outcome::Stolen, .. }));

        let after = driver.get_match(&m.id).await.unwrap();
        assert_eq!(after.score(2), 1);
        assert_eq!(after.current_turn_team_id, Some(2));
        assert_eq!(after.current_question_index, 1);
        assert_eq!(active_question(&after).question.id, after.team_questions[&2][1].id);
    }

    #[tokio::test]
    async fn test_timeout_passes_turn() {
        let driver = driver(20);
        let (m, _, _) = started_match(&driver, 5, 1).await;

        let outcome = driver.expire_turn(&m.id, m.turn_number).await.unwrap();
        assert_eq!(outcome, Some(Outcome::Missed));

        // The same turn cannot expire twice
        let again = driver.expire_turn(&m.id, m.turn_number).await.unwrap();
        assert_eq!(again, None);

        let after = driver.get_match(&m.id).await.unwrap();
        assert_eq!(after.current_turn_team_id, Some(2));
        assert_eq!(after.turn_number, m.turn_number + 1);
    }

    #[tokio::test]
    async fn test_expire_overdue_only_touches_late_turns() {
        let driver = driver(20);
        let (m, _, _) = started_match(&driver, 5, 1).await;

        let expired = driver.expire_overdue(chrono::Utc::now()).await.unwrap();
        assert!(expired.is_empty());

        let later = chrono::Utc::now() + chrono::Duration::seconds(31);
        let expired = driver.expire_overdue(later).await.unwrap();
        assert_eq!(expired, vec![(m.id.clone(), Outcome::Missed)]);
    }

    #[tokio::test]
    async fn test_leaving_member_unblocks_consensus() {
        let driver = driver(20);
        let (m, team1, _) = started_match(&driver, 5, 2).await;

        driver.submit_answer(&m.id, &team1[0], RIGHT).await.unwrap();
        driver.leave(&m.id, &team1[1]).await.unwrap();

        let after = driver.get_match(&m.id).await.unwrap();
        assert_eq!(after.current_turn_team_id, Some(2));
        assert_eq!(after.score(1), 1);
    }

    #[tokio::test]
    async fn test_full_match_finishes_and_gets_feedback() {
        let driver = driver_with(20, Arc::new(FixedFeedback));
        let (m, team1, team2) = started_match(&driver, 2, 1).await;
        let mut sub = driver.subscribe(&m.id);

        for _ in 0..2 {
            team_answers(&driver, &m, &team1, &RIGHT).await;
            team_answers(&driver, &m, &team2, &RIGHT).await;
        }

        let done = driver.get_match(&m.id).await.unwrap();
        assert_eq!(done.room_status, MatchPhase::Finished);
        assert_eq!(done.current_question_index, 2);
        assert_eq!(done.score(1), 2);
        assert_eq!(done.score(2), 2);

        let late = driver.submit_answer(&m.id, &team1[0], RIGHT).await;
        assert!(matches!(late, Err(DriverError::InvalidPhase(MatchPhase::Finished))));

        // The background task commits feedback without blocking the finish
        let feedback = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match sub.recv().await {
                    Some(MatchEvent::Updated(m)) if m.feedback.is_some() => break m.feedback.clone(),
                    Some(_) => continue,
                    None => break None,
                }
            }
        })
        .await
        .expect("feedback should be committed");
        assert_eq!(feedback.map(|f| f.summary), Some("Well played".to_string()));
    }

    #[tokio::test]
    async fn test_failed_feedback_uses_fallback_once() {
        let driver = driver(20);
        let (m, _, _) = started_match(&driver, 1, 1).await;

        // Two timeouts (miss, failed steal) end a one-question match
        let m1 = driver.get_match(&m.id).await.unwrap();
        driver.expire_turn(&m.id, m1.turn_number).await.unwrap();
        let m2 = driver.get_match(&m.id).await.unwrap();
        driver.expire_turn(&m.id, m2.turn_number).await.unwrap();
        assert_eq!(
            driver.get_match(&m.id).await.unwrap().room_status,
            MatchPhase::Finished
        );

        let first = driver.attach_feedback(&m.id).await.unwrap();
        let second = driver.attach_feedback(&m.id).await.unwrap();
        assert_eq!(first, Feedback::fallback());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_feedback_refused_before_finish() {
        let driver = driver(20);
        let (m, _, _) = started_match(&driver, 2, 1).await;
        assert!(matches!(
            driver.attach_feedback(&m.id).await,
            Err(DriverError::InvalidPhase(MatchPhase::InProgress))
        ));
    }

    #[tokio::test]
    async fn test_malformed_question_leaves_state_unchanged() {
        let driver = driver(20);
        let (m, team1, _) = started_match(&driver, 2, 1).await;

        let mut broken = driver.get_match(&m.id).await.unwrap();
        if let Some(active) = broken.current_question.as_mut() {
            active.question.answer = None;
        }
        let version = broken.version;
        let broken = driver.store().update_match(broken, version).await.unwrap();

        let result = driver.submit_answer(&m.id, &team1[0], RIGHT).await;
        assert!(matches!(result, Err(DriverError::Engine(_))));

        let after = driver.get_match(&m.id).await.unwrap();
        assert_eq!(after.version, broken.version);
        assert!(after.current_answers.is_empty());
    }
}
