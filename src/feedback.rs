//! Post-match feedback generation

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::{extract_json, GenerateRequest, LlmError, LlmManager};
use crate::types::{Feedback, Match, Question, TeamId};

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("feedback generation failed: {0}")]
    Llm(#[from] LlmError),

    #[error("feedback response was not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("feedback generation unavailable")]
    Unavailable,
}

/// Everything the generator sees about a finished match
#[derive(Debug, Clone)]
pub struct FeedbackRequest {
    pub teams: Vec<TeamId>,
    pub scores: BTreeMap<TeamId, u32>,
    pub decks: BTreeMap<TeamId, Vec<Question>>,
}

impl FeedbackRequest {
    pub fn from_match(m: &Match) -> Self {
        Self {
            teams: m.teams.clone(),
            scores: m.team_scores.clone(),
            decks: m.team_questions.clone(),
        }
    }
}

#[async_trait]
pub trait FeedbackGenerator: Send + Sync {
    async fn generate(&self, request: FeedbackRequest) -> Result<Feedback, FeedbackError>;
}

/// Used when no LLM is configured; the driver commits the fallback payload
pub struct NoFeedback;

#[async_trait]
impl FeedbackGenerator for NoFeedback {
    async fn generate(&self, _request: FeedbackRequest) -> Result<Feedback, FeedbackError> {
        Err(FeedbackError::Unavailable)
    }
}

const FEEDBACK_SYSTEM_PROMPT: &str = r#"You are a quiz coach reviewing a finished team match.

Reply with a single JSON object only:
{"summary": string, "strengths": [string], "weak_points": [string], "detailed_analysis": string}

Keep the summary to two sentences. Name topics, not question numbers."#;

pub struct LlmFeedbackGenerator {
    llm: Arc<LlmManager>,
    timeout: Duration,
    max_tokens: u32,
}

impl LlmFeedbackGenerator {
    pub fn new(llm: Arc<LlmManager>, timeout: Duration, max_tokens: u32) -> Self {
        Self {
            llm,
            timeout,
            max_tokens,
        }
    }
}

fn feedback_prompt(request: &FeedbackRequest) -> String {
    let mut prompt = String::from("Final scores:\n");
    for team in &request.teams {
        let score = request.scores.get(team).copied().unwrap_or(0);
        let _ = writeln!(prompt, "- Team {}: {}", team, score);
    }

    for team in &request.teams {
        let _ = writeln!(prompt, "\nTeam {} questions:", team);
        for q in request.decks.get(team).into_iter().flatten() {
            let _ = writeln!(prompt, "- {}", q.prompt);
            if !q.explanation.is_empty() {
                let _ = writeln!(prompt, "  ({})", q.explanation);
            }
        }
    }
    prompt
}

fn parse_feedback(text: &str) -> Result<Feedback, FeedbackError> {
    Ok(serde_json::from_str(extract_json(text)?)?)
}

#[async_trait]
impl FeedbackGenerator for LlmFeedbackGenerator {
    async fn generate(&self, request: FeedbackRequest) -> Result<Feedback, FeedbackError> {
        let (provider, response) = self
            .llm
            .generate_first(GenerateRequest {
                prompt: feedback_prompt(&request),
                system: Some(FEEDBACK_SYSTEM_PROMPT.to_string()),
                max_tokens: Some(self.max_tokens),
                timeout: self.timeout,
                model_override: None,
            })
            .await?;

        let feedback = parse_feedback(&response.text)?;
        tracing::info!("Generated match feedback via {}", provider);
        Ok(feedback)
    }
}
