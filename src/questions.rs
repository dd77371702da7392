//! Question sources
//!
//! A match pulls its pool from either a stored question bank (optionally
//! filtered by year/event) or, when document context is supplied, from an
//! LLM asked to write questions about that document.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::llm::{extract_json, GenerateRequest, LlmError, LlmManager};
use crate::types::{Question, QuestionFilter, TeamId};

#[derive(Debug, thiserror::Error)]
pub enum QuestionError {
    #[error("failed to read question bank: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid question data: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("question generation failed: {0}")]
    Llm(#[from] LlmError),

    #[error("no question source available: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone)]
pub struct QuestionRequest {
    pub count: usize,
    pub filter: QuestionFilter,
}

#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn fetch(&self, request: QuestionRequest) -> Result<Vec<Question>, QuestionError>;
}

/// Give every question without an id a fresh one
fn ensure_ids(questions: &mut [Question]) {
    for q in questions.iter_mut().filter(|q| q.id.trim().is_empty()) {
        q.id = ulid::Ulid::new().to_string();
    }
}

/// Split a pool into per-team decks of `per_team` questions each, in turn order
pub fn split_into_decks(
    pool: Vec<Question>,
    teams: &[TeamId],
    per_team: usize,
) -> BTreeMap<TeamId, Vec<Question>> {
    let mut pool = pool.into_iter();
    teams
        .iter()
        .map(|team| (*team, pool.by_ref().take(per_team).collect()))
        .collect()
}

// =========================================================================
// Question bank
// =========================================================================

/// A fixed set of questions loaded from JSON
#[derive(Debug, Clone, Default)]
pub struct QuestionBank {
    questions: Vec<Question>,
}

impl QuestionBank {
    pub fn new(mut questions: Vec<Question>) -> Self {
        ensure_ids(&mut questions);
        Self { questions }
    }

    /// Load a bank from a JSON array of questions
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, QuestionError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let questions: Vec<Question> = serde_json::from_str(&raw)?;
        tracing::info!(
            "Loaded {} questions from {}",
            questions.len(),
            path.as_ref().display()
        );
        Ok(Self::new(questions))
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    fn matching(&self, filter: &QuestionFilter) -> Vec<Question> {
        self.questions
            .iter()
            .filter(|q| filter.year.is_none_or(|year| q.year == Some(year)))
            .filter(|q| match &filter.event {
                Some(event) => q
                    .event
                    .as_deref()
                    .is_some_and(|e| e.eq_ignore_ascii_case(event)),
                None => true,
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QuestionSource for QuestionBank {
    async fn fetch(&self, request: QuestionRequest) -> Result<Vec<Question>, QuestionError> {
        let mut questions = self.matching(&request.filter);
        questions.shuffle(&mut rand::rng());
        questions.truncate(request.count);
        Ok(questions)
    }
}

// =========================================================================
// LLM generator
// =========================================================================

const GENERATION_SYSTEM_PROMPT: &str = r#"You write quiz questions for team competitions.

Reply with a JSON array only. Each element has:
- "kind": "single_choice", "multi_choice" or "free_text"
- "prompt": the question
- "options": 4 answer options (empty array for free_text)
- "answer": option index for single_choice, array of option indices for multi_choice, answer string for free_text
- "explanation": one or two sentences explaining the answer

Base every question strictly on the supplied document."#;

/// Generates questions from document context with an LLM
pub struct LlmQuestionGenerator {
    llm: Arc<LlmManager>,
    timeout: Duration,
    max_tokens: u32,
}

impl LlmQuestionGenerator {
    pub fn new(llm: Arc<LlmManager>, timeout: Duration, max_tokens: u32) -> Self {
        Self {
            llm,
            timeout,
            max_tokens,
        }
    }
}

fn generation_prompt(count: usize, context: &str) -> String {
    format!(
        "Write {} questions about the following document.\n\nDocument:\n{}",
        count, context
    )
}

/// Parse the model's JSON array, dropping entries without a canonical answer
fn parse_generated(text: &str) -> Result<Vec<Question>, QuestionError> {
    let mut questions: Vec<Question> = serde_json::from_str(extract_json(text)?)?;
    let before = questions.len();
    questions.retain(|q| q.answer.is_some());
    if questions.len() < before {
        tracing::warn!(
            "Dropped {} generated questions without an answer",
            before - questions.len()
        );
    }
    ensure_ids(&mut questions);
    Ok(questions)
}

#[async_trait]
impl QuestionSource for LlmQuestionGenerator {
    async fn fetch(&self, request: QuestionRequest) -> Result<Vec<Question>, QuestionError> {
        let context = request.filter.context.as_deref().ok_or_else(|| {
            QuestionError::Unavailable("question generation needs document context".to_string())
        })?;

        let (provider, response) = self
            .llm
            .generate_first(GenerateRequest {
                prompt: generation_prompt(request.count, context),
                system: Some(GENERATION_SYSTEM_PROMPT.to_string()),
                max_tokens: Some(self.max_tokens),
                timeout: self.timeout,
                model_override: None,
            })
            .await?;

        let mut questions = parse_generated(&response.text)?;
        questions.truncate(request.count);
        tracing::info!("Generated {} questions via {}", questions.len(), provider);
        Ok(questions)
    }
}

// =========================================================================
// Routing
// =========================================================================

/// Picks the generator when the request carries document context, the bank otherwise
#[derive(Default)]
pub struct QuestionRouter {
    bank: Option<QuestionBank>,
    generator: Option<LlmQuestionGenerator>,
}

impl QuestionRouter {
    pub fn new(bank: Option<QuestionBank>, generator: Option<LlmQuestionGenerator>) -> Self {
        Self { bank, generator }
    }
}

#[async_trait]
impl QuestionSource for QuestionRouter {
    async fn fetch(&self, request: QuestionRequest) -> Result<Vec<Question>, QuestionError> {
        match (&request.filter.context, &self.generator, &self.bank) {
            (Some(_), Some(generator), _) => generator.fetch(request).await,
            (_, _, Some(bank)) => bank.fetch(request).await,
            (Some(_), None, None) => Err(QuestionError::Unavailable(
                "no LLM provider configured for generated questions".to_string(),
            )),
            (None, _, None) => Err(QuestionError::Unavailable(
                "no question bank configured".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::tests::CannedProvider;
    use crate::types::{AnswerMode, CanonicalAnswer, QuestionKind};
    use std::io::Write;

    fn question(id: &str, year: Option<u16>, event: Option<&str>) -> Question {
        Question {
            id: id.to_string(),
            kind: QuestionKind::SingleChoice,
            prompt: format!("Question {}", id),
            options: vec!["a".into(), "b".into()],
            answer: Some(CanonicalAnswer::Index(0)),
            explanation: String::new(),
            image_url: None,
            answer_mode: AnswerMode::Exact,
            year,
            event: event.map(str::to_string),
        }
    }

    fn request(count: usize, filter: QuestionFilter) -> QuestionRequest {
        QuestionRequest { count, filter }
    }

    #[tokio::test]
    async fn test_bank_filters_by_year_and_event() {
        let bank = QuestionBank::new(vec![
            question("a", Some(2023), Some("Regionals")),
            question("b", Some(2024), Some("Regionals")),
            question("c", Some(2024), Some("Nationals")),
        ]);

        let filter = QuestionFilter {
            year: Some(2024),
            event: Some("regionals".to_string()),
            context: None,
        };
        let result = bank.fetch(request(10, filter)).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "b");
    }

    #[tokio::test]
    async fn test_bank_limits_count() {
        let bank = QuestionBank::new((0..10).map(|i| question(&i.to_string(), None, None)).collect());
        let result = bank.fetch(request(4, QuestionFilter::default())).await.unwrap();
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn test_bank_from_path_assigns_missing_ids() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"kind": "free_text", "prompt": "Capital of France?", "answer": "Paris"}}]"#
        )
        .unwrap();

        let bank = QuestionBank::from_path(file.path()).unwrap();
        assert_eq!(bank.len(), 1);
        assert!(!bank.questions[0].id.is_empty());
    }

    #[test]
    fn test_bank_from_path_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            QuestionBank::from_path(file.path()),
            Err(QuestionError::Parse(_))
        ));
    }

    #[test]
    fn test_split_into_decks() {
        let pool: Vec<Question> = (0..7).map(|i| question(&i.to_string(), None, None)).collect();
        let decks = split_into_decks(pool, &[1, 2], 3);

        let ids = |team: TeamId| -> Vec<String> { decks[&team].iter().map(|q| q.id.clone()).collect() };
        assert_eq!(ids(1), vec!["0", "1", "2"]);
        assert_eq!(ids(2), vec!["3", "4", "5"]);
    }

    #[test]
    fn test_parse_generated_drops_unanswered() {
        let text = r#"```json
[
  {"kind": "single_choice", "prompt": "Q1", "options": ["a", "b"], "answer": 1},
  {"kind": "free_text", "prompt": "Q2"}
]
```"#;
        let questions = parse_generated(text).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].answer, Some(CanonicalAnswer::Index(1)));
        assert!(!questions[0].id.is_empty());
    }

    #[tokio::test]
    async fn test_generator_uses_llm_reply() {
        let reply = r#"[{"kind": "multi_choice", "prompt": "Pick", "options": ["a","b","c"], "answer": [0, 2]}]"#;
        let llm = Arc::new(LlmManager::new(vec![Box::new(CannedProvider::replying(
            "canned", reply,
        ))]));
        let generator = LlmQuestionGenerator::new(llm, Duration::from_secs(1), 500);

        let filter = QuestionFilter {
            context: Some("A document".to_string()),
            ..QuestionFilter::default()
        };
        let questions = generator.fetch(request(5, filter)).await.unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].kind, QuestionKind::MultiChoice);
    }

    #[tokio::test]
    async fn test_router_requires_a_source() {
        let router = QuestionRouter::default();
        let result = router.fetch(request(1, QuestionFilter::default())).await;
        assert!(matches!(result, Err(QuestionError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_router_prefers_bank_without_context() {
        let router = QuestionRouter::new(
            Some(QuestionBank::new(vec![question("a", None, None)])),
            None,
        );
        let result = router.fetch(request(1, QuestionFilter::default())).await.unwrap();
        assert_eq!(result[0].id, "a");
    }
}
