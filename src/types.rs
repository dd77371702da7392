use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Opaque ID types for type safety
pub type MatchId = String;
pub type ParticipantId = String;
pub type UserId = String;
pub type QuestionId = String;
/// Teams are small integers (1, 2, ...) so they can key JSON maps directly
pub type TeamId = u8;

/// Default turn order for a two-team match
pub const DEFAULT_TEAMS: [TeamId; 2] = [1, 2];

/// Sentinel submitted on a turn timeout
pub const PASS: &str = "PASS";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    #[default]
    SingleChoice,
    MultiChoice,
    FreeText,
}

/// How free-text answers are compared against the canonical answer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// Trimmed, case-insensitive string equality
    #[default]
    Exact,
    /// Exact, or within ±2% of a number, or inside a "min-max" range
    Numeric,
}

/// The canonical answer stored on a question. Its shape depends on the kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum CanonicalAnswer {
    Index(usize),
    Indices(Vec<usize>),
    Text(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Question {
    #[serde(default)]
    pub id: QuestionId,
    #[serde(default)]
    pub kind: QuestionKind,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
    /// Optional on the wire so a missing answer is detectable rather than defaulted
    #[serde(default)]
    pub answer: Option<CanonicalAnswer>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub answer_mode: AnswerMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

/// An answer as submitted by a participant (or forced by a timeout).
///
/// On the wire this is a bare JSON value: a number, an array of numbers,
/// a string, or the literal string `"PASS"`. `"PASS"` is reserved for
/// timeouts, so clients cannot submit it and a free-text question whose
/// answer is the word "pass" cannot be answered.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmittedAnswer {
    Index(usize),
    Indices(Vec<usize>),
    Text(String),
    Pass,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum AnswerRepr {
    Index(usize),
    Indices(Vec<usize>),
    Text(String),
}

impl Serialize for SubmittedAnswer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SubmittedAnswer::Index(i) => serializer.serialize_u64(*i as u64),
            SubmittedAnswer::Indices(v) => v.serialize(serializer),
            SubmittedAnswer::Text(t) => serializer.serialize_str(t),
            SubmittedAnswer::Pass => serializer.serialize_str(PASS),
        }
    }
}

impl<'de> Deserialize<'de> for SubmittedAnswer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match AnswerRepr::deserialize(deserializer)? {
            AnswerRepr::Index(i) => SubmittedAnswer::Index(i),
            AnswerRepr::Indices(v) => SubmittedAnswer::Indices(v),
            AnswerRepr::Text(t) if t == PASS => SubmittedAnswer::Pass,
            AnswerRepr::Text(t) => SubmittedAnswer::Text(t),
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    Lobby,
    InProgress,
    Finished,
}

/// The question currently on the table, tagged with the team whose deck it came from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveQuestion {
    #[serde(flatten)]
    pub question: Question,
    pub owner_team_id: TeamId,
}

/// Post-match feedback produced by the feedback generator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weak_points: Vec<String>,
    #[serde(default)]
    pub detailed_analysis: String,
}

impl Feedback {
    /// Placeholder committed when feedback generation fails
    pub fn fallback() -> Self {
        Self {
            summary: "Feedback could not be generated for this match.".to_string(),
            strengths: Vec::new(),
            weak_points: Vec::new(),
            detailed_analysis: "Review the questions and explanations above to see where each team gained and lost points.".to_string(),
        }
    }
}

/// Parameters handed to the question source when a match starts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QuestionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Document text for generated questions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchSettings {
    pub questions_per_team: u32,
    /// Seconds each team gets per question
    pub time_per_question: u32,
    #[serde(default)]
    pub question_filter: QuestionFilter,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            questions_per_team: 10,
            time_per_question: 30,
            question_filter: QuestionFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub id: MatchId,
    pub join_code: String,
    pub creator_id: UserId,
    /// Bumped by the store on every committed write
    pub version: u64,
    pub room_status: MatchPhase,
    /// Turn order
    pub teams: Vec<TeamId>,
    pub questions_per_team: u32,
    pub time_per_question: u32,
    #[serde(default)]
    pub question_filter: QuestionFilter,
    #[serde(default)]
    pub team_questions: BTreeMap<TeamId, Vec<Question>>,
    #[serde(default)]
    pub team_scores: BTreeMap<TeamId, u32>,
    pub current_turn_team_id: Option<TeamId>,
    pub current_question_index: u32,
    pub current_question: Option<ActiveQuestion>,
    #[serde(default)]
    pub current_answers: BTreeMap<ParticipantId, SubmittedAnswer>,
    /// Incremented on every turn resolution; identifies a turn for its timer
    pub turn_number: u64,
    pub turn_deadline: Option<String>, // ISO timestamp
    pub feedback: Option<Feedback>,
    pub created_at: String,
    pub updated_at: String,
}

impl Match {
    pub fn new(id: MatchId, join_code: String, creator_id: UserId, settings: MatchSettings) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        let teams = DEFAULT_TEAMS.to_vec();
        Self {
            id,
            join_code,
            creator_id,
            version: 1,
            room_status: MatchPhase::Lobby,
            team_scores: teams.iter().map(|t| (*t, 0)).collect(),
            teams,
            questions_per_team: settings.questions_per_team,
            time_per_question: settings.time_per_question,
            question_filter: settings.question_filter,
            team_questions: BTreeMap::new(),
            current_turn_team_id: None,
            current_question_index: 0,
            current_question: None,
            current_answers: BTreeMap::new(),
            turn_number: 0,
            turn_deadline: None,
            feedback: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn is_host(&self, user_id: &str) -> bool {
        self.creator_id == user_id
    }

    /// True while a non-owning team is attempting to steal the current question
    pub fn is_steal(&self) -> bool {
        match (self.current_turn_team_id, &self.current_question) {
            (Some(active), Some(q)) => active != q.owner_team_id,
            _ => false,
        }
    }

    /// The team that follows `team` in turn order (wrapping around)
    pub fn team_after(&self, team: TeamId) -> Option<TeamId> {
        let pos = self.teams.iter().position(|t| *t == team)?;
        self.teams.get((pos + 1) % self.teams.len()).copied()
    }

    /// Whether `team` is the last to play in each round
    pub fn is_last_in_order(&self, team: TeamId) -> bool {
        self.teams.last() == Some(&team)
    }

    pub fn deck_question(&self, team: TeamId, index: u32) -> Option<&Question> {
        self.team_questions.get(&team)?.get(index as usize)
    }

    pub fn score(&self, team: TeamId) -> u32 {
        self.team_scores.get(&team).copied().unwrap_or(0)
    }
}

/// A user's membership in a match
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub match_id: MatchId,
    pub user_id: UserId,
    pub display_name: String,
    /// None while unassigned or spectating
    pub team_id: Option<TeamId>,
    pub joined_at: String,
}

/// Participant IDs on `team`, in join order
pub fn roster(participants: &[Participant], team: TeamId) -> Vec<ParticipantId> {
    participants
        .iter()
        .filter(|p| p.team_id == Some(team))
        .map(|p| p.id.clone())
        .collect()
}
