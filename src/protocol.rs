use crate::driver::SubmitOutcome;
use crate::types::*;
use serde::{Deserialize, Serialize};

pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateMatch {
        /// Server defaults apply when omitted
        #[serde(default)]
        settings: Option<MatchSettings>,
    },
    JoinMatch {
        join_code: String,
        #[serde(default)]
        display_name: Option<String>,
    },
    // Host-only messages
    AssignTeam {
        participant_id: ParticipantId,
        /// `null` takes the participant off their team
        team_id: Option<TeamId>,
    },
    StartMatch,
    DeleteMatch,
    // Player messages
    SubmitAnswer {
        answer: SubmittedAnswer,
    },
    LeaveMatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        user_id: UserId,
        server_now: String,
    },
    MatchCreated {
        match_id: MatchId,
        join_code: String,
    },
    Joined {
        match_id: MatchId,
        participant: Participant,
    },
    /// Full match snapshot, pushed on every change
    MatchState {
        #[serde(rename = "match")]
        current: Match,
        participants: Vec<Participant>,
        server_now: String,
    },
    /// A new turn began; clients drop any pending selection
    TurnStarted {
        match_id: MatchId,
        turn_number: u64,
        team_id: Option<TeamId>,
        question: Option<ActiveQuestion>,
        is_steal: bool,
        deadline: Option<String>,
    },
    AnswerAccepted {
        result: SubmitOutcome,
    },
    MatchDeleted {
        match_id: MatchId,
    },
    Left {
        match_id: MatchId,
    },
    Error {
        code: String,
        msg: String,
    },
}

/// Strip canonical answers from a match before it leaves the server.
/// Once the match is finished everything is revealed.
pub fn redact(mut m: Match) -> Match {
    if m.room_status == MatchPhase::Finished {
        return m;
    }
    let hide = |q: &mut Question| {
        q.answer = None;
        q.explanation.clear();
    };
    m.team_questions.values_mut().flatten().for_each(hide);
    if let Some(active) = m.current_question.as_mut() {
        hide(&mut active.question);
    }
    m
}

impl ServerMessage {
    pub fn match_state(m: Match, participants: Vec<Participant>) -> Self {
        ServerMessage::MatchState {
            current: redact(m),
            participants,
            server_now: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn turn_started(m: &Match) -> Self {
        let question = redact(m.clone()).current_question;
        ServerMessage::TurnStarted {
            match_id: m.id.clone(),
            turn_number: m.turn_number,
            team_id: m.current_turn_team_id,
            question,
            is_steal: m.is_steal(),
            deadline: m.turn_deadline.clone(),
        }
    }

    pub fn error(code: impl Into<String>, msg: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            msg: msg.into(),
        }
    }
}
