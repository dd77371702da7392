//! Participant message handlers

use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::SubmittedAnswer;
use std::sync::Arc;

use super::handlers::error_message;
use super::Session;

pub async fn handle_join_match(
    state: &Arc<AppState>,
    session: &mut Session,
    join_code: String,
    display_name: Option<String>,
) -> Option<ServerMessage> {
    tracing::info!("Join request for code {} from {}", join_code, session.user_id);
    match state
        .driver
        .join(&join_code, &session.user_id, display_name)
        .await
    {
        Ok((m, participant)) => {
            session.attach(state, m.id.clone());
            Some(ServerMessage::Joined {
                match_id: m.id,
                participant,
            })
        }
        Err(e) => Some(error_message(e)),
    }
}

pub async fn handle_submit_answer(
    state: &Arc<AppState>,
    session: &Session,
    match_id: &str,
    answer: SubmittedAnswer,
) -> Option<ServerMessage> {
    tracing::debug!("Answer from {} in match {}: {:?}", session.user_id, match_id, answer);
    match state
        .driver
        .submit_answer(match_id, &session.user_id, answer)
        .await
    {
        Ok(result) => Some(ServerMessage::AnswerAccepted { result }),
        Err(e) => Some(error_message(e)),
    }
}

pub async fn handle_leave_match(
    state: &Arc<AppState>,
    session: &mut Session,
    match_id: &str,
) -> Option<ServerMessage> {
    match state.driver.leave(match_id, &session.user_id).await {
        Ok(()) => {
            session.detach();
            Some(ServerMessage::Left {
                match_id: match_id.to_string(),
            })
        }
        Err(e) => Some(error_message(e)),
    }
}
