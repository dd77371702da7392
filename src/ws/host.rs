//! Match creator message handlers

use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::{MatchSettings, ParticipantId, TeamId};
use std::sync::Arc;

use super::handlers::error_message;
use super::Session;

pub async fn handle_create_match(
    state: &Arc<AppState>,
    session: &mut Session,
    settings: Option<MatchSettings>,
) -> Option<ServerMessage> {
    let settings = state.settings_or_default(settings);
    match state.driver.create_match(&session.user_id, settings).await {
        Ok(m) => {
            session.attach(state, m.id.clone());
            Some(ServerMessage::MatchCreated {
                match_id: m.id,
                join_code: m.join_code,
            })
        }
        Err(e) => Some(error_message(e)),
    }
}

pub async fn handle_assign_team(
    state: &Arc<AppState>,
    session: &Session,
    match_id: &str,
    participant_id: ParticipantId,
    team_id: Option<TeamId>,
) -> Option<ServerMessage> {
    tracing::info!("Assign {} to team {:?}", participant_id, team_id);
    match state
        .driver
        .assign_team(&session.user_id, match_id, &participant_id, team_id)
        .await
    {
        // Everyone following the match gets the new roster
        Ok(_) => None,
        Err(e) => Some(error_message(e)),
    }
}

pub async fn handle_start_match(
    state: &Arc<AppState>,
    session: &Session,
    match_id: &str,
) -> Option<ServerMessage> {
    match state.driver.start(&session.user_id, match_id).await {
        Ok(_) => None,
        Err(e) => Some(error_message(e)),
    }
}

pub async fn handle_delete_match(
    state: &Arc<AppState>,
    session: &mut Session,
    match_id: &str,
) -> Option<ServerMessage> {
    match state.driver.delete_match(&session.user_id, match_id).await {
        Ok(()) => {
            session.detach();
            Some(ServerMessage::MatchDeleted {
                match_id: match_id.to_string(),
            })
        }
        Err(e) => Some(error_message(e)),
    }
}
