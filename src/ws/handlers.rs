//! WebSocket message dispatch
//!
//! Resolves the session's match, then hands off to the host and player
//! handler modules. Host authorization is checked by the driver against the
//! match creator.

use crate::driver::DriverError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use std::sync::Arc;

use super::{host, player, Session};

/// Macro to get the session's match id or return early with an error
macro_rules! require_match {
    ($session:expr) => {
        match $session.match_id() {
            Some(id) => id.to_string(),
            None => {
                return Some(ServerMessage::error(
                    "NO_MATCH",
                    "Create or join a match first",
                ));
            }
        }
    };
}

/// Map a driver error to the message the client sees
pub(crate) fn error_message(e: DriverError) -> ServerMessage {
    match &e {
        DriverError::Store(_) | DriverError::Contention(_) | DriverError::Engine(_) => {
            tracing::error!("Request failed: {}", e);
        }
        _ => {
            tracing::debug!("Request rejected: {}", e);
        }
    }
    ServerMessage::error(e.code(), e.to_string())
}

/// Handle client messages and return optional response
pub async fn handle_message(
    msg: ClientMessage,
    session: &mut Session,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    match msg {
        // Match lifecycle
        ClientMessage::CreateMatch { settings } => {
            host::handle_create_match(state, session, settings).await
        }

        ClientMessage::JoinMatch {
            join_code,
            display_name,
        } => player::handle_join_match(state, session, join_code, display_name).await,

        // Host commands (creator checked by the driver)
        ClientMessage::AssignTeam {
            participant_id,
            team_id,
        } => {
            let match_id = require_match!(session);
            host::handle_assign_team(state, session, &match_id, participant_id, team_id).await
        }

        ClientMessage::StartMatch => {
            let match_id = require_match!(session);
            host::handle_start_match(state, session, &match_id).await
        }

        ClientMessage::DeleteMatch => {
            let match_id = require_match!(session);
            host::handle_delete_match(state, session, &match_id).await
        }

        // Player commands
        ClientMessage::SubmitAnswer { answer } => {
            let match_id = require_match!(session);
            player::handle_submit_answer(state, session, &match_id, answer).await
        }

        ClientMessage::LeaveMatch => {
            let match_id = require_match!(session);
            player::handle_leave_match(state, session, &match_id).await
        }
    }
}
