//! HTTP API endpoints for looking up matches.
//!
//! Clients use these to render a match before (or without) opening a WebSocket.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::driver::DriverError;
use crate::protocol::redact;
use crate::state::AppState;
use crate::types::{Match, MatchId, MatchPhase, Participant};

/// Response structure for a match lookup
#[derive(Debug, Clone, Serialize)]
pub struct MatchResponse {
    #[serde(rename = "match")]
    pub current: Match,
    pub participants: Vec<Participant>,
}

/// Response structure for a join code lookup
#[derive(Debug, Clone, Serialize)]
pub struct JoinCodeResponse {
    pub match_id: MatchId,
    pub room_status: MatchPhase,
    pub participant_count: usize,
}

fn error_response(e: DriverError) -> Response {
    let status = match e {
        DriverError::MatchNotFound(_) | DriverError::UnknownJoinCode(_) => StatusCode::NOT_FOUND,
        _ => {
            tracing::error!("API request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let body = serde_json::json!({ "code": e.code(), "msg": e.to_string() });
    (status, Json(body)).into_response()
}

/// Fetch a match and its participants.
///
/// GET /api/matches/{id}
pub async fn get_match(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let result = tokio::try_join!(state.driver.get_match(&id), state.driver.participants(&id));
    match result {
        Ok((m, participants)) => Json(MatchResponse {
            current: redact(m),
            participants,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// Resolve a join code to its match.
///
/// GET /api/join/{code}
pub async fn resolve_join_code(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    let m = match state.driver.find_by_join_code(&code).await {
        Ok(m) => m,
        Err(e) => return error_response(e),
    };
    match state.driver.participants(&m.id).await {
        Ok(participants) => Json(JoinCodeResponse {
            match_id: m.id,
            room_status: m.room_status,
            participant_count: participants.len(),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}
