pub mod handlers;
mod host;
mod player;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::driver::DriverError;
use crate::protocol::{ClientMessage, ServerMessage, PROTOCOL_VERSION};
use crate::state::AppState;
use crate::store::{MatchEvent, MatchSubscription};
use crate::types::{MatchId, UserId};
use crate::view::TurnTracker;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: Option<String>,
}

/// One connected client and the match it is looking at
pub struct Session {
    pub user_id: UserId,
    match_id: Option<MatchId>,
    subscription: Option<MatchSubscription>,
    tracker: TurnTracker,
}

impl Session {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            match_id: None,
            subscription: None,
            tracker: TurnTracker::new(),
        }
    }

    pub fn match_id(&self) -> Option<&str> {
        self.match_id.as_deref()
    }

    /// Follow `match_id` from now on
    pub fn attach(&mut self, state: &AppState, match_id: MatchId) {
        if self.match_id.as_deref() == Some(match_id.as_str()) {
            return;
        }
        self.subscription = Some(state.driver.subscribe(&match_id));
        self.match_id = Some(match_id);
        self.tracker.reset();
    }

    pub fn detach(&mut self) {
        self.match_id = None;
        self.subscription = None;
        self.tracker.reset();
    }

    /// Current snapshot of the attached match, plus `turn_started` when the turn moved
    pub async fn refresh(&mut self, state: &AppState) -> Vec<ServerMessage> {
        let Some(match_id) = self.match_id.clone() else {
            return Vec::new();
        };

        let (m, participants) = match tokio::try_join!(
            state.driver.get_match(&match_id),
            state.driver.participants(&match_id)
        ) {
            Ok(found) => found,
            Err(DriverError::MatchNotFound(_)) => {
                // Deleted while the subscription lagged behind
                self.detach();
                return vec![ServerMessage::MatchDeleted { match_id }];
            }
            Err(e) => {
                tracing::debug!("Could not refresh match {}: {}", match_id, e);
                return Vec::new();
            }
        };

        let mut out = Vec::with_capacity(2);
        let change = self.tracker.observe(&m);
        if change.needs_reset() && m.current_turn_team_id.is_some() {
            out.push(ServerMessage::turn_started(&m));
        }
        out.push(ServerMessage::match_state(m, participants));
        out
    }

    /// Translate a store event into messages for this client
    pub async fn on_event(&mut self, state: &AppState, event: MatchEvent) -> Vec<ServerMessage> {
        match event {
            MatchEvent::Deleted(match_id) => {
                self.detach();
                vec![ServerMessage::MatchDeleted { match_id }]
            }
            MatchEvent::Updated(_) | MatchEvent::ParticipantsChanged(_) => {
                self.refresh(state).await
            }
        }
    }

    async fn next_event(&mut self) -> Option<MatchEvent> {
        match &mut self.subscription {
            Some(sub) => sub.recv().await,
            None => std::future::pending().await,
        }
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let user_id = params
        .user_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| ulid::Ulid::new().to_string());
    tracing::info!("WebSocket connection request: user_id={}", user_id);

    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn send_all(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    messages: Vec<ServerMessage>,
) -> bool {
    for msg in messages {
        if let Ok(json) = serde_json::to_string(&msg) {
            if sender.send(Message::Text(json.into())).await.is_err() {
                return false;
            }
        }
    }
    true
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: UserId, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut session = Session::new(user_id);

    let welcome = ServerMessage::Welcome {
        protocol: PROTOCOL_VERSION.to_string(),
        user_id: session.user_id.clone(),
        server_now: chrono::Utc::now().to_rfc3339(),
    };
    if !send_all(&mut sender, vec![welcome]).await {
        tracing::error!("Failed to send welcome message");
        return;
    }

    loop {
        tokio::select! {
            event = session.next_event() => {
                let messages = match event {
                    Some(event) => session.on_event(&state, event).await,
                    None => {
                        // Store went away; stop following the match
                        session.detach();
                        Vec::new()
                    }
                };
                if !send_all(&mut sender, messages).await {
                    break;
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message from {}: {}", session.user_id, text);

                        let mut messages = Vec::new();
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                let before = session.match_id().map(str::to_string);
                                if let Some(response) =
                                    handlers::handle_message(client_msg, &mut session, &state).await
                                {
                                    messages.push(response);
                                }
                                // Newly attached sessions get a snapshot right away
                                if session.match_id().is_some() && session.match_id() != before.as_deref() {
                                    messages.extend(session.refresh(&state).await);
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to parse client message: {}", e);
                                messages.push(ServerMessage::error(
                                    "PARSE_ERROR",
                                    format!("Invalid message format: {}", e),
                                ));
                            }
                        }
                        if !send_all(&mut sender, messages).await {
                            tracing::error!("Failed to send response");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!("WebSocket connection closed for user: {}", session.user_id);
}
