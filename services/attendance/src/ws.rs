//! WebSocket endpoint for teachers watching sessions live

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    middleware::AuthUser, notifications::NotificationHub, sessions::SessionManager,
    state::AppState,
};

const OUTBOX_CAPACITY: usize = 64;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientMessage {
    JoinSession {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
    LeaveSession {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "event")]
pub enum ServerMessage {
    #[serde(rename = "session:joined")]
    Joined {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
    #[serde(rename = "session:left")]
    Left {
        #[serde(rename = "sessionId")]
        session_id: Uuid,
    },
    #[serde(rename = "error")]
    Error { message: String },
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: AuthUser) {
    let (mut sink, mut stream) = socket.split();
    let (outbox, mut pending) = mpsc::channel::<String>(OUTBOX_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(text) = pending.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    info!("Live view connected for user {}", user.id);
    let mut subscriptions =
        Subscriptions::new(state.sessions.clone(), state.hub.clone(), user.id, outbox.clone());

    while let Some(Ok(message)) = stream.next().await {
        let reply = match message {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(request) => subscriptions.handle(request).await,
                Err(e) => ServerMessage::Error {
                    message: format!("Unrecognized message: {}", e),
                },
            },
            Message::Close(_) => break,
            _ => continue,
        };

        let Ok(text) = serde_json::to_string(&reply) else {
            continue;
        };
        if outbox.send(text).await.is_err() {
            break;
        }
    }

    subscriptions.close().await;
    writer.abort();
    info!("Live view disconnected for user {}", user.id);
}

/// Session rooms joined by one connection
pub struct Subscriptions {
    sessions: Arc<SessionManager>,
    hub: Arc<NotificationHub>,
    user_id: Uuid,
    outbox: mpsc::Sender<String>,
    rooms: HashMap<Uuid, JoinHandle<()>>,
}

impl Subscriptions {
    pub fn new(
        sessions: Arc<SessionManager>,
        hub: Arc<NotificationHub>,
        user_id: Uuid,
        outbox: mpsc::Sender<String>,
    ) -> Self {
        Self {
            sessions,
            hub,
            user_id,
            outbox,
            rooms: HashMap::new(),
        }
    }

    pub async fn handle(&mut self, request: ClientMessage) -> ServerMessage {
        match request {
            ClientMessage::JoinSession { session_id } => self.join(session_id).await,
            ClientMessage::LeaveSession { session_id } => self.leave(session_id).await,
        }
    }

    /// Only the session's owner may join its room
    async fn join(&mut self, session_id: Uuid) -> ServerMessage {
        if let Err(e) = self.sessions.owned_session(session_id, self.user_id).await {
            return ServerMessage::Error {
                message: e.to_string(),
            };
        }
        if self.rooms.contains_key(&session_id) {
            return ServerMessage::Joined { session_id };
        }

        let mut receiver = self.hub.subscribe(session_id).await;
        let outbox = self.outbox.clone();
        let forward = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let Ok(text) = serde_json::to_string(&event) else {
                            continue;
                        };
                        if outbox.send(text).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Live view for session {} skipped {} events", session_id, skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.rooms.insert(session_id, forward);
        debug!("User {} joined session {}", self.user_id, session_id);

        ServerMessage::Joined { session_id }
    }

    async fn leave(&mut self, session_id: Uuid) -> ServerMessage {
        if let Some(forward) = self.rooms.remove(&session_id) {
            forward.abort();
            let _ = forward.await;
            self.hub.prune(session_id).await;
        }
        ServerMessage::Left { session_id }
    }

    /// Leave every room
    pub async fn close(&mut self) {
        let joined: Vec<Uuid> = self.rooms.keys().copied().collect();
        for session_id in joined {
            self.leave(session_id).await;
        }
    }
}
