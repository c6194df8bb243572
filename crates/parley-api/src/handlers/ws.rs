//! WebSocket endpoint: pushes deliveries to the client and takes back
//! acknowledgments and presence heartbeats.

use std::ops::ControlFlow;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use parley_core::{new_id, ClientFrame, PresenceTracker};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsParams {
    pub user_id: String,
}

/// `GET /api/v1/ws?userId=...`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, params.user_id))
}

async fn handle_ws_connection(socket: WebSocket, state: AppState, user_id: String) {
    let session_id = new_id();
    let mut outbox = state.hub.register(&user_id, &session_id);
    state.presence.touch(&user_id, &session_id, None);
    info!(
        user_id = %user_id,
        session_id = %session_id,
        active = state.hub.connection_count(),
        "WebSocket connection opened"
    );

    let (mut sender, mut receiver) = socket.split();

    let ping_every = state.config.ws_ping_interval;
    let send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        loop {
            tokio::select! {
                payload = outbox.recv() => {
                    let Some(payload) = payload else { break };
                    match serde_json::to_string(&payload) {
                        Ok(json) => {
                            if sender.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to serialize outbound message"),
                    }
                }
                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(vec![])).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_state = state.clone();
    let recv_user = user_id.clone();
    let recv_session = session_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if handle_client_message(&recv_state, &recv_user, &recv_session, msg).is_break() {
                break;
            }
        }
    });

    let (mut send_task, mut recv_task) = (send_task, recv_task);
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.unregister(&user_id, &session_id);
    state.presence.remove_session(&session_id);
    info!(
        user_id = %user_id,
        session_id = %session_id,
        active = state.hub.connection_count(),
        "WebSocket connection closed"
    );
}

/// React to one client message. Pongs answer our pings and count as
/// heartbeats, same as a `ping` frame without a status.
fn handle_client_message(
    state: &AppState,
    user_id: &str,
    session_id: &str,
    msg: Message,
) -> ControlFlow<()> {
    match msg {
        Message::Text(text) => handle_client_frame(state, user_id, session_id, &text),
        Message::Pong(_) => state.presence.touch(user_id, session_id, None),
        Message::Close(_) => return ControlFlow::Break(()),
        Message::Ping(_) | Message::Binary(_) => {}
    }
    ControlFlow::Continue(())
}

fn handle_client_frame(state: &AppState, user_id: &str, session_id: &str, text: &str) {
    match ClientFrame::parse(text) {
        Ok(ClientFrame::Ack(ack)) => {
            state.scheduler.acknowledge(&ack.message_id);
        }
        Ok(ClientFrame::Ping(ping)) => {
            state
                .presence
                .touch(user_id, session_id, ping.status.as_deref());
        }
        Err(e) => debug!(user_id, session_id, error = %e, "Ignoring unrecognized client frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parley_delivery::{
        DeliveryConfig, InMemoryConversationStore, InMemoryUserDirectory, PlainTextModel,
    };

    use crate::config::ApiConfig;
    use crate::state::Backends;

    fn state() -> AppState {
        let backends = Backends {
            store: Arc::new(InMemoryConversationStore::new()),
            users: Arc::new(InMemoryUserDirectory::identity()),
            model: Arc::new(PlainTextModel),
        };
        AppState::build(ApiConfig::default(), DeliveryConfig::default(), backends).0
    }

    #[tokio::test]
    async fn test_pong_refreshes_presence() {
        let state = state();
        assert!(!state.presence.is_user_present("erin"));

        let flow = handle_client_message(&state, "erin", "s-1", Message::Pong(vec![]));

        assert!(flow.is_continue());
        assert!(state.presence.is_user_present("erin"));
        assert_eq!(state.presence.sessions_for("erin")[0].status, "active");
    }

    #[tokio::test]
    async fn test_close_stops_and_garbage_is_ignored() {
        let state = state();
        assert!(handle_client_message(&state, "erin", "s-1", Message::Close(None)).is_break());
        assert!(handle_client_message(
            &state,
            "erin",
            "s-1",
            Message::Text("not json".to_string())
        )
        .is_continue());
        assert!(!state.presence.is_user_present("erin"));
    }
}
