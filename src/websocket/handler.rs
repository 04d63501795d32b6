//! WebSocket handler for client and driver connections
//!
//! Handles the upgrade, the connection lifecycle, and message routing. A
//! connection is anonymous until its first `join` event registers a session;
//! malformed payloads are logged and skipped, never fatal.

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::connection::ConnectionId;
use super::messages::{ClientEvent, ServerEvent};
use crate::dispatch::Dispatcher;
use crate::gateway::state::AppState;
use crate::trip::Role;

/// WebSocket upgrade handler
///
/// Endpoint: GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let dispatcher = state.dispatcher.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher))
}

/// Handle one WebSocket connection lifecycle
async fn handle_socket(socket: WebSocket, dispatcher: Arc<Dispatcher>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    // Forward events from the session channel to the socket
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&event) {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // Identity bound by the first join event on this socket
    let mut identity: Option<(Role, i64, ConnectionId)> = None;

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                let event = match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring malformed event");
                        continue;
                    }
                };

                match event {
                    ClientEvent::Join { user_id, role } => {
                        // Re-join on the same socket replaces the binding
                        if let Some((prev_role, prev_id, prev_conn)) = identity.take() {
                            dispatcher.registry().remove(prev_id, prev_role, prev_conn);
                        }

                        let conn_id = dispatcher.registry().register(user_id, role, tx.clone());
                        identity = Some((role, user_id, conn_id));

                        for event in dispatcher.restore_session(user_id, role).await {
                            let _ = tx.send(event);
                        }
                    }
                    other => {
                        let caller = identity.map(|(role, user_id, _)| (role, user_id));
                        dispatcher.dispatch(caller, other).await;
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    send_task.abort();

    // Cleanup: registry write only. Disconnect never mutates trip or
    // driver-online state.
    if let Some((role, user_id, conn_id)) = identity {
        dispatcher.registry().remove(user_id, role, conn_id);
    }
}
