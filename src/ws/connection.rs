//! WebSocket connection state machine.
//!
//! Handles the read/write loop for a single WebSocket connection: every
//! event published on the bus is pushed to the client, and client
//! commands are forwarded to the backend as independent tasks so a slow
//! request never blocks event delivery.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};

use super::messages::{WsCommand, WsMessage, WsMessageType};
use crate::domain::GatewayEvent;
use crate::error::GatewayError;
use crate::service::Gateway;

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Reads commands from the client and dispatches them.
/// - Forwards every event from the [`broadcast::Receiver`] to the client.
pub async fn run_connection(
    socket: WebSocket,
    mut event_rx: broadcast::Receiver<GatewayEvent>,
    gateway: Arc<Gateway>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<WsMessage>();

    loop {
        let outgoing = tokio::select! {
            // Incoming message from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text_message(&text, &gateway, &reply_tx)
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    _ => None,
                }
            }
            // Completed command
            Some(reply) = reply_rx.recv() => Some(reply),
            // Event from EventBus
            event = event_rx.recv() => {
                match event {
                    Ok(event) => match WsMessage::event(&event) {
                        Ok(msg) => Some(msg),
                        Err(err) => {
                            tracing::warn!(error = %err, event = event.name(), "unable to encode event");
                            None
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "ws client lagged behind event bus");
                        None
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        let Some(msg) = outgoing else { continue };
        let Ok(json) = serde_json::to_string(&msg) else {
            continue;
        };
        if ws_tx.send(Message::text(json)).await.is_err() {
            break;
        }
    }

    tracing::debug!("ws connection closed");
}

/// Handles a text message from the client.
///
/// Returns an immediate error reply for malformed input. Valid commands
/// are spawned and answer later through `replies`.
fn handle_text_message(
    text: &str,
    gateway: &Arc<Gateway>,
    replies: &mpsc::UnboundedSender<WsMessage>,
) -> Option<WsMessage> {
    let Ok(msg) = serde_json::from_str::<WsMessage>(text) else {
        return Some(WsMessage::error(String::new(), 400, "malformed JSON"));
    };
    if msg.msg_type != WsMessageType::Command {
        return Some(WsMessage::error(msg.id, 400, "expected a command"));
    }
    let command = match serde_json::from_value::<WsCommand>(msg.payload) {
        Ok(command) => command,
        Err(err) => return Some(WsMessage::error(msg.id, 400, &err.to_string())),
    };

    let method = command.method.trim_start_matches('/').to_string();
    if !gateway.endpoints().contains(&method) {
        let err = GatewayError::EndpointNotFound(method);
        return Some(WsMessage::error(msg.id, err.status_code().as_u16(), &err.to_string()));
    }

    let gateway = Arc::clone(gateway);
    let replies = replies.clone();
    let id = msg.id;
    tokio::spawn(async move {
        let reply = match gateway.make_request(&method, command.params).await {
            Ok(result) => WsMessage::response(id, result),
            Err(err) => WsMessage::error(id, err.status_code().as_u16(), &err.to_string()),
        };
        // The client may have gone away in the meantime.
        let _ = replies.send(reply);
    });
    None
}
