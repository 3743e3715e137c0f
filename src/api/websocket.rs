use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::session::messages::{ClientMessage, ServerMessage, SignalingEnvelope};
use crate::session::SessionHub;

/// Pumps one participant's WebSocket: outbound server messages flow through
/// an unbounded channel, inbound frames are parsed and handed to the hub.
/// A dropped socket is treated exactly like an explicit leave.
pub async fn handle_socket(websocket: WebSocket, hub: Arc<SessionHub>) {
    tracing::debug!("websocket connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::text(text)).await {
                        tracing::debug!(error = %e, "failed to send websocket message");
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize server message");
                }
            }
        }
    });

    // fixed by the first accepted Join for the lifetime of the socket
    let mut identity: Option<(String, String)> = None;

    while let Some(result) = ws_receiver.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "websocket error");
                break;
            }
        };

        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_str() else {
            continue;
        };

        match serde_json::from_str::<ClientMessage>(text) {
            Ok(client_message) => {
                handle_client_message(&hub, &tx, &mut identity, client_message).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "unparseable client message");
                let _ = tx.send(ServerMessage::Error {
                    code: "bad_message".to_string(),
                    message: e.to_string(),
                    retryable: false,
                });
            }
        }
    }

    if let Some((room_id, peer_id)) = identity.take() {
        hub.leave(&room_id, &peer_id).await;
    }
    sender_task.abort();
    tracing::debug!("websocket connection closed");
}

async fn handle_client_message(
    hub: &Arc<SessionHub>,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    identity: &mut Option<(String, String)>,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Join {
            room_id,
            peer_id,
            role,
        } => {
            if identity.is_some() {
                let _ = tx.send(ServerMessage::Error {
                    code: "already_joined".to_string(),
                    message: "this connection already joined a room".to_string(),
                    retryable: false,
                });
                return;
            }

            // identity is only bound on success, so a rejected duplicate
            // cannot tear down the registration it collided with
            match hub.join(&room_id, &peer_id, role, tx.clone()).await {
                Ok(()) => *identity = Some((room_id, peer_id)),
                Err(e) => {
                    tracing::warn!(room_id = %room_id, peer_id = %peer_id, error = %e, "join failed");
                }
            }
        }
        ClientMessage::Leave => {
            if let Some((room_id, peer_id)) = identity.take() {
                hub.leave(&room_id, &peer_id).await;
            }
        }
        ClientMessage::Signal { to, payload } => {
            let Some((room_id, from)) = identity.as_ref() else {
                let _ = tx.send(ServerMessage::Error {
                    code: "not_joined".to_string(),
                    message: "join a room before signaling".to_string(),
                    retryable: false,
                });
                return;
            };

            let envelope = SignalingEnvelope {
                from: from.clone(),
                to,
                payload,
            };
            // routing failures are reported back but never fatal here
            if let Err(e) = hub.signal(room_id, envelope).await {
                tracing::warn!(room_id = %room_id, error = %e, "signal not routed");
                let _ = tx.send(ServerMessage::Error {
                    code: "signal_dropped".to_string(),
                    message: e.to_string(),
                    retryable: e.is_recoverable(),
                });
            }
        }
    }
}
