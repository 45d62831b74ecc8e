// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! WebSocket endpoint speaking JSON text frames in both directions.
//!
//! The socket is split: a writer task drains the session's outgoing channel
//! while the reader loop decodes client actions. Prompts never block the
//! reader (they run as spawned tasks), so cancellation and tool-call
//! replies keep flowing while an agent tree streams.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use otto_proto::{ClientAction, ServerAction};

use crate::gate::ERR_INVALID;
use crate::handlers::handle_action;
use crate::server::Gateway;
use crate::session::ClientSession;

/// HTTP handler for GET /ws.
pub async fn ws_handler(ws: WebSocketUpgrade, State(gateway): State<Gateway>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

pub async fn handle_socket(socket: WebSocket, gateway: Gateway) {
    let (mut sink, mut stream) = socket.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<ServerAction>(256);
    let session = ClientSession::new(outgoing_tx);
    info!(session = %session.id, "client connected");

    let writer = tokio::spawn(async move {
        while let Some(action) = outgoing_rx.recv().await {
            let text = match serde_json::to_string(&action) {
                Ok(text) => text,
                Err(e) => {
                    warn!("unserializable server action: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientAction>(&text) {
                Ok(action) => handle_action(&gateway, &session, action).await,
                Err(e) => {
                    warn!(session = %session.id, "invalid action JSON: {e}");
                    session
                        .send(ServerAction::ActionError {
                            error: ERR_INVALID.to_string(),
                            message: format!("invalid JSON action: {e}"),
                            remaining_balance: None,
                        })
                        .await;
                }
            },
            // Pings are answered by the websocket layer on read.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {
                debug!(session = %session.id, "binary frame ignored");
            }
            Ok(Message::Close(_)) | Err(_) => break,
        }
    }

    // Reader gone: stop every running prompt so no agent tree keeps
    // streaming into a dead connection, then stop the writer.
    session.cancel_all();
    writer.abort();
    info!(session = %session.id, "client disconnected");
}
