//! WebSocket handling for real-time updates.
//!
//! Clients subscribe to `jobs` and/or `workers` and then receive every
//! [`EntityEvent`] published on those channels.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use workyard_events::{EntityEvent, JOBS_CHANNEL, WORKERS_CHANNEL};

use crate::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let mut events = state.events.subscribe();
    let mut channels: HashSet<&'static str> = HashSet::new();

    loop {
        let outgoing = tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<WsCommand>(&text) {
                    Ok(WsCommand::Subscribe { channel }) => match known_channel(&channel) {
                        Some(name) => {
                            info!(channel = name, "Client subscribed");
                            channels.insert(name);
                            WsMessage::Subscribed { channel: name.to_string() }
                        }
                        None => WsMessage::Error { message: format!("unknown channel: {}", channel) },
                    },
                    Ok(WsCommand::Unsubscribe { channel }) => {
                        info!(channel = %channel, "Client unsubscribed");
                        channels.retain(|c| *c != channel);
                        WsMessage::Unsubscribed { channel }
                    }
                    Err(e) => WsMessage::Error { message: format!("invalid command: {}", e) },
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket connection closed");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    break;
                }
                Some(Ok(_)) => continue,
            },
            event = events.recv() => match event {
                Ok(event) if channels.contains(event.channel()) => WsMessage::Event(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket client lagged behind event stream");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        match serde_json::to_string(&outgoing) {
            Ok(json) => {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    debug!("WebSocket client went away");
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode WebSocket message"),
        }
    }
}

fn known_channel(name: &str) -> Option<&'static str> {
    [JOBS_CHANNEL, WORKERS_CHANNEL]
        .into_iter()
        .find(|c| *c == name)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    Subscribed { channel: String },
    Unsubscribed { channel: String },
    Error { message: String },
    Event(EntityEvent),
}
