//! WebSocket handler for live snapshots
//!
//! A connection authenticates once, then subscribes to topics. Each
//! subscription is a forwarding task that owns its hub handle; aborting
//! the task releases the topic.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use harvest_chat_core::{Topic, User, WsClientMessage, WsServerMessage};
use std::collections::HashMap;
use tokio::{
    sync::mpsc::{self, UnboundedSender},
    task::JoinHandle,
};

use crate::{
    error::{AppError, Result},
    hub::Subscription,
    AppState,
};

use super::authenticate;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending messages to this client
    let (tx, mut rx) = mpsc::unbounded_channel::<WsServerMessage>();

    let mut user: Option<User> = None;
    let mut subscriptions: HashMap<Topic, JoinHandle<()>> = HashMap::new();

    // Task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<WsClientMessage>(&text) {
                Ok(WsClientMessage::Authenticate { token }) => match authenticate(&state, &token).await {
                    Ok(authenticated) => {
                        tracing::info!("WebSocket authenticated: user={}", authenticated.user_id);

                        // a new identity must not keep the old one's topics
                        for (_, handle) in subscriptions.drain() {
                            handle.abort();
                        }
                        let _ = tx.send(WsServerMessage::Authenticated {
                            user_id: authenticated.user_id.clone(),
                        });
                        user = Some(authenticated);
                    }
                    Err(_) => {
                        let _ = tx.send(WsServerMessage::Error {
                            code: "AUTH_FAILED".to_string(),
                            message: "Invalid or revoked token".to_string(),
                        });
                    }
                },

                Ok(WsClientMessage::Ping) => {
                    let _ = tx.send(WsServerMessage::Pong);
                }

                Ok(command) => {
                    let Some(current) = user.as_ref() else {
                        send_error(&tx, &AppError::Unauthorized);
                        continue;
                    };

                    if let Err(e) = handle_command(&state, current, command, &tx, &mut subscriptions).await {
                        send_error(&tx, &e);
                    }
                }

                Err(e) => {
                    tracing::warn!("Failed to parse WebSocket message: {}", e);
                    let _ = tx.send(WsServerMessage::Error {
                        code: "PARSE_ERROR".to_string(),
                        message: format!("Invalid message format: {}", e),
                    });
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {
                // Binary frames are not part of the protocol; pings are
                // answered by the WebSocket library.
            }
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        }
    }

    // Cleanup
    for (_, handle) in subscriptions.drain() {
        handle.abort();
    }
    if let Some(user) = user {
        tracing::info!("WebSocket closed: user={}", user.user_id);
    }
    send_task.abort();
}

async fn handle_command(
    state: &AppState,
    user: &User,
    command: WsClientMessage,
    tx: &UnboundedSender<WsServerMessage>,
    subscriptions: &mut HashMap<Topic, JoinHandle<()>>,
) -> Result<()> {
    match command {
        WsClientMessage::Subscribe { topic } => {
            let handle = match &topic {
                Topic::Conversations => {
                    let sub = state.service.subscribe_conversations(user).await?;
                    tokio::spawn(forward(sub, tx.clone(), |list| WsServerMessage::Conversations {
                        conversations: list.to_vec(),
                    }))
                }
                Topic::Messages(conversation_id) => {
                    let sub = state.service.subscribe_messages(user, conversation_id).await?;
                    let conversation_id = conversation_id.clone();
                    tokio::spawn(forward(sub, tx.clone(), move |messages| WsServerMessage::Messages {
                        conversation_id: conversation_id.clone(),
                        messages: messages.to_vec(),
                    }))
                }
                Topic::Typing(conversation_id) => {
                    let sub = state.service.subscribe_typing(user, conversation_id).await?;
                    let conversation_id = conversation_id.clone();
                    tokio::spawn(forward(sub, tx.clone(), move |users| WsServerMessage::Typing {
                        conversation_id: conversation_id.clone(),
                        users: users.to_vec(),
                    }))
                }
            };

            // resubscribing replaces the previous stream
            if let Some(previous) = subscriptions.insert(topic, handle) {
                previous.abort();
            }
        }

        WsClientMessage::Unsubscribe { topic } => {
            if let Some(handle) = subscriptions.remove(&topic) {
                handle.abort();
            }
            let _ = tx.send(WsServerMessage::Unsubscribed { topic });
        }

        WsClientMessage::Typing {
            conversation_id,
            is_typing,
        } => {
            state
                .service
                .set_typing(user, &conversation_id, is_typing)
                .await?;
        }

        // handled by the connection loop
        WsClientMessage::Authenticate { .. } | WsClientMessage::Ping => {}
    }

    Ok(())
}

/// Push the current snapshot, then every replacement, until the client
/// goes away or the task is aborted.
async fn forward<T, F>(mut sub: Subscription<String, T>, tx: UnboundedSender<WsServerMessage>, frame: F)
where
    T: Clone,
    F: Fn(T) -> WsServerMessage,
{
    if tx.send(frame(sub.current())).is_err() {
        return;
    }

    while let Some(snapshot) = sub.changed().await {
        if tx.send(frame(snapshot)).is_err() {
            break;
        }
    }
}

fn send_error(tx: &UnboundedSender<WsServerMessage>, error: &AppError) {
    let _ = tx.send(WsServerMessage::Error {
        code: error.code().to_string(),
        message: error.to_string(),
    });
}
