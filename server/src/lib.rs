//! Harvest Chat Server - conversation store and live relay
//!
//! This server handles:
//! - Buyer/seller conversations scoped to a product
//! - Message send, edit, delete and reactions
//! - Unread bookkeeping and read receipts
//! - Live snapshots of directories, message logs and typing sets over WebSocket

pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod models;
pub mod presence;
pub mod service;
pub mod storage;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::service::ChatService;
use crate::storage::Storage;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Arc<Storage>,
    pub service: Arc<ChatService>,
}

impl AppState {
    pub fn new(config: Arc<Config>, storage: Arc<Storage>) -> Self {
        let service = Arc::new(ChatService::new(Arc::clone(&storage), &config));
        Self {
            config,
            storage,
            service,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))

        // Users
        .route("/api/v1/users/me", get(handlers::users::get_current_user))
        .route("/api/v1/quick-replies", get(handlers::users::quick_replies))

        // Conversation directory
        .route(
            "/api/v1/conversations",
            get(handlers::conversations::list_conversations).post(handlers::conversations::create_conversation),
        )
        .route("/api/v1/conversations/:id/read", post(handlers::conversations::mark_as_read))
        .route("/api/v1/conversations/:id/archive", post(handlers::conversations::set_archived))
        .route("/api/v1/conversations/:id/mute", post(handlers::conversations::set_muted))
        .route("/api/v1/conversations/:id/messages", get(handlers::conversations::get_messages))

        // Messages
        .route("/api/v1/messages", post(handlers::messages::send_message))
        .route(
            "/api/v1/messages/:id",
            put(handlers::messages::edit_message).delete(handlers::messages::delete_message),
        )
        .route(
            "/api/v1/messages/:id/reactions",
            post(handlers::messages::add_reaction).delete(handlers::messages::remove_reaction),
        )

        // WebSocket for live snapshots
        .route("/ws", get(handlers::websocket::websocket_handler))

        // Add middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Periodically expire stale typing signals.
pub fn spawn_typing_sweeper(service: Arc<ChatService>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            service.sweep_typing().await;
        }
    })
}
