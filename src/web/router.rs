//! Route definitions for web server.

use axum::{
    routing::{get, post, put},
    Router,
};

use super::api;
use super::ws;
use super::AppState;

/// Create the API router.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        // Conversations
        .route("/conversations", get(api::list_conversations))
        .route("/conversations/queue", get(api::get_queue))
        .route("/conversations/:id", get(api::get_conversation))
        .route("/conversations/:id/accept", post(api::accept_conversation))
        .route("/conversations/:id/resolve", post(api::resolve_conversation))
        .route("/conversations/:id/close", post(api::close_conversation))
        // Messages
        .route("/messages/conversation/:id", get(api::conversation_messages))
        .route("/messages/send", post(api::send_message))
        .route("/messages/:id/read", put(api::mark_message_read))
        // Presence + stats
        .route("/agents/online", get(api::online_agents))
        .route("/stats/summary", get(api::stats_summary))
}

/// Create the full app router.
pub fn create_app_router(state: AppState) -> Router {
    Router::new()
        .nest("/api", create_api_router())
        .route("/webhook", post(api::receive_webhook))
        .route("/ws/:agent_id/:sector", get(ws::ws_handler))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
