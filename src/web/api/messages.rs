//! API endpoints for messages.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, ApiResult};
use crate::web::AppState;

/// Message history for a conversation, in replay order.
pub async fn conversation_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
) -> ApiResult<Value> {
    let conversation = state.store.get_conversation(conversation_id)?;
    let messages = state.store.list_messages(conversation_id)?;
    Ok(Json(json!({
        "messages": messages,
        "total": messages.len(),
        "conversation": conversation,
    })))
}

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub conversation_id: i64,
    pub agent_id: i64,
    pub content: String,
}

/// Send a message as a human agent.
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<Value> {
    if req.content.trim().is_empty() {
        return Err(ApiError::bad_request("message content is empty"));
    }
    let message = state
        .bot
        .send_agent_message(req.conversation_id, req.agent_id, &req.content)
        .await?;
    Ok(Json(json!({
        "status": "sent",
        "message": message,
    })))
}

/// Flip a message's read flag. The only mutation messages allow.
pub async fn mark_message_read(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Value> {
    if !state.store.mark_message_read(id)? {
        return Err(crate::error::Error::NotFound(format!("message {}", id)).into());
    }
    Ok(Json(json!({ "status": "ok" })))
}
