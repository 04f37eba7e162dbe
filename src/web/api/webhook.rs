//! Inbound webhook from the chat channel.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use super::ApiResult;
use crate::channel::InboundEvent;
use crate::web::AppState;

/// Receive one normalized inbound event.
///
/// Processing runs off the request so webhook delivery is acknowledged
/// immediately; failures are logged, the channel will not retry with
/// anything we could use.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Json(event): Json<InboundEvent>,
) -> ApiResult<Value> {
    if event.content.trim().is_empty() {
        tracing::warn!("Ignoring empty inbound event from {}", event.lead_reference);
        return Ok(Json(json!({ "status": "ignored" })));
    }

    let bot = state.bot.clone();
    tokio::spawn(async move {
        let lead = event.lead_reference.clone();
        if let Err(e) = bot.process_inbound(event).await {
            tracing::error!("Inbound processing failed for {}: {}", lead, e);
        }
    });

    Ok(Json(json!({ "status": "received" })))
}
