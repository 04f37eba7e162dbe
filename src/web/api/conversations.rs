//! API endpoints for conversations: listing, queue snapshots, and the
//! accept/resolve/close lifecycle requests.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, ApiResult};
use crate::model::{Conversation, ConversationStatus, Sector};
use crate::web::AppState;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub sector: Option<String>,
    pub limit: Option<usize>,
}

/// List conversations, optionally filtered by status and sector.
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Value> {
    let status = parse_filter::<ConversationStatus>(params.status.as_deref(), "status")?;
    let sector = parse_filter::<Sector>(params.sector.as_deref(), "sector")?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(MAX_LIST_LIMIT);

    let conversations = state.store.list_conversations(status, sector, limit)?;
    Ok(Json(json!({
        "conversations": conversations,
        "total": conversations.len(),
    })))
}

#[derive(Deserialize)]
pub struct QueueParams {
    pub sector: Option<String>,
}

/// Queue snapshot: waiting conversations plus per-sector counts.
///
/// With a sector filter the response covers that sector's queue and the
/// escalation queue, which every sector sees. Best-effort read; claims are
/// arbitrated independently.
pub async fn get_queue(
    State(state): State<AppState>,
    Query(params): Query<QueueParams>,
) -> ApiResult<Value> {
    let sector = parse_filter::<Sector>(params.sector.as_deref(), "sector")?;

    let sectors: Vec<Sector> = match sector {
        Some(sector) if sector.is_escalation() => vec![sector],
        Some(sector) => vec![sector, Sector::AtendimentoHumano],
        None => Sector::ALL.to_vec(),
    };

    let mut queue: Vec<Conversation> = Vec::new();
    for sector in &sectors {
        for id in state.queues.entries(*sector) {
            match state.store.get_conversation(id) {
                Ok(conversation) => queue.push(conversation),
                Err(e) => tracing::warn!("Queued conversation {} unreadable: {}", id, e),
            }
        }
    }

    Ok(Json(json!({
        "queue": queue,
        "queue_sizes": state.queues.sizes(),
        "current_sector": sector,
    })))
}

/// Details of one conversation, messages included.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Value> {
    let conversation = state.store.get_conversation(id)?;
    let messages = state.store.list_messages(id)?;
    Ok(Json(json!({
        "conversation": conversation,
        "messages": messages,
    })))
}

#[derive(Deserialize)]
pub struct AcceptRequest {
    pub agent_id: i64,
    pub sector: Sector,
}

/// An agent claims a queued conversation, or takes one over from the bot.
pub async fn accept_conversation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<AcceptRequest>,
) -> ApiResult<Value> {
    let conversation = state.dispatcher.accept(id, req.agent_id, req.sector).await?;
    Ok(Json(json!({
        "status": "accepted",
        "conversation": conversation,
    })))
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub agent_id: i64,
}

/// The assigned agent marks the conversation resolved.
pub async fn resolve_conversation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<Value> {
    let conversation = state.dispatcher.resolve(id, req.agent_id).await?;
    Ok(Json(json!({
        "status": "resolved",
        "conversation": conversation,
    })))
}

/// Close a conversation for good.
pub async fn close_conversation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Value> {
    let conversation = state.dispatcher.close(id).await?;
    Ok(Json(json!({
        "status": "closed",
        "conversation": conversation,
    })))
}

/// Summary counts by status, sector, and queue.
pub async fn stats_summary(State(state): State<AppState>) -> ApiResult<Value> {
    let by_status: serde_json::Map<String, Value> = state
        .store
        .counts_by_status()?
        .into_iter()
        .map(|(status, count)| (status, json!(count)))
        .collect();
    let by_sector: serde_json::Map<String, Value> = state
        .store
        .counts_by_sector()?
        .into_iter()
        .map(|(sector, count)| (sector, json!(count)))
        .collect();

    Ok(Json(json!({
        "by_status": by_status,
        "by_sector": by_sector,
        "queues": state.queues.sizes(),
    })))
}

fn parse_filter<T: std::str::FromStr>(
    value: Option<&str>,
    field: &str,
) -> Result<Option<T>, ApiError> {
    match value {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("invalid {}: {}", field, raw))),
    }
}
