//! API endpoints for agent presence.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, ApiResult};
use crate::model::Sector;
use crate::web::AppState;

#[derive(Deserialize)]
pub struct OnlineParams {
    pub sector: Option<String>,
}

/// Agents with at least one live connection, for presence display.
pub async fn online_agents(
    State(state): State<AppState>,
    Query(params): Query<OnlineParams>,
) -> ApiResult<Value> {
    match params.sector.as_deref() {
        Some(raw) => {
            let sector: Sector = raw
                .parse()
                .map_err(|_| ApiError::bad_request(format!("invalid sector: {}", raw)))?;
            Ok(Json(json!({
                "sector": sector,
                "agents": state.registry.active_agents(sector),
            })))
        }
        None => {
            let mut by_sector = serde_json::Map::new();
            for sector in Sector::ALL {
                by_sector.insert(
                    sector.as_str().to_string(),
                    json!(state.registry.active_agents(sector)),
                );
            }
            Ok(Json(json!({ "agents": by_sector })))
        }
    }
}
