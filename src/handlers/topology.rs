use axum::{extract::State, Json};
use std::sync::Arc;

use crate::models::TopologyView;
use crate::AppState;

use super::ApiError;

/// Current host-to-switch topology
pub async fn get_topology(State(state): State<Arc<AppState>>) -> Json<TopologyView> {
    Json(state.engine.index_topology())
}

/// Rediscover all registered switches and return the new topology
pub async fn refresh_topology(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TopologyView>, ApiError> {
    let view = state.engine.refresh_topology().await?;
    Ok(Json(view))
}
