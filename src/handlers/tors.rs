use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::models::*;
use crate::AppState;

use super::{created, ApiError};

/// List registered ToR switches
pub async fn list_tors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TorSwitch>>, ApiError> {
    let tors = state.store.list_tors().await?;
    Ok(Json(tors))
}

/// Register a switch and mesh it with its peers
pub async fn create_tor(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTorRequest>,
) -> Result<(StatusCode, Json<TorSwitch>), ApiError> {
    let tor = state.engine.create_tor(&req).await?;
    Ok(created(tor))
}

/// Tear down a switch's tunnels and unregister it
pub async fn delete_tor(
    State(state): State<Arc<AppState>>,
    Path(ip): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_tor(&ip).await?;
    Ok(StatusCode::NO_CONTENT)
}
