use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::models::*;
use crate::AppState;

use super::{created, ApiError};

/// Bind a port on a host to its network's local vlan
pub async fn create_localvlan(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateLocalVlanRequest>,
) -> Result<(StatusCode, Json<PortVlanMapping>), ApiError> {
    let mapping = state.engine.create_localvlan(&req).await?;
    Ok(created(mapping))
}

/// Remove a port's local vlan binding
pub async fn delete_localvlan(
    State(state): State<Arc<AppState>>,
    Path(port_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_localvlan(&port_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
