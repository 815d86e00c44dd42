use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::models::*;
use crate::AppState;

use super::{created, require_uuid, ApiError};

pub(super) fn prepare_subnet(req: &mut SubnetRequest) -> Result<(), ApiError> {
    if req.id.is_empty() {
        req.id = uuid::Uuid::new_v4().to_string();
    }
    require_uuid("subnet", &req.id)?;
    require_uuid("network", &req.network_id)
}

/// List all subnets
pub async fn list_subnets(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Subnet>>, ApiError> {
    let subnets = state.store.list_subnets().await?;
    Ok(Json(subnets))
}

/// Get a single subnet by ID
pub async fn get_subnet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Subnet>, ApiError> {
    let subnet = state
        .store
        .get_subnet(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("subnet"))?;
    Ok(Json(subnet))
}

/// Create a subnet
pub async fn create_subnet(
    State(state): State<Arc<AppState>>,
    Json(mut req): Json<SubnetRequest>,
) -> Result<(StatusCode, Json<Subnet>), ApiError> {
    prepare_subnet(&mut req)?;
    let subnet = state.store.create_subnet(&req).await?;
    Ok(created(subnet))
}

/// Update an existing subnet
pub async fn update_subnet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut req): Json<SubnetRequest>,
) -> Result<Json<Subnet>, ApiError> {
    req.id = id.clone();
    prepare_subnet(&mut req)?;
    let subnet = state.store.update_subnet(&id, &req).await?;
    Ok(Json(subnet))
}

/// Delete a subnet
pub async fn delete_subnet(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_subnet(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
