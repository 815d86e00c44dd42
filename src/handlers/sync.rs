use axum::{extract::State, Json};
use std::sync::Arc;

use crate::models::*;
use crate::AppState;

use super::networks::prepare_network;
use super::ports::prepare_port;
use super::subnets::prepare_subnet;
use super::ApiError;

/// Replace all networks, ports and subnets with the posted cloud state
pub async fn sync_cloud_state(
    State(state): State<Arc<AppState>>,
    Json(mut req): Json<SyncRequest>,
) -> Result<Json<SyncResult>, ApiError> {
    for net in req.networks.iter_mut() {
        prepare_network(net)?;
    }
    for port in req.ports.iter_mut() {
        prepare_port(port)?;
    }
    for subnet in req.subnets.iter_mut() {
        prepare_subnet(subnet)?;
    }

    let result = state.store.replace_cloud_state(&req).await?;
    tracing::info!(
        "Cloud state synced: {} networks, {} ports, {} subnets",
        result.networks,
        result.ports,
        result.subnets
    );
    Ok(Json(result))
}
