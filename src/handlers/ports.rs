use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::models::*;
use crate::utils::normalize_mac;
use crate::AppState;

use super::{created, require_uuid, ApiError};

pub(super) fn prepare_port(req: &mut PortRequest) -> Result<(), ApiError> {
    if req.id.is_empty() {
        req.id = uuid::Uuid::new_v4().to_string();
    }
    require_uuid("port", &req.id)?;
    require_uuid("network", &req.network_id)?;
    if !req.mac_address.is_empty() {
        req.mac_address = normalize_mac(&req.mac_address);
    }
    Ok(())
}

/// List all ports
pub async fn list_ports(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Port>>, ApiError> {
    let ports = state.store.list_ports().await?;
    Ok(Json(ports))
}

/// Get a single port by ID
pub async fn get_port(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Port>, ApiError> {
    let port = state
        .store
        .get_port(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("port"))?;
    Ok(Json(port))
}

/// Create a port
pub async fn create_port(
    State(state): State<Arc<AppState>>,
    Json(mut req): Json<PortRequest>,
) -> Result<(StatusCode, Json<Port>), ApiError> {
    prepare_port(&mut req)?;
    let port = state.store.create_port(&req).await?;
    Ok(created(port))
}

/// Update an existing port
pub async fn update_port(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut req): Json<PortRequest>,
) -> Result<Json<Port>, ApiError> {
    req.id = id.clone();
    prepare_port(&mut req)?;
    let port = state.store.update_port(&id, &req).await?;
    Ok(Json(port))
}

/// Delete a port
pub async fn delete_port(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_port(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_port() {
        let mut req: PortRequest = serde_json::from_value(serde_json::json!({
            "network_id": "5b0e3d0e-8a4f-4a1c-9d57-0d7c8e2f6b11",
            "binding:host_id": "compute-01",
            "mac_address": "FA-16-3E-00-00-01"
        }))
        .unwrap();
        prepare_port(&mut req).unwrap();
        assert!(crate::utils::is_valid_uuid(&req.id));
        assert_eq!(req.mac_address, "fa:16:3e:00:00:01");

        req.network_id = "n1".to_string();
        assert!(prepare_port(&mut req).is_err());
    }
}
