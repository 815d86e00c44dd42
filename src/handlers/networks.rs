use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::models::*;
use crate::AppState;

use super::{created, require_uuid, ApiError};

/// Fill in a missing id and reject bodies the engine cannot use
pub(super) fn prepare_network(req: &mut NetworkRequest) -> Result<(), ApiError> {
    if req.id.is_empty() {
        req.id = uuid::Uuid::new_v4().to_string();
    }
    require_uuid("network", &req.id)?;

    req.segmentation_type = req.segmentation_type.trim().to_lowercase();
    match req.segmentation_type.as_str() {
        segmentation_type::VXLAN => {
            if req.segmentation_id.is_none() {
                return Err(ApiError::bad_request(
                    "vxlan networks require a segmentation id",
                ));
            }
        }
        segmentation_type::VLAN | segmentation_type::FLAT => {}
        other => {
            return Err(ApiError::bad_request(format!(
                "Unsupported network type: {}",
                other
            )))
        }
    }
    Ok(())
}

/// Whether an update alters what the switch bindings of a network were made from
pub(super) fn changes_binding(current: &Network, req: &NetworkRequest) -> bool {
    current.shared != req.shared
        || current.segmentation_type != req.segmentation_type
        || current.segmentation_id != req.segmentation_id
}

/// List all networks
pub async fn list_networks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Network>>, ApiError> {
    let networks = state.store.list_networks().await?;
    Ok(Json(networks))
}

/// Get a single network by ID
pub async fn get_network(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Network>, ApiError> {
    let network = state
        .store
        .get_network(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("network"))?;
    Ok(Json(network))
}

/// Create a network
pub async fn create_network(
    State(state): State<Arc<AppState>>,
    Json(mut req): Json<NetworkRequest>,
) -> Result<(StatusCode, Json<Network>), ApiError> {
    prepare_network(&mut req)?;
    let network = state.store.create_network(&req).await?;
    tracing::info!("Network {} created (vxlan {:?})", network.id, network.vxlan_id());
    Ok(created(network))
}

/// Update an existing network
pub async fn update_network(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut req): Json<NetworkRequest>,
) -> Result<Json<Network>, ApiError> {
    req.id = id.clone();
    prepare_network(&mut req)?;
    if let Some(current) = state.store.get_network(&id).await? {
        if changes_binding(&current, &req) && state.store.count_network_mappings(&id).await? > 0 {
            return Err(ApiError::bad_request(format!(
                "Network {} has local vlans bound; shared flag and segmentation cannot change",
                id
            )));
        }
    }
    let network = state.store.update_network(&id, &req).await?;
    Ok(Json(network))
}

/// Delete a network
pub async fn delete_network(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.delete_network(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: &str, id: Option<u32>) -> NetworkRequest {
        NetworkRequest {
            id: String::new(),
            tenant_id: "t1".to_string(),
            segmentation_type: kind.to_string(),
            segmentation_id: id,
            admin_state_up: true,
            shared: false,
        }
    }

    #[test]
    fn test_prepare_network_generates_id() {
        let mut req = request("VXLAN", Some(1001));
        prepare_network(&mut req).unwrap();
        assert!(crate::utils::is_valid_uuid(&req.id));
        assert_eq!(req.segmentation_type, "vxlan");
    }

    #[test]
    fn test_changes_binding() {
        let now = chrono::Utc::now();
        let current = Network {
            id: "5b0e3d0e-8a4f-4a1c-9d57-0d7c8e2f6b11".to_string(),
            tenant_id: "t1".to_string(),
            segmentation_type: "vxlan".to_string(),
            segmentation_id: Some(1001),
            admin_state_up: true,
            shared: false,
            created_at: now,
            updated_at: now,
        };
        let mut req = request("vxlan", Some(1001));
        assert!(!changes_binding(&current, &req));

        req.admin_state_up = false;
        assert!(!changes_binding(&current, &req));

        req.shared = true;
        assert!(changes_binding(&current, &req));

        let req = request("vxlan", Some(1002));
        assert!(changes_binding(&current, &req));
    }

    #[test]
    fn test_prepare_network_rejects_bad_bodies() {
        let mut req = request("vxlan", None);
        assert_eq!(prepare_network(&mut req).unwrap_err().status(), StatusCode::BAD_REQUEST);

        let mut req = request("gre", Some(3));
        assert!(prepare_network(&mut req).is_err());

        let mut req = request("vlan", Some(3));
        req.id = "not-a-uuid".to_string();
        assert!(prepare_network(&mut req).is_err());

        let mut req = request("flat", None);
        assert!(prepare_network(&mut req).is_ok());
    }
}
