pub mod localvlans;
pub mod networks;
pub mod ports;
pub mod subnets;
pub mod sync;
pub mod topology;
pub mod tors;

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::db::{DuplicateKeyError, NotFoundError};
use crate::engine::ProvisionError;
use crate::models::AppInfo;
use crate::AppState;

/// Error response body: {"error": "message"}
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// API error type
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn not_found(resource: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("{} not found", resource),
        }
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse::new(self.message)),
        )
            .into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        // Typed store errors first
        if let Some(nf) = err.downcast_ref::<NotFoundError>() {
            return Self {
                status: StatusCode::NOT_FOUND,
                message: nf.to_string(),
            };
        }
        if let Some(dup) = err.downcast_ref::<DuplicateKeyError>() {
            return Self::bad_request(dup.to_string());
        }
        tracing::error!("Store error: {:#}", err);
        Self::internal(err.to_string())
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::NotFound(msg) => Self {
                status: StatusCode::NOT_FOUND,
                message: msg,
            },
            ProvisionError::BadRequest(msg) => Self::bad_request(msg),
            e @ ProvisionError::NoAvailableVlan { .. } => Self::service_unavailable(e.to_string()),
            e @ ProvisionError::TorConfig { .. } => {
                tracing::warn!("{}", e);
                Self::service_unavailable(e.to_string())
            }
            ProvisionError::Store(e) => e.into(),
        }
    }
}

/// Response helper: return 201 Created with JSON body
pub fn created<T: Serialize>(item: T) -> (StatusCode, Json<T>) {
    (StatusCode::CREATED, Json(item))
}

/// Application name and version
pub async fn index(State(state): State<Arc<AppState>>) -> Json<AppInfo> {
    Json(AppInfo {
        application: state.config.app_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Healthcheck endpoint, returns 200 OK with status
pub async fn healthcheck() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "torconf",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Reject ids that are not UUIDs
pub(crate) fn require_uuid(kind: &str, id: &str) -> Result<(), ApiError> {
    if crate::utils::is_valid_uuid(id) {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!("Invalid {} id: {}", kind, id)))
    }
}
