use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Build the application router with all routes
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/healthz", get(handlers::healthcheck))
        // ToR switch routes
        .route("/api/tors", get(handlers::tors::list_tors))
        .route("/api/tors", post(handlers::tors::create_tor))
        .route("/api/tors/:ip", delete(handlers::tors::delete_tor))
        // Local vlan routes
        .route("/api/localvlans", post(handlers::localvlans::create_localvlan))
        .route("/api/localvlans/:port_id", delete(handlers::localvlans::delete_localvlan))
        // Topology routes
        .route("/api/topology", get(handlers::topology::get_topology))
        .route("/api/topology/refresh", post(handlers::topology::refresh_topology))
        // Network routes
        .route("/api/networks", get(handlers::networks::list_networks))
        .route("/api/networks", post(handlers::networks::create_network))
        .route("/api/networks/:id", get(handlers::networks::get_network))
        .route("/api/networks/:id", put(handlers::networks::update_network))
        .route("/api/networks/:id", delete(handlers::networks::delete_network))
        // Port routes
        .route("/api/ports", get(handlers::ports::list_ports))
        .route("/api/ports", post(handlers::ports::create_port))
        .route("/api/ports/:id", get(handlers::ports::get_port))
        .route("/api/ports/:id", put(handlers::ports::update_port))
        .route("/api/ports/:id", delete(handlers::ports::delete_port))
        // Subnet routes
        .route("/api/subnets", get(handlers::subnets::list_subnets))
        .route("/api/subnets", post(handlers::subnets::create_subnet))
        .route("/api/subnets/:id", get(handlers::subnets::get_subnet))
        .route("/api/subnets/:id", put(handlers::subnets::update_subnet))
        .route("/api/subnets/:id", delete(handlers::subnets::delete_subnet))
        // Cloud state sync
        .route("/api/sync", post(handlers::sync::sync_cloud_state))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}
