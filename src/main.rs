mod config;
mod db;
mod drivers;
mod engine;
mod handlers;
mod models;
mod registry;
mod router;
mod topology;
mod utils;
mod vlan;

use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use db::Store;
use drivers::DriverRegistry;
use engine::{ProvisioningEngine, SwitchCredentials};
use registry::{HttpTunnelPeerRegistry, RegisteredTorPeers, TunnelPeerRegistry};
use topology::{SnmpLldpSource, TopologyRefresher};

/// Application state shared across handlers
pub struct AppState {
    pub store: Store,
    pub config: Config,
    pub engine: Arc<ProvisioningEngine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "torconf=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let cfg = Config::load();
    if cfg.switch_pass.is_empty() {
        tracing::warn!("SWITCH_PASS not set - switch sessions will use an empty password");
    }
    tracing::info!("Starting {}", cfg.app_name);
    tracing::info!("Database: {}", cfg.db_path);
    tracing::info!("Listen: {}", cfg.listen_addr);

    // Initialize database
    let store = Store::with_pool_size(&cfg.db_path, cfg.db_max_connections).await?;
    tracing::info!("Database initialized (pool_size={})", cfg.db_max_connections);

    let drivers = DriverRegistry::from_config(&cfg);
    let discovery = Arc::new(SnmpLldpSource::new(&cfg.snmpwalk_bin, &cfg.snmp_community));

    let peers: Arc<dyn TunnelPeerRegistry> = if cfg.tunnel_registry_url.is_empty() {
        Arc::new(RegisteredTorPeers::new(store.clone()))
    } else {
        tracing::info!("Tunnel peers from {}", cfg.tunnel_registry_url);
        Arc::new(HttpTunnelPeerRegistry::new(
            &cfg.tunnel_registry_url,
            cfg.driver_timeout_secs,
        )?)
    };

    let engine = Arc::new(
        ProvisioningEngine::bootstrap(
            store.clone(),
            drivers,
            discovery,
            peers,
            SwitchCredentials {
                user: cfg.switch_user.clone(),
                pass: cfg.switch_pass.clone(),
            },
        )
        .await?,
    );

    // Periodic topology refresh
    let mut refresher = None;
    if cfg.topology_refresh_secs > 0 {
        let mut r = TopologyRefresher::new(engine.clone(), cfg.topology_refresh_secs);
        r.start();
        refresher = Some(r);
    }

    // Create app state
    let state = Arc::new(AppState {
        store,
        config: cfg.clone(),
        engine,
    });

    // Build router
    let app = router::build(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!("{} listening on {}", cfg.app_name, cfg.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(mut r) = refresher {
        r.stop();
    }
    tracing::info!("{} shutting down", cfg.app_name);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
