//! Provisioning workflows for the ToR fabric.
//!
//! The engine owns the derived in-memory state (vlan pools, topology) and
//! composes it with the store, the switch drivers and the tunnel peer
//! registry. Workflows on one switch are serialized by its `TorLocks` entry;
//! mesh changes (`create_tor`, `delete_tor`) additionally take the mesh lock.

mod localvlan;
mod tor;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;

use crate::db::{DuplicateKeyError, NotFoundError, Store};
use crate::drivers::{DriverError, DriverRegistry, SwitchDriver};
use crate::models::{TorSwitch, TopologyView};
use crate::registry::TunnelPeerRegistry;
use crate::topology::{DiscoverySource, TopologyModel};
use crate::vlan::VlanAllocator;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("no available vlan on {tor_ip} for {network_id}")]
    NoAvailableVlan { tor_ip: String, network_id: String },
    #[error("switch {tor_ip} configuration failed: {source}")]
    TorConfig { tor_ip: String, source: DriverError },
    #[error(transparent)]
    Store(anyhow::Error),
}

impl ProvisionError {
    fn tor_config(tor_ip: &str) -> impl FnOnce(DriverError) -> ProvisionError + '_ {
        move |source| ProvisionError::TorConfig {
            tor_ip: tor_ip.to_string(),
            source,
        }
    }
}

impl From<anyhow::Error> for ProvisionError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(nf) = err.downcast_ref::<NotFoundError>() {
            return ProvisionError::NotFound(nf.to_string());
        }
        if let Some(dup) = err.downcast_ref::<DuplicateKeyError>() {
            return ProvisionError::BadRequest(dup.to_string());
        }
        ProvisionError::Store(err)
    }
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Credentials every driver session is opened with
#[derive(Debug, Clone, Default)]
pub struct SwitchCredentials {
    pub user: String,
    pub pass: String,
}

/// One async mutex per switch ip
#[derive(Default)]
pub struct TorLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TorLocks {
    pub async fn lock(&self, tor_ip: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(tor_ip.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

pub struct ProvisioningEngine {
    store: Store,
    drivers: DriverRegistry,
    peers: Arc<dyn TunnelPeerRegistry>,
    credentials: SwitchCredentials,
    topology: TopologyModel,
    vlans: Mutex<VlanAllocator>,
    locks: TorLocks,
    mesh_lock: tokio::sync::Mutex<()>,
}

impl ProvisioningEngine {
    /// Build the engine from persisted state and a first topology discovery
    pub async fn bootstrap(
        store: Store,
        drivers: DriverRegistry,
        discovery: Arc<dyn DiscoverySource>,
        peers: Arc<dyn TunnelPeerRegistry>,
        credentials: SwitchCredentials,
    ) -> anyhow::Result<Self> {
        let allocations = store.list_vlan_allocations().await?;
        let mut vlans = VlanAllocator::seed(&allocations);

        let tors = store.list_tors().await?;
        let tor_ips: Vec<String> = tors.iter().map(|t| t.tor_ip.clone()).collect();
        for tor_ip in &tor_ips {
            vlans.register_tor(tor_ip);
        }

        let topology = TopologyModel::new(discovery);
        topology.rebuild(&tor_ips).await;

        tracing::info!(
            "Provisioning engine ready: {} switches, {} vlan allocations",
            tors.len(),
            allocations.len()
        );

        Ok(Self {
            store,
            drivers,
            peers,
            credentials,
            topology,
            vlans: Mutex::new(vlans),
            locks: TorLocks::default(),
            mesh_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn topology(&self) -> &TopologyModel {
        &self.topology
    }

    /// Current topology snapshot
    pub fn index_topology(&self) -> TopologyView {
        self.topology.view()
    }

    /// Rediscover every registered switch
    pub async fn refresh_topology(&self) -> ProvisionResult<TopologyView> {
        let tor_ips: Vec<String> = self
            .store
            .list_tors()
            .await?
            .into_iter()
            .map(|t| t.tor_ip)
            .collect();
        self.topology.rebuild(&tor_ips).await;
        Ok(self.topology.view())
    }

    fn vlans(&self) -> MutexGuard<'_, VlanAllocator> {
        self.vlans.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn driver_for(&self, tor: &TorSwitch) -> ProvisionResult<Arc<dyn SwitchDriver>> {
        self.drivers.get(&tor.switch_type).ok_or_else(|| ProvisionError::TorConfig {
            tor_ip: tor.tor_ip.clone(),
            source: DriverError::Unavailable(tor.switch_type.clone()),
        })
    }

    /// Driver for a switch with a session ready to use
    async fn connect(&self, tor: &TorSwitch) -> ProvisionResult<Arc<dyn SwitchDriver>> {
        let driver = self.driver_for(tor)?;
        driver
            .initialize(&tor.tor_ip, &self.credentials.user, &self.credentials.pass)
            .await
            .map_err(ProvisionError::tor_config(&tor.tor_ip))?;
        Ok(driver)
    }

    async fn require_tor(&self, tor_ip: &str) -> ProvisionResult<TorSwitch> {
        self.store
            .get_tor(tor_ip)
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("ToR switch not found: {}", tor_ip)))
    }
}
