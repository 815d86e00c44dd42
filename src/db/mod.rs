mod localvlans;
mod networks;
mod ports;
pub(crate) mod row_helpers;
mod subnets;
mod tors;
mod tunnels;

use anyhow::{Context, Result};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

use crate::models::*;

/// Typed error for "resource not found", downcast by the error mapping layers
#[derive(Debug)]
pub struct NotFoundError {
    pub resource: String,
    pub id: String,
}

impl NotFoundError {
    pub fn new(resource: &str, id: &str) -> Self {
        Self {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} not found: {}", self.resource, self.id)
    }
}

impl std::error::Error for NotFoundError {}

/// Typed error for a unique-key conflict on insert
#[derive(Debug)]
pub struct DuplicateKeyError {
    pub resource: String,
    pub id: String,
}

impl DuplicateKeyError {
    pub fn new(resource: &str, id: &str) -> Self {
        Self {
            resource: resource.to_string(),
            id: id.to_string(),
        }
    }
}

impl std::fmt::Display for DuplicateKeyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} already exists: {}", self.resource, self.id)
    }
}

impl std::error::Error for DuplicateKeyError {}

/// Convert an insert failure into `DuplicateKeyError` when it is a unique
/// violation, otherwise keep the database error.
pub(crate) fn insert_error(err: sqlx::Error, resource: &str, id: &str) -> anyhow::Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            DuplicateKeyError::new(resource, id).into()
        }
        _ => anyhow::Error::new(err).context(format!("Failed to insert {} {}", resource, id)),
    }
}

/// Store handles all database operations, delegating to per-entity repo modules.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Create a new database store with a specific pool size
    pub async fn with_pool_size(db_path: &str, max_connections: u32) -> Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&db_url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database, one connection so every query sees it
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Run a raw statement against the test database
    #[cfg(test)]
    pub async fn execute_raw(&self, sql: &str) -> Result<()> {
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    // ========== Network Operations ==========

    pub async fn list_networks(&self) -> Result<Vec<Network>> {
        networks::NetworkRepo::list(&self.pool).await
    }

    pub async fn get_network(&self, id: &str) -> Result<Option<Network>> {
        networks::NetworkRepo::get(&self.pool, id).await
    }

    pub async fn create_network(&self, req: &NetworkRequest) -> Result<Network> {
        networks::NetworkRepo::create(&self.pool, req).await
    }

    pub async fn update_network(&self, id: &str, req: &NetworkRequest) -> Result<Network> {
        networks::NetworkRepo::update(&self.pool, id, req).await
    }

    pub async fn delete_network(&self, id: &str) -> Result<()> {
        networks::NetworkRepo::delete(&self.pool, id).await
    }

    // ========== Port Operations ==========

    pub async fn list_ports(&self) -> Result<Vec<Port>> {
        ports::PortRepo::list(&self.pool).await
    }

    pub async fn get_port(&self, id: &str) -> Result<Option<Port>> {
        ports::PortRepo::get(&self.pool, id).await
    }

    pub async fn create_port(&self, req: &PortRequest) -> Result<Port> {
        ports::PortRepo::create(&self.pool, req).await
    }

    pub async fn update_port(&self, id: &str, req: &PortRequest) -> Result<Port> {
        ports::PortRepo::update(&self.pool, id, req).await
    }

    pub async fn delete_port(&self, id: &str) -> Result<()> {
        ports::PortRepo::delete(&self.pool, id).await
    }

    // ========== Subnet Operations ==========

    pub async fn list_subnets(&self) -> Result<Vec<Subnet>> {
        subnets::SubnetRepo::list(&self.pool).await
    }

    pub async fn get_subnet(&self, id: &str) -> Result<Option<Subnet>> {
        subnets::SubnetRepo::get(&self.pool, id).await
    }

    pub async fn create_subnet(&self, req: &SubnetRequest) -> Result<Subnet> {
        subnets::SubnetRepo::create(&self.pool, req).await
    }

    pub async fn update_subnet(&self, id: &str, req: &SubnetRequest) -> Result<Subnet> {
        subnets::SubnetRepo::update(&self.pool, id, req).await
    }

    pub async fn delete_subnet(&self, id: &str) -> Result<()> {
        subnets::SubnetRepo::delete(&self.pool, id).await
    }

    // ========== Sync Operations ==========

    /// Replace all networks, ports and subnets atomically
    pub async fn replace_cloud_state(&self, req: &SyncRequest) -> Result<SyncResult> {
        let mut tx = self.pool.begin().await?;

        networks::NetworkRepo::delete_all(&mut *tx).await?;
        ports::PortRepo::delete_all(&mut *tx).await?;
        subnets::SubnetRepo::delete_all(&mut *tx).await?;

        for net in &req.networks {
            networks::NetworkRepo::insert(&mut *tx, net).await?;
        }
        for port in &req.ports {
            ports::PortRepo::insert(&mut *tx, port).await?;
        }
        for subnet in &req.subnets {
            subnets::SubnetRepo::insert(&mut *tx, subnet).await?;
        }

        tx.commit().await.context("Failed to commit sync")?;

        Ok(SyncResult {
            networks: req.networks.len(),
            ports: req.ports.len(),
            subnets: req.subnets.len(),
        })
    }

    // ========== ToR Switch Operations ==========

    pub async fn list_tors(&self) -> Result<Vec<TorSwitch>> {
        tors::TorRepo::list(&self.pool).await
    }

    pub async fn get_tor(&self, tor_ip: &str) -> Result<Option<TorSwitch>> {
        tors::TorRepo::get(&self.pool, tor_ip).await
    }

    pub async fn create_tor(&self, tor_ip: &str, tunnel_src_ip: &str, switch_type: &str) -> Result<TorSwitch> {
        tors::TorRepo::create(&self.pool, tor_ip, tunnel_src_ip, switch_type).await
    }

    pub async fn delete_tor(&self, tor_ip: &str) -> Result<()> {
        tors::TorRepo::delete(&self.pool, tor_ip).await
    }

    // ========== Tunnel Operations ==========

    pub async fn list_tunnels(&self) -> Result<Vec<TorTunnel>> {
        tunnels::TunnelRepo::list(&self.pool).await
    }

    /// Tunnels owned by (originating at) a switch
    pub async fn list_tunnels_from(&self, tor_ip: &str) -> Result<Vec<TorTunnel>> {
        tunnels::TunnelRepo::list_from(&self.pool, tor_ip).await
    }

    /// Tunnels terminating at a transport address
    pub async fn list_tunnels_to(&self, dst_addr: &str) -> Result<Vec<TorTunnel>> {
        tunnels::TunnelRepo::list_to(&self.pool, dst_addr).await
    }

    pub async fn find_tunnel(&self, tor_ip: &str, dst_addr: &str) -> Result<Option<TorTunnel>> {
        tunnels::TunnelRepo::find(&self.pool, tor_ip, dst_addr).await
    }

    pub async fn create_tunnel(&self, tunnel: &TorTunnel) -> Result<()> {
        tunnels::TunnelRepo::create(&self.pool, tunnel).await
    }

    pub async fn delete_tunnel(&self, tor_ip: &str, tunnel_id: TunnelId) -> Result<()> {
        tunnels::TunnelRepo::delete(&self.pool, tor_ip, tunnel_id).await
    }

    // ========== Vlan Allocation Operations ==========

    pub async fn list_vlan_allocations(&self) -> Result<Vec<VlanAllocation>> {
        localvlans::LocalVlanRepo::list_allocations(&self.pool).await
    }

    pub async fn create_vlan_allocation(&self, va: &VlanAllocation) -> Result<()> {
        localvlans::LocalVlanRepo::create_allocation(&self.pool, va).await
    }

    pub async fn delete_vlan_allocation(&self, tor_ip: &str, network_id: &str) -> Result<()> {
        localvlans::LocalVlanRepo::delete_allocation(&self.pool, tor_ip, network_id).await
    }

    // ========== Port Vlan Mapping Operations ==========

    pub async fn list_port_vlan_mappings(&self) -> Result<Vec<PortVlanMapping>> {
        localvlans::LocalVlanRepo::list_mappings(&self.pool).await
    }

    pub async fn get_port_vlan_mapping(&self, port_id: &str) -> Result<Option<PortVlanMapping>> {
        localvlans::LocalVlanRepo::get_mapping(&self.pool, port_id).await
    }

    pub async fn create_port_vlan_mapping(&self, pvm: &PortVlanMapping) -> Result<()> {
        localvlans::LocalVlanRepo::create_mapping(&self.pool, pvm).await
    }

    pub async fn delete_port_vlan_mapping(&self, port_id: &str) -> Result<()> {
        localvlans::LocalVlanRepo::delete_mapping(&self.pool, port_id).await
    }

    /// Mappings on a switch that belong to a network
    pub async fn count_mappings_by_network(&self, tor_ip: &str, network_id: &str) -> Result<i64> {
        localvlans::LocalVlanRepo::count_by_network(&self.pool, tor_ip, network_id).await
    }

    /// Mappings of a network across all switches
    pub async fn count_network_mappings(&self, network_id: &str) -> Result<i64> {
        localvlans::LocalVlanRepo::count_by_network_anywhere(&self.pool, network_id).await
    }

    /// Mappings on a switch that use an interface
    pub async fn count_mappings_by_index(&self, tor_ip: &str, if_index: u32) -> Result<i64> {
        localvlans::LocalVlanRepo::count_by_index(&self.pool, tor_ip, if_index).await
    }

    /// Whether the (vlan, interface) binding is already programmed on a switch
    pub async fn mapping_exists(&self, tor_ip: &str, vlan_id: u16, if_index: u32) -> Result<bool> {
        localvlans::LocalVlanRepo::exists(&self.pool, tor_ip, vlan_id, if_index).await
    }

    // ========== VSI Operations ==========

    pub async fn list_vsis_by_tor(&self, tor_ip: &str) -> Result<Vec<VsiRecord>> {
        localvlans::LocalVlanRepo::list_vsis_by_tor(&self.pool, tor_ip).await
    }

    pub async fn create_vsi(&self, vsi: &VsiRecord) -> Result<()> {
        localvlans::LocalVlanRepo::create_vsi(&self.pool, vsi).await
    }

    pub async fn delete_vsi(&self, tor_ip: &str, vxlan: u32) -> Result<()> {
        localvlans::LocalVlanRepo::delete_vsi(&self.pool, tor_ip, vxlan).await
    }
}
