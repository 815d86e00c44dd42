use anyhow::Result;
use sqlx::{Pool, Sqlite};

use crate::models::*;
use super::row_helpers::{map_port_vlan_mapping_row, map_vlan_allocation_row, map_vsi_row};

const SELECT_MAPPING: &str =
    "SELECT port_id, network_id, tor_ip, vlan_id, if_index FROM port_vlan_mappings";

/// Local vlan state: allocations, port mappings and vsi records
pub struct LocalVlanRepo;

impl LocalVlanRepo {
    // ========== Allocations ==========

    pub async fn list_allocations(pool: &Pool<Sqlite>) -> Result<Vec<VlanAllocation>> {
        let rows = sqlx::query(
            "SELECT network_id, tor_ip, vlan_id, allocated, shared FROM vlan_allocations ORDER BY tor_ip, vlan_id",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows.iter().map(map_vlan_allocation_row).collect())
    }

    pub async fn create_allocation(pool: &Pool<Sqlite>, va: &VlanAllocation) -> Result<()> {
        sqlx::query(
            "INSERT INTO vlan_allocations (network_id, tor_ip, vlan_id, allocated, shared) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&va.network_id)
        .bind(&va.tor_ip)
        .bind(va.vlan_id)
        .bind(va.allocated)
        .bind(va.shared)
        .execute(pool)
        .await
        .map_err(|e| {
            super::insert_error(e, "Vlan allocation", &format!("{}/{}", va.tor_ip, va.network_id))
        })?;
        Ok(())
    }

    /// Remove every allocation class of a network on a switch; absent rows are fine
    pub async fn delete_allocation(pool: &Pool<Sqlite>, tor_ip: &str, network_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM vlan_allocations WHERE tor_ip = ? AND network_id = ?")
            .bind(tor_ip)
            .bind(network_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    // ========== Port vlan mappings ==========

    pub async fn list_mappings(pool: &Pool<Sqlite>) -> Result<Vec<PortVlanMapping>> {
        let rows = sqlx::query(&format!("{} ORDER BY tor_ip, port_id", SELECT_MAPPING))
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_port_vlan_mapping_row).collect())
    }

    pub async fn get_mapping(pool: &Pool<Sqlite>, port_id: &str) -> Result<Option<PortVlanMapping>> {
        let row = sqlx::query(&format!("{} WHERE port_id = ?", SELECT_MAPPING))
            .bind(port_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_port_vlan_mapping_row))
    }

    pub async fn create_mapping(pool: &Pool<Sqlite>, pvm: &PortVlanMapping) -> Result<()> {
        sqlx::query(
            "INSERT INTO port_vlan_mappings (port_id, network_id, tor_ip, vlan_id, if_index) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&pvm.port_id)
        .bind(&pvm.network_id)
        .bind(&pvm.tor_ip)
        .bind(pvm.vlan_id)
        .bind(pvm.if_index)
        .execute(pool)
        .await
        .map_err(|e| super::insert_error(e, "Port vlan mapping", &pvm.port_id))?;
        Ok(())
    }

    pub async fn delete_mapping(pool: &Pool<Sqlite>, port_id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM port_vlan_mappings WHERE port_id = ?")
            .bind(port_id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Port vlan mapping", port_id).into());
        }
        Ok(())
    }

    pub async fn count_by_network(pool: &Pool<Sqlite>, tor_ip: &str, network_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM port_vlan_mappings WHERE tor_ip = ? AND network_id = ?",
        )
        .bind(tor_ip)
        .bind(network_id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    pub async fn count_by_network_anywhere(pool: &Pool<Sqlite>, network_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM port_vlan_mappings WHERE network_id = ?",
        )
        .bind(network_id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    pub async fn count_by_index(pool: &Pool<Sqlite>, tor_ip: &str, if_index: u32) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM port_vlan_mappings WHERE tor_ip = ? AND if_index = ?",
        )
        .bind(tor_ip)
        .bind(if_index)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    pub async fn exists(pool: &Pool<Sqlite>, tor_ip: &str, vlan_id: u16, if_index: u32) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM port_vlan_mappings WHERE tor_ip = ? AND vlan_id = ? AND if_index = ?",
        )
        .bind(tor_ip)
        .bind(vlan_id)
        .bind(if_index)
        .fetch_one(pool)
        .await?;
        Ok(count > 0)
    }

    // ========== VSI records ==========

    pub async fn list_vsis_by_tor(pool: &Pool<Sqlite>, tor_ip: &str) -> Result<Vec<VsiRecord>> {
        let rows = sqlx::query("SELECT tor_ip, vxlan FROM tor_vsis WHERE tor_ip = ? ORDER BY vxlan")
            .bind(tor_ip)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_vsi_row).collect())
    }

    /// Record a vsi; recording an existing one is a no-op
    pub async fn create_vsi(pool: &Pool<Sqlite>, vsi: &VsiRecord) -> Result<()> {
        sqlx::query("INSERT INTO tor_vsis (tor_ip, vxlan) VALUES (?, ?) ON CONFLICT (tor_ip, vxlan) DO NOTHING")
            .bind(&vsi.tor_ip)
            .bind(vsi.vxlan)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn delete_vsi(pool: &Pool<Sqlite>, tor_ip: &str, vxlan: u32) -> Result<()> {
        sqlx::query("DELETE FROM tor_vsis WHERE tor_ip = ? AND vxlan = ?")
            .bind(tor_ip)
            .bind(vxlan)
            .execute(pool)
            .await?;
        Ok(())
    }
}
