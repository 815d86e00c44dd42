use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Executor, Pool, Sqlite};

use crate::models::*;
use super::row_helpers::map_port_row;

const SELECT_PORT: &str = r#"
    SELECT id, tenant_id, network_id, device_id, device_owner, status,
           admin_state_up, binding_host_id, mac_address, ip_address, subnet_id,
           created_at, updated_at
    FROM ports
"#;

/// Port database operations
pub struct PortRepo;

impl PortRepo {
    pub async fn list(pool: &Pool<Sqlite>) -> Result<Vec<Port>> {
        let rows = sqlx::query(&format!("{} ORDER BY id", SELECT_PORT))
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_port_row).collect())
    }

    pub async fn get(pool: &Pool<Sqlite>, id: &str) -> Result<Option<Port>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_PORT))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_port_row))
    }

    /// Insert without reading back, usable inside a transaction
    pub async fn insert<'e, E>(executor: E, req: &PortRequest) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let (ip_address, subnet_id) = req
            .primary_ip()
            .map(|ip| (ip.ip_address.as_str(), ip.subnet_id.as_str()))
            .unwrap_or(("", ""));

        sqlx::query(
            r#"INSERT INTO ports (id, tenant_id, network_id, device_id, device_owner, status, admin_state_up,
                                  binding_host_id, mac_address, ip_address, subnet_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&req.id)
        .bind(&req.tenant_id)
        .bind(&req.network_id)
        .bind(&req.device_id)
        .bind(&req.device_owner)
        .bind(&req.status)
        .bind(req.admin_state_up)
        .bind(&req.binding_host_id)
        .bind(&req.mac_address)
        .bind(ip_address)
        .bind(subnet_id)
        .bind(now)
        .bind(now)
        .execute(executor)
        .await
        .map_err(|e| super::insert_error(e, "Port", &req.id))?;
        Ok(())
    }

    pub async fn create(pool: &Pool<Sqlite>, req: &PortRequest) -> Result<Port> {
        Self::insert(pool, req).await?;
        Self::get(pool, &req.id)
            .await?
            .context("Port not found after creation")
    }

    pub async fn update(pool: &Pool<Sqlite>, id: &str, req: &PortRequest) -> Result<Port> {
        let (ip_address, subnet_id) = req
            .primary_ip()
            .map(|ip| (ip.ip_address.as_str(), ip.subnet_id.as_str()))
            .unwrap_or(("", ""));

        let result = sqlx::query(
            r#"UPDATE ports SET tenant_id = ?, network_id = ?, device_id = ?, device_owner = ?, status = ?,
                               admin_state_up = ?, binding_host_id = ?, mac_address = ?, ip_address = ?,
                               subnet_id = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&req.tenant_id)
        .bind(&req.network_id)
        .bind(&req.device_id)
        .bind(&req.device_owner)
        .bind(&req.status)
        .bind(req.admin_state_up)
        .bind(&req.binding_host_id)
        .bind(&req.mac_address)
        .bind(ip_address)
        .bind(subnet_id)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Port", id).into());
        }

        Self::get(pool, id)
            .await?
            .context("Port not found after update")
    }

    pub async fn delete(pool: &Pool<Sqlite>, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM ports WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Port", id).into());
        }
        Ok(())
    }

    pub async fn delete_all<'e, E>(executor: E) -> Result<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM ports").execute(executor).await?;
        Ok(result.rows_affected())
    }
}
