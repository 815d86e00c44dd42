use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Executor, Pool, Sqlite};

use crate::models::*;
use super::row_helpers::map_subnet_row;

const SELECT_SUBNET: &str = r#"
    SELECT id, tenant_id, network_id, shared, enable_dhcp, created_at, updated_at
    FROM subnets
"#;

/// Subnet database operations
pub struct SubnetRepo;

impl SubnetRepo {
    pub async fn list(pool: &Pool<Sqlite>) -> Result<Vec<Subnet>> {
        let rows = sqlx::query(&format!("{} ORDER BY id", SELECT_SUBNET))
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_subnet_row).collect())
    }

    pub async fn get(pool: &Pool<Sqlite>, id: &str) -> Result<Option<Subnet>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_SUBNET))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_subnet_row))
    }

    pub async fn insert<'e, E>(executor: E, req: &SubnetRequest) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO subnets (id, tenant_id, network_id, shared, enable_dhcp, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&req.id)
        .bind(&req.tenant_id)
        .bind(&req.network_id)
        .bind(req.shared)
        .bind(req.enable_dhcp)
        .bind(now)
        .bind(now)
        .execute(executor)
        .await
        .map_err(|e| super::insert_error(e, "Subnet", &req.id))?;
        Ok(())
    }

    pub async fn create(pool: &Pool<Sqlite>, req: &SubnetRequest) -> Result<Subnet> {
        Self::insert(pool, req).await?;
        Self::get(pool, &req.id)
            .await?
            .context("Subnet not found after creation")
    }

    pub async fn update(pool: &Pool<Sqlite>, id: &str, req: &SubnetRequest) -> Result<Subnet> {
        let result = sqlx::query(
            r#"UPDATE subnets SET tenant_id = ?, network_id = ?, shared = ?, enable_dhcp = ?, updated_at = ? WHERE id = ?"#,
        )
        .bind(&req.tenant_id)
        .bind(&req.network_id)
        .bind(req.shared)
        .bind(req.enable_dhcp)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Subnet", id).into());
        }

        Self::get(pool, id)
            .await?
            .context("Subnet not found after update")
    }

    pub async fn delete(pool: &Pool<Sqlite>, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM subnets WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Subnet", id).into());
        }
        Ok(())
    }

    pub async fn delete_all<'e, E>(executor: E) -> Result<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM subnets").execute(executor).await?;
        Ok(result.rows_affected())
    }
}
