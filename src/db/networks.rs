use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Executor, Pool, Sqlite};

use crate::models::*;
use super::row_helpers::map_network_row;

const SELECT_NETWORK: &str = r#"
    SELECT id, tenant_id, segmentation_type, segmentation_id,
           admin_state_up, shared, created_at, updated_at
    FROM networks
"#;

/// Network database operations
pub struct NetworkRepo;

impl NetworkRepo {
    pub async fn list(pool: &Pool<Sqlite>) -> Result<Vec<Network>> {
        let rows = sqlx::query(&format!("{} ORDER BY id", SELECT_NETWORK))
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_network_row).collect())
    }

    pub async fn get(pool: &Pool<Sqlite>, id: &str) -> Result<Option<Network>> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_NETWORK))
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_network_row))
    }

    /// Insert without reading back, usable inside a transaction
    pub async fn insert<'e, E>(executor: E, req: &NetworkRequest) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO networks (id, tenant_id, segmentation_type, segmentation_id, admin_state_up, shared, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&req.id)
        .bind(&req.tenant_id)
        .bind(&req.segmentation_type)
        .bind(req.segmentation_id)
        .bind(req.admin_state_up)
        .bind(req.shared)
        .bind(now)
        .bind(now)
        .execute(executor)
        .await
        .map_err(|e| super::insert_error(e, "Network", &req.id))?;
        Ok(())
    }

    pub async fn create(pool: &Pool<Sqlite>, req: &NetworkRequest) -> Result<Network> {
        Self::insert(pool, req).await?;
        Self::get(pool, &req.id)
            .await?
            .context("Network not found after creation")
    }

    pub async fn update(pool: &Pool<Sqlite>, id: &str, req: &NetworkRequest) -> Result<Network> {
        let result = sqlx::query(
            r#"UPDATE networks SET tenant_id = ?, segmentation_type = ?, segmentation_id = ?, admin_state_up = ?, shared = ?, updated_at = ? WHERE id = ?"#,
        )
        .bind(&req.tenant_id)
        .bind(&req.segmentation_type)
        .bind(req.segmentation_id)
        .bind(req.admin_state_up)
        .bind(req.shared)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Network", id).into());
        }

        Self::get(pool, id)
            .await?
            .context("Network not found after update")
    }

    pub async fn delete(pool: &Pool<Sqlite>, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM networks WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("Network", id).into());
        }
        Ok(())
    }

    pub async fn delete_all<'e, E>(executor: E) -> Result<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query("DELETE FROM networks").execute(executor).await?;
        Ok(result.rows_affected())
    }
}
