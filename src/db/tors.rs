use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Pool, Sqlite};

use crate::models::*;
use super::row_helpers::map_tor_row;

/// ToR switch database operations
pub struct TorRepo;

impl TorRepo {
    pub async fn list(pool: &Pool<Sqlite>) -> Result<Vec<TorSwitch>> {
        let rows = sqlx::query(
            "SELECT tor_ip, tunnel_src_ip, switch_type, created_at FROM tor_switches ORDER BY tor_ip",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows.iter().map(map_tor_row).collect())
    }

    pub async fn get(pool: &Pool<Sqlite>, tor_ip: &str) -> Result<Option<TorSwitch>> {
        let row = sqlx::query(
            "SELECT tor_ip, tunnel_src_ip, switch_type, created_at FROM tor_switches WHERE tor_ip = ?",
        )
        .bind(tor_ip)
        .fetch_optional(pool)
        .await?;
        Ok(row.as_ref().map(map_tor_row))
    }

    pub async fn create(
        pool: &Pool<Sqlite>,
        tor_ip: &str,
        tunnel_src_ip: &str,
        switch_type: &str,
    ) -> Result<TorSwitch> {
        sqlx::query(
            "INSERT INTO tor_switches (tor_ip, tunnel_src_ip, switch_type, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(tor_ip)
        .bind(tunnel_src_ip)
        .bind(switch_type)
        .bind(Utc::now())
        .execute(pool)
        .await
        .map_err(|e| super::insert_error(e, "ToR switch", tor_ip))?;

        Self::get(pool, tor_ip)
            .await?
            .context("ToR switch not found after creation")
    }

    pub async fn delete(pool: &Pool<Sqlite>, tor_ip: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM tor_switches WHERE tor_ip = ?")
            .bind(tor_ip)
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(super::NotFoundError::new("ToR switch", tor_ip).into());
        }
        Ok(())
    }
}
