use anyhow::Result;
use sqlx::{Pool, Sqlite};

use crate::models::*;
use super::row_helpers::map_tunnel_row;

const SELECT_TUNNEL: &str = "SELECT tor_ip, dst_addr, tunnel_id FROM tor_tunnels";

/// Tunnel mesh edge database operations
pub struct TunnelRepo;

impl TunnelRepo {
    pub async fn list(pool: &Pool<Sqlite>) -> Result<Vec<TorTunnel>> {
        let rows = sqlx::query(&format!("{} ORDER BY tor_ip, tunnel_id", SELECT_TUNNEL))
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_tunnel_row).collect())
    }

    pub async fn list_from(pool: &Pool<Sqlite>, tor_ip: &str) -> Result<Vec<TorTunnel>> {
        let rows = sqlx::query(&format!("{} WHERE tor_ip = ? ORDER BY tunnel_id", SELECT_TUNNEL))
            .bind(tor_ip)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_tunnel_row).collect())
    }

    pub async fn list_to(pool: &Pool<Sqlite>, dst_addr: &str) -> Result<Vec<TorTunnel>> {
        let rows = sqlx::query(&format!("{} WHERE dst_addr = ? ORDER BY tor_ip", SELECT_TUNNEL))
            .bind(dst_addr)
            .fetch_all(pool)
            .await?;
        Ok(rows.iter().map(map_tunnel_row).collect())
    }

    pub async fn find(pool: &Pool<Sqlite>, tor_ip: &str, dst_addr: &str) -> Result<Option<TorTunnel>> {
        let row = sqlx::query(&format!("{} WHERE tor_ip = ? AND dst_addr = ? LIMIT 1", SELECT_TUNNEL))
            .bind(tor_ip)
            .bind(dst_addr)
            .fetch_optional(pool)
            .await?;
        Ok(row.as_ref().map(map_tunnel_row))
    }

    pub async fn create(pool: &Pool<Sqlite>, tunnel: &TorTunnel) -> Result<()> {
        sqlx::query("INSERT INTO tor_tunnels (tor_ip, dst_addr, tunnel_id) VALUES (?, ?, ?)")
            .bind(&tunnel.tor_ip)
            .bind(&tunnel.dst_addr)
            .bind(tunnel.tunnel_id)
            .execute(pool)
            .await
            .map_err(|e| {
                super::insert_error(
                    e,
                    "Tunnel",
                    &format!("{}#{}", tunnel.tor_ip, tunnel.tunnel_id),
                )
            })?;
        Ok(())
    }

    pub async fn delete(pool: &Pool<Sqlite>, tor_ip: &str, tunnel_id: TunnelId) -> Result<()> {
        sqlx::query("DELETE FROM tor_tunnels WHERE tor_ip = ? AND tunnel_id = ?")
            .bind(tor_ip)
            .bind(tunnel_id)
            .execute(pool)
            .await?;
        Ok(())
    }
}
