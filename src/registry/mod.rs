use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::db::Store;

/// Source of the tunnel endpoints a new switch must mesh with
#[async_trait]
pub trait TunnelPeerRegistry: Send + Sync {
    /// Transport ips of the tunnel endpoints reachable from `tunnel_ip`
    async fn peers(&self, tunnel_ip: &str, tunnel_type: &str) -> Result<Vec<String>>;
}

/// Peers are the tunnel sources of every registered switch
pub struct RegisteredTorPeers {
    store: Store,
}

impl RegisteredTorPeers {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TunnelPeerRegistry for RegisteredTorPeers {
    async fn peers(&self, _tunnel_ip: &str, _tunnel_type: &str) -> Result<Vec<String>> {
        let tors = self.store.list_tors().await?;
        Ok(tors.into_iter().map(|t| t.tunnel_src_ip).collect())
    }
}

#[derive(Debug, Deserialize)]
struct TunnelSyncResponse {
    #[serde(default)]
    tunnels: Vec<TunnelEndpoint>,
}

#[derive(Debug, Deserialize)]
struct TunnelEndpoint {
    ip_address: String,
}

/// Peers as reported by the cloud's tunnel endpoint service
pub struct HttpTunnelPeerRegistry {
    url: String,
    client: Client,
}

impl HttpTunnelPeerRegistry {
    pub fn new(url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

fn peer_ips(resp: TunnelSyncResponse) -> Vec<String> {
    let mut ips: Vec<String> = resp
        .tunnels
        .into_iter()
        .map(|t| t.ip_address)
        .filter(|ip| !ip.is_empty())
        .collect();
    ips.sort();
    ips.dedup();
    ips
}

#[async_trait]
impl TunnelPeerRegistry for HttpTunnelPeerRegistry {
    async fn peers(&self, tunnel_ip: &str, tunnel_type: &str) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(&self.url)
            .query(&[("tunnel_ip", tunnel_ip), ("tunnel_type", tunnel_type)])
            .header("Accept", "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Tunnel registry error {}: {}", status, body));
        }

        let body: TunnelSyncResponse = resp.json().await?;
        Ok(peer_ips(body))
    }
}

/// Fixed peer list
#[cfg(test)]
pub struct StaticPeers(pub Vec<String>);

#[cfg(test)]
#[async_trait]
impl TunnelPeerRegistry for StaticPeers {
    async fn peers(&self, _tunnel_ip: &str, _tunnel_type: &str) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_ips_from_response() {
        let resp: TunnelSyncResponse = serde_json::from_str(
            r#"{"tunnels":[{"ip_address":"192.168.0.2","id":1},{"ip_address":"192.168.0.1"},{"ip_address":"192.168.0.2"},{"ip_address":""}]}"#,
        )
        .unwrap();
        assert_eq!(peer_ips(resp), vec!["192.168.0.1", "192.168.0.2"]);

        let empty: TunnelSyncResponse = serde_json::from_str("{}").unwrap();
        assert!(peer_ips(empty).is_empty());
    }

    #[tokio::test]
    async fn test_registered_tor_peers() {
        let store = Store::in_memory().await.unwrap();
        store.create_tor("10.0.0.1", "192.168.0.1", "h3c").await.unwrap();
        store.create_tor("10.0.0.2", "192.168.0.2", "h3c").await.unwrap();

        let registry = RegisteredTorPeers::new(store);
        let peers = registry.peers("192.168.0.3", "vxlan").await.unwrap();
        assert_eq!(peers, vec!["192.168.0.1", "192.168.0.2"]);
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_an_error() {
        let registry = HttpTunnelPeerRegistry::new("http://127.0.0.1:9/tunnels", 1).unwrap();
        assert!(registry.peers("192.168.0.1", "vxlan").await.is_err());
    }
}
