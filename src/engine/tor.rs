use crate::drivers::SwitchType;
use crate::models::*;
use crate::utils::is_valid_ipv4;

use super::{ProvisionError, ProvisionResult, ProvisioningEngine};

impl ProvisioningEngine {
    /// Register a switch and mesh it with every tunnel peer.
    ///
    /// Completed steps are detected from the tunnel rows, so re-running after
    /// a partial failure picks up with the remaining peers.
    pub async fn create_tor(&self, req: &CreateTorRequest) -> ProvisionResult<TorSwitch> {
        let mgmt_ip = req.mgmt_ip.trim();
        let tunnel_src = req.tunnel_src.trim();
        if !is_valid_ipv4(mgmt_ip) {
            return Err(ProvisionError::BadRequest(format!("Invalid management ip: {}", req.mgmt_ip)));
        }
        if !is_valid_ipv4(tunnel_src) {
            return Err(ProvisionError::BadRequest(format!("Invalid tunnel source ip: {}", req.tunnel_src)));
        }
        let switch_type = req
            .switch_type
            .parse::<SwitchType>()
            .map_err(|e| ProvisionError::BadRequest(e.to_string()))?;

        let _mesh = self.mesh_lock.lock().await;
        let _own = self.locks.lock(mgmt_ip).await;

        let existing = self.store.get_tor(mgmt_ip).await?;
        if let Some(tor) = &existing {
            if tor.tunnel_src_ip != tunnel_src || tor.switch_type != switch_type.as_str() {
                return Err(ProvisionError::BadRequest(format!(
                    "ToR switch {} is already registered with tunnel source {} ({})",
                    tor.tor_ip, tor.tunnel_src_ip, tor.switch_type
                )));
            }
        }
        let new_tor = existing.clone().unwrap_or_else(|| TorSwitch {
            tor_ip: mgmt_ip.to_string(),
            tunnel_src_ip: tunnel_src.to_string(),
            switch_type: switch_type.as_str().to_string(),
            created_at: chrono::Utc::now(),
        });

        let mut peers = self.peers.peers(tunnel_src, TUNNEL_TYPE_VXLAN).await?;
        peers.retain(|p| p != tunnel_src);
        peers.sort();
        peers.dedup();

        let driver = self.connect(&new_tor).await?;

        // Tunnels from the new switch to every peer
        for peer in &peers {
            if self.store.find_tunnel(mgmt_ip, peer).await?.is_some() {
                continue;
            }
            let tunnel_id = driver
                .new_tunnel(mgmt_ip, tunnel_src, peer)
                .await
                .map_err(ProvisionError::tor_config(mgmt_ip))?;
            self.store
                .create_tunnel(&TorTunnel {
                    tor_ip: mgmt_ip.to_string(),
                    dst_addr: peer.clone(),
                    tunnel_id,
                })
                .await?;
            tracing::info!("Created tunnel {} from {} to {}", tunnel_id, mgmt_ip, peer);
        }

        let vxlans = self.vsi_vxlans(mgmt_ip).await?;
        let tunnel_ids = self.tunnel_ids_from(mgmt_ip).await?;
        if !vxlans.is_empty() && !tunnel_ids.is_empty() {
            driver
                .ensure_tunnel_membership(mgmt_ip, &vxlans, &tunnel_ids)
                .await
                .map_err(ProvisionError::tor_config(mgmt_ip))?;
        }

        let tor = match existing {
            Some(tor) => tor,
            None => {
                let tor = self
                    .store
                    .create_tor(mgmt_ip, tunnel_src, switch_type.as_str())
                    .await?;
                tracing::info!("Registered {} switch {} (tunnel source {})", switch_type, mgmt_ip, tunnel_src);
                tor
            }
        };
        self.vlans().register_tor(mgmt_ip);

        // Tunnels from every other switch back to the new one
        for peer in self.store.list_tors().await? {
            if peer.tor_ip == tor.tor_ip {
                continue;
            }
            if self.store.find_tunnel(&peer.tor_ip, tunnel_src).await?.is_some() {
                continue;
            }
            let _peer_lock = self.locks.lock(&peer.tor_ip).await;
            let peer_driver = self.connect(&peer).await?;
            let tunnel_id = peer_driver
                .new_tunnel(&peer.tor_ip, &peer.tunnel_src_ip, tunnel_src)
                .await
                .map_err(ProvisionError::tor_config(&peer.tor_ip))?;

            let vxlans = self.vsi_vxlans(&peer.tor_ip).await?;
            if !vxlans.is_empty() {
                peer_driver
                    .ensure_tunnel_membership(&peer.tor_ip, &vxlans, &[tunnel_id])
                    .await
                    .map_err(ProvisionError::tor_config(&peer.tor_ip))?;
            }
            self.store
                .create_tunnel(&TorTunnel {
                    tor_ip: peer.tor_ip.clone(),
                    dst_addr: tunnel_src.to_string(),
                    tunnel_id,
                })
                .await?;
            tracing::info!("Created tunnel {} from {} to {}", tunnel_id, peer.tor_ip, tunnel_src);
        }

        self.refresh_topology().await?;
        Ok(tor)
    }

    /// Tear down a switch's side of the mesh, then every peer's tunnel to it.
    /// The switch row goes last so a failed delete can be retried.
    pub async fn delete_tor(&self, mgmt_ip: &str) -> ProvisionResult<()> {
        let _mesh = self.mesh_lock.lock().await;
        let _own = self.locks.lock(mgmt_ip).await;

        let tor = self.require_tor(mgmt_ip).await?;

        let owned = self.store.list_tunnels_from(&tor.tor_ip).await?;
        if !owned.is_empty() {
            let driver = self.connect(&tor).await?;
            for tunnel in owned {
                driver
                    .delete_tunnel(&tor.tor_ip, tunnel.tunnel_id)
                    .await
                    .map_err(ProvisionError::tor_config(&tor.tor_ip))?;
                self.store.delete_tunnel(&tor.tor_ip, tunnel.tunnel_id).await?;
                tracing::info!("Deleted tunnel {} from {} to {}", tunnel.tunnel_id, tor.tor_ip, tunnel.dst_addr);
            }
        }

        for tunnel in self.store.list_tunnels_to(&tor.tunnel_src_ip).await? {
            if tunnel.tor_ip == tor.tor_ip {
                continue;
            }
            let _peer_lock = self.locks.lock(&tunnel.tor_ip).await;
            match self.store.get_tor(&tunnel.tor_ip).await? {
                Some(peer) => {
                    let peer_driver = self.connect(&peer).await?;
                    peer_driver
                        .delete_tunnel(&peer.tor_ip, tunnel.tunnel_id)
                        .await
                        .map_err(ProvisionError::tor_config(&peer.tor_ip))?;
                }
                None => tracing::warn!(
                    "Dropping tunnel {} owned by unregistered switch {}",
                    tunnel.tunnel_id,
                    tunnel.tor_ip
                ),
            }
            self.store.delete_tunnel(&tunnel.tor_ip, tunnel.tunnel_id).await?;
            tracing::info!("Deleted tunnel {} from {} to {}", tunnel.tunnel_id, tunnel.tor_ip, tor.tunnel_src_ip);
        }

        self.store.delete_tor(&tor.tor_ip).await?;
        if !self.vlans().forget_tor(&tor.tor_ip) {
            tracing::warn!("Keeping vlan pools of {}: allocations are still held", tor.tor_ip);
        }
        tracing::info!("Deleted ToR switch {}", tor.tor_ip);

        self.refresh_topology().await?;
        Ok(())
    }

    pub(super) async fn vsi_vxlans(&self, tor_ip: &str) -> ProvisionResult<Vec<u32>> {
        Ok(self
            .store
            .list_vsis_by_tor(tor_ip)
            .await?
            .into_iter()
            .map(|v| v.vxlan)
            .collect())
    }

    pub(super) async fn tunnel_ids_from(&self, tor_ip: &str) -> ProvisionResult<Vec<TunnelId>> {
        Ok(self
            .store
            .list_tunnels_from(tor_ip)
            .await?
            .into_iter()
            .map(|t| t.tunnel_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::super::testing::*;
    use super::*;
    use crate::drivers::simulated::{DriverCall, DriverOp};
    use crate::drivers::DriverError;

    #[tokio::test]
    async fn test_first_switch_has_no_tunnels() {
        let h = harness().await;
        let tor = h.engine.create_tor(&tor_request(TOR_A, SRC_A)).await.unwrap();
        assert_eq!(tor.tor_ip, TOR_A);
        assert_eq!(tor.switch_type, "simulated");

        assert!(h.store.list_tunnels().await.unwrap().is_empty());
        assert_eq!(h.driver.calls(), vec![DriverCall::Initialize { endpoint: TOR_A.to_string() }]);
        // Topology refreshed for the new switch
        assert_eq!(h.engine.topology().get_up_tor("compute-01").as_deref(), Some(TOR_A));
    }

    #[tokio::test]
    async fn test_second_switch_is_meshed_both_ways() {
        let h = harness().await;
        h.engine.create_tor(&tor_request(TOR_A, SRC_A)).await.unwrap();
        h.engine.create_tor(&tor_request(TOR_B, SRC_B)).await.unwrap();

        let tunnels = h.store.list_tunnels().await.unwrap();
        assert_eq!(
            tunnels,
            vec![
                TorTunnel { tor_ip: TOR_A.into(), dst_addr: SRC_B.into(), tunnel_id: 1 },
                TorTunnel { tor_ip: TOR_B.into(), dst_addr: SRC_A.into(), tunnel_id: 1 },
            ]
        );
        assert_eq!(h.driver.device(TOR_A).tunnels[&1], (SRC_A.to_string(), SRC_B.to_string()));
        assert_eq!(h.driver.device(TOR_B).tunnels[&1], (SRC_B.to_string(), SRC_A.to_string()));
        assert_eq!(h.engine.topology().get_up_tor("compute-03").as_deref(), Some(TOR_B));
    }

    #[tokio::test]
    async fn test_new_tunnels_join_existing_segments() {
        let h = harness().await;
        h.engine.create_tor(&tor_request(TOR_A, SRC_A)).await.unwrap();
        add_network(&h.store, "net-1", 1001, false).await;
        add_port(&h.store, "p1", "net-1", "compute-01").await;
        h.engine.create_localvlan(&localvlan("net-1", "compute-01", "p1")).await.unwrap();

        h.engine.create_tor(&tor_request(TOR_B, SRC_B)).await.unwrap();

        // Reverse tunnel on A carries A's vxlan
        assert_eq!(h.driver.device(TOR_A).memberships, BTreeSet::from([(1001, 1)]));
    }

    #[tokio::test]
    async fn test_create_then_delete_restores_state() {
        let h = harness().await;
        h.engine.create_tor(&tor_request(TOR_A, SRC_A)).await.unwrap();
        h.engine.create_tor(&tor_request(TOR_B, SRC_B)).await.unwrap();
        add_network(&h.store, "net-1", 1001, true).await;
        add_port(&h.store, "p1", "net-1", "compute-01").await;
        h.engine.create_localvlan(&localvlan("net-1", "compute-01", "p1")).await.unwrap();

        let tunnels = h.store.list_tunnels().await.unwrap();
        let tors: Vec<String> = h.store.list_tors().await.unwrap().into_iter().map(|t| t.tor_ip).collect();
        let allocations = h.store.list_vlan_allocations().await.unwrap();
        let device_a = h.driver.device(TOR_A);
        let device_b = h.driver.device(TOR_B);
        let in_use = h.engine.vlans().in_use(TOR_A);

        h.engine.create_tor(&tor_request(TOR_C, SRC_C)).await.unwrap();
        assert_eq!(h.store.list_tunnels().await.unwrap().len(), 6);
        h.engine.delete_tor(TOR_C).await.unwrap();

        assert_eq!(h.store.list_tunnels().await.unwrap(), tunnels);
        let after: Vec<String> = h.store.list_tors().await.unwrap().into_iter().map(|t| t.tor_ip).collect();
        assert_eq!(after, tors);
        assert_eq!(h.store.list_vlan_allocations().await.unwrap(), allocations);
        assert_eq!(h.driver.device(TOR_A), device_a);
        assert_eq!(h.driver.device(TOR_B), device_b);
        assert!(h.driver.device(TOR_C).tunnels.is_empty());
        assert_eq!(h.engine.vlans().in_use(TOR_A), in_use);
        assert!(!h.engine.vlans().has_pools(TOR_C));
    }

    #[tokio::test]
    async fn test_retry_skips_completed_peers() {
        let h = harness().await;
        h.engine.create_tor(&tor_request(TOR_A, SRC_A)).await.unwrap();
        h.engine.create_tor(&tor_request(TOR_B, SRC_B)).await.unwrap();

        h.driver.fail_on(DriverOp::NewTunnel, Some(TOR_B));
        let err = h.engine.create_tor(&tor_request(TOR_C, SRC_C)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::TorConfig { ref tor_ip, .. } if tor_ip == TOR_B));
        // Forward tunnels and A's reverse tunnel survived the failure
        assert_eq!(h.store.list_tunnels_from(TOR_C).await.unwrap().len(), 2);
        assert!(h.store.find_tunnel(TOR_A, SRC_C).await.unwrap().is_some());
        assert!(h.store.find_tunnel(TOR_B, SRC_C).await.unwrap().is_none());

        h.driver.clear_failures();
        h.driver.clear_calls();
        h.engine.create_tor(&tor_request(TOR_C, SRC_C)).await.unwrap();

        let created = h.driver.calls_of(DriverOp::NewTunnel);
        assert_eq!(
            created,
            vec![DriverCall::NewTunnel {
                endpoint: TOR_B.to_string(),
                src: SRC_B.to_string(),
                dst: SRC_C.to_string(),
            }]
        );
        assert_eq!(h.store.list_tunnels().await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_failed_initialize_persists_nothing() {
        let h = harness().await;
        h.driver.fail_on(DriverOp::Initialize, Some(TOR_A));
        let err = h.engine.create_tor(&tor_request(TOR_A, SRC_A)).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::TorConfig { source: DriverError::Rejected { .. }, .. }
        ));
        assert!(h.store.list_tors().await.unwrap().is_empty());
        assert!(h.store.list_tunnels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_tor_validation() {
        let h = harness().await;
        let err = h.engine.create_tor(&tor_request("10.0.0", SRC_A)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::BadRequest(_)));

        let err = h.engine.create_tor(&tor_request(TOR_A, "nope")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::BadRequest(_)));

        let mut req = tor_request(TOR_A, SRC_A);
        req.switch_type = "juniper".to_string();
        let err = h.engine.create_tor(&req).await.unwrap_err();
        assert!(matches!(err, ProvisionError::BadRequest(_)));

        // Known type without a loaded driver
        req.switch_type = "h3c".to_string();
        let err = h.engine.create_tor(&req).await.unwrap_err();
        assert!(matches!(err, ProvisionError::TorConfig { .. }));
        assert!(h.driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reregistration() {
        let h = harness().await;
        h.engine.create_tor(&tor_request(TOR_A, SRC_A)).await.unwrap();
        h.engine.create_tor(&tor_request(TOR_A, SRC_A)).await.unwrap();
        assert_eq!(h.store.list_tors().await.unwrap().len(), 1);

        let err = h.engine.create_tor(&tor_request(TOR_A, SRC_B)).await.unwrap_err();
        assert!(matches!(err, ProvisionError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_delete_unknown_tor() {
        let h = harness().await;
        let err = h.engine.delete_tor(TOR_A).await.unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_tor_resumes_after_peer_failure() {
        let h = harness().await;
        h.engine.create_tor(&tor_request(TOR_A, SRC_A)).await.unwrap();
        h.engine.create_tor(&tor_request(TOR_B, SRC_B)).await.unwrap();

        h.driver.fail_on(DriverOp::DeleteTunnel, Some(TOR_A));
        assert!(h.engine.delete_tor(TOR_B).await.is_err());
        assert!(h.store.get_tor(TOR_B).await.unwrap().is_some());
        assert!(h.store.list_tunnels_from(TOR_B).await.unwrap().is_empty());

        h.driver.clear_failures();
        h.engine.delete_tor(TOR_B).await.unwrap();
        assert!(h.store.get_tor(TOR_B).await.unwrap().is_none());
        assert!(h.store.list_tunnels().await.unwrap().is_empty());
        assert!(h.driver.device(TOR_A).tunnels.is_empty());
        assert!(h.engine.topology().get_up_tor("compute-03").is_none());
    }
}
