use crate::models::*;
use crate::utils::is_valid_hostname;

use super::{ProvisionError, ProvisionResult, ProvisioningEngine};

impl ProvisioningEngine {
    /// Bind a port on `host` to its network's local vlan on the host's switch.
    ///
    /// The switch is programmed once per (vlan, interface); further ports of
    /// the same network behind the same interface only add a mapping row.
    pub async fn create_localvlan(&self, req: &CreateLocalVlanRequest) -> ProvisionResult<PortVlanMapping> {
        if req.network_id.is_empty() || req.host.is_empty() || req.port_id.is_empty() {
            return Err(ProvisionError::BadRequest(
                "network_id, host and port_id are required".to_string(),
            ));
        }
        if !is_valid_hostname(&req.host) {
            return Err(ProvisionError::BadRequest(format!("Invalid host name: {}", req.host)));
        }

        let (tor_ip, if_index) = self.topology.locate(&req.host).ok_or_else(|| {
            ProvisionError::NotFound(format!("Host {} is not attached to any ToR switch", req.host))
        })?;
        let _guard = self.locks.lock(&tor_ip).await;

        let network = self
            .store
            .get_network(&req.network_id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("Network not found: {}", req.network_id)))?;
        self.store
            .get_port(&req.port_id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("Port not found: {}", req.port_id)))?;
        if self.store.get_port_vlan_mapping(&req.port_id).await?.is_some() {
            return Err(ProvisionError::BadRequest(format!(
                "Port {} already has a local vlan",
                req.port_id
            )));
        }
        let vxlan = network.vxlan_id().ok_or_else(|| {
            ProvisionError::BadRequest(format!("Network {} has no vxlan segmentation id", network.id))
        })?;
        let tor = self.require_tor(&tor_ip).await?;

        // An existing allocation keeps its class even if the network's
        // shared flag changed since it was made
        let (vlan_id, shared, is_new) = {
            let mut vlans = self.vlans();
            match vlans.lookup_network(&tor_ip, &network.id) {
                Some((vlan_id, shared)) => (vlan_id, shared, false),
                None => match vlans.reserve(&tor_ip, network.shared) {
                    Some(vlan_id) => (vlan_id, network.shared, true),
                    None => {
                        return Err(ProvisionError::NoAvailableVlan {
                            tor_ip,
                            network_id: network.id,
                        })
                    }
                },
            }
        };

        let mapping = PortVlanMapping {
            port_id: req.port_id.clone(),
            network_id: network.id.clone(),
            tor_ip: tor_ip.clone(),
            vlan_id,
            if_index,
        };
        let result = self.bind_localvlan(&tor, &mapping, vxlan, shared, is_new).await;
        if result.is_err() && is_new {
            self.vlans().cancel(&tor_ip, shared, vlan_id);
        }
        result?;

        if is_new {
            self.vlans().commit(&tor_ip, &network.id, shared, vlan_id);
            tracing::info!(
                "Allocated vlan {} on {} for network {} (vxlan {})",
                vlan_id,
                tor_ip,
                network.id,
                vxlan
            );
        }
        Ok(mapping)
    }

    async fn bind_localvlan(
        &self,
        tor: &TorSwitch,
        mapping: &PortVlanMapping,
        vxlan: u32,
        shared: bool,
        is_new: bool,
    ) -> ProvisionResult<()> {
        let tor_ip = tor.tor_ip.as_str();

        if !self.store.mapping_exists(tor_ip, mapping.vlan_id, mapping.if_index).await? {
            let driver = self.connect(tor).await?;
            driver
                .new_local_vlan_binding(tor_ip, mapping.if_index, mapping.vlan_id, vxlan)
                .await
                .map_err(ProvisionError::tor_config(tor_ip))?;
            let tunnel_ids = self.tunnel_ids_from(tor_ip).await?;
            if !tunnel_ids.is_empty() {
                driver
                    .ensure_tunnel_membership(tor_ip, &[vxlan], &tunnel_ids)
                    .await
                    .map_err(ProvisionError::tor_config(tor_ip))?;
            }
        }

        if is_new {
            self.store
                .create_vlan_allocation(&VlanAllocation {
                    network_id: mapping.network_id.clone(),
                    tor_ip: tor_ip.to_string(),
                    vlan_id: mapping.vlan_id,
                    allocated: true,
                    shared,
                })
                .await?;
            self.store
                .create_vsi(&VsiRecord {
                    tor_ip: tor_ip.to_string(),
                    vxlan,
                })
                .await?;
        }

        if let Err(e) = self.store.create_port_vlan_mapping(mapping).await {
            if is_new {
                // Undo the allocation rows written above
                if let Err(undo) = self.store.delete_vlan_allocation(tor_ip, &mapping.network_id).await {
                    tracing::warn!(
                        "Failed to remove vlan allocation of {} on {} after a failed mapping write: {}",
                        mapping.network_id,
                        tor_ip,
                        undo
                    );
                }
                if let Err(undo) = self.store.delete_vsi(tor_ip, vxlan).await {
                    tracing::warn!(
                        "Failed to remove vsi {} on {} after a failed mapping write: {}",
                        vxlan,
                        tor_ip,
                        undo
                    );
                }
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove a port's local vlan binding. The allocation and vsi go with the
    /// last port of the network on the switch; the switch binding goes with
    /// the last port on the interface.
    pub async fn delete_localvlan(&self, port_id: &str) -> ProvisionResult<()> {
        let mapping = self.require_mapping(port_id).await?;
        let _guard = self.locks.lock(&mapping.tor_ip).await;
        // Re-read under the lock
        let mapping = self.require_mapping(port_id).await?;

        let network = self
            .store
            .get_network(&mapping.network_id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("Network not found: {}", mapping.network_id)))?;
        let tor = self.require_tor(&mapping.tor_ip).await?;
        let vxlan = network.vxlan_id().ok_or_else(|| {
            ProvisionError::BadRequest(format!("Network {} has no vxlan segmentation id", network.id))
        })?;

        let by_network = self
            .store
            .count_mappings_by_network(&tor.tor_ip, &network.id)
            .await?;
        let by_index = self
            .store
            .count_mappings_by_index(&tor.tor_ip, mapping.if_index)
            .await?;
        let full = by_network == 1;

        if by_index <= 1 {
            let driver = self.connect(&tor).await?;
            driver
                .delete_local_vlan_binding(&tor.tor_ip, mapping.if_index, mapping.vlan_id, vxlan, !full)
                .await
                .map_err(ProvisionError::tor_config(&tor.tor_ip))?;
        }

        if full {
            let released = self.vlans().release_network(&tor.tor_ip, &network.id);
            self.store.delete_vlan_allocation(&tor.tor_ip, &network.id).await?;
            self.store.delete_vsi(&tor.tor_ip, vxlan).await?;
            tracing::info!(
                "Released vlan {:?} on {} for network {}",
                released,
                tor.tor_ip,
                network.id
            );
        }

        self.store.delete_port_vlan_mapping(port_id).await?;
        Ok(())
    }

    async fn require_mapping(&self, port_id: &str) -> ProvisionResult<PortVlanMapping> {
        self.store
            .get_port_vlan_mapping(port_id)
            .await?
            .ok_or_else(|| ProvisionError::NotFound(format!("Port vlan mapping not found: {}", port_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::drivers::simulated::{DriverCall, DriverOp, SimulatedDriver};
    use crate::vlan::SHARED_VLAN_MIN;
    use std::sync::Arc;

    async fn fabric() -> Harness {
        let h = harness().await;
        h.engine.create_tor(&tor_request(TOR_A, SRC_A)).await.unwrap();
        h.driver.clear_calls();
        h
    }

    #[tokio::test]
    async fn test_shared_network_two_ports_one_interface() {
        let h = fabric().await;
        add_network(&h.store, "net-s", 1001, true).await;
        add_port(&h.store, "p1", "net-s", "compute-01").await;
        add_port(&h.store, "p2", "net-s", "compute-01").await;

        let m1 = h.engine.create_localvlan(&localvlan("net-s", "compute-01", "p1")).await.unwrap();
        assert_eq!(m1.vlan_id, SHARED_VLAN_MIN);
        assert_eq!(m1.if_index, 5);
        assert_eq!(m1.tor_ip, TOR_A);
        assert_eq!(
            h.driver.calls_of(DriverOp::NewLocalVlanBinding),
            vec![DriverCall::NewLocalVlanBinding {
                endpoint: TOR_A.to_string(),
                index: 5,
                vlan: 4002,
                vxlan: 1001,
            }]
        );

        h.driver.clear_calls();
        let m2 = h.engine.create_localvlan(&localvlan("net-s", "compute-01", "p2")).await.unwrap();
        assert_eq!(m2.vlan_id, m1.vlan_id);
        assert!(h.driver.calls().is_empty());

        h.engine.delete_localvlan("p1").await.unwrap();
        assert!(h.driver.calls().is_empty());
        assert_eq!(h.store.list_vlan_allocations().await.unwrap().len(), 1);
        assert_eq!(h.engine.vlans().lookup(TOR_A, "net-s", true), Some(4002));

        h.engine.delete_localvlan("p2").await.unwrap();
        assert_eq!(
            h.driver.calls_of(DriverOp::DeleteLocalVlanBinding),
            vec![DriverCall::DeleteLocalVlanBinding {
                endpoint: TOR_A.to_string(),
                index: 5,
                vlan: 4002,
                vxlan: 1001,
                keep_vsi: false,
            }]
        );
        assert!(h.store.list_vlan_allocations().await.unwrap().is_empty());
        assert!(h.store.list_vsis_by_tor(TOR_A).await.unwrap().is_empty());
        assert!(h.store.list_port_vlan_mappings().await.unwrap().is_empty());
        assert_eq!(h.engine.vlans().lookup(TOR_A, "net-s", true), None);
        assert_eq!(h.engine.vlans().in_use(TOR_A), 0);
        assert!(h.driver.device(TOR_A).vsis.is_empty());
    }

    #[tokio::test]
    async fn test_unshared_networks_take_lowest_free_vlan() {
        let h = fabric().await;
        add_network(&h.store, "net-1", 1001, false).await;
        add_network(&h.store, "net-2", 1002, false).await;
        add_port(&h.store, "p1", "net-1", "compute-01").await;
        add_port(&h.store, "p2", "net-2", "compute-02").await;
        add_port(&h.store, "p3", "net-1", "compute-02").await;

        let m1 = h.engine.create_localvlan(&localvlan("net-1", "compute-01", "p1")).await.unwrap();
        let m2 = h.engine.create_localvlan(&localvlan("net-2", "compute-02", "p2")).await.unwrap();
        assert_eq!((m1.vlan_id, m2.vlan_id), (2, 3));

        // Same network on another interface reuses the vlan and programs the port
        h.driver.clear_calls();
        let m3 = h.engine.create_localvlan(&localvlan("net-1", "compute-02", "p3")).await.unwrap();
        assert_eq!(m3.vlan_id, 2);
        assert_eq!(h.driver.calls_of(DriverOp::NewLocalVlanBinding).len(), 1);

        // Other ports of net-1 remain, so the vsi stays
        h.engine.delete_localvlan("p1").await.unwrap();
        assert!(matches!(
            h.driver.calls_of(DriverOp::DeleteLocalVlanBinding).as_slice(),
            [DriverCall::DeleteLocalVlanBinding { keep_vsi: true, index: 5, .. }]
        ));
    }

    #[tokio::test]
    async fn test_driver_failure_writes_nothing_and_leaks_no_vlan() {
        let h = fabric().await;
        add_network(&h.store, "net-1", 1001, false).await;
        add_port(&h.store, "p1", "net-1", "compute-01").await;

        h.driver.fail_on(DriverOp::NewLocalVlanBinding, None);
        let err = h
            .engine
            .create_localvlan(&localvlan("net-1", "compute-01", "p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::TorConfig { .. }));
        assert!(h.store.list_vlan_allocations().await.unwrap().is_empty());
        assert!(h.store.list_port_vlan_mappings().await.unwrap().is_empty());
        assert!(h.store.list_vsis_by_tor(TOR_A).await.unwrap().is_empty());
        assert_eq!(h.engine.vlans().in_use(TOR_A), 0);

        h.driver.clear_failures();
        let m = h.engine.create_localvlan(&localvlan("net-1", "compute-01", "p1")).await.unwrap();
        assert_eq!(m.vlan_id, 2);
    }

    #[tokio::test]
    async fn test_binding_joins_switch_tunnels() {
        let h = fabric().await;
        h.engine.create_tor(&tor_request(TOR_B, SRC_B)).await.unwrap();
        add_network(&h.store, "net-1", 1001, false).await;
        add_port(&h.store, "p1", "net-1", "compute-03").await;

        h.driver.clear_calls();
        h.engine.create_localvlan(&localvlan("net-1", "compute-03", "p1")).await.unwrap();
        assert_eq!(
            h.driver.calls_of(DriverOp::EnsureTunnelMembership),
            vec![DriverCall::EnsureTunnelMembership {
                endpoint: TOR_B.to_string(),
                vxlans: vec![1001],
                tunnel_ids: vec![1],
            }]
        );
    }

    #[tokio::test]
    async fn test_create_localvlan_rejections() {
        let h = fabric().await;
        add_network(&h.store, "net-1", 1001, false).await;
        add_port(&h.store, "p1", "net-1", "compute-01").await;

        let err = h.engine.create_localvlan(&localvlan("net-1", "compute-99", "p1")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound(_)));

        let err = h.engine.create_localvlan(&localvlan("net-9", "compute-01", "p1")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound(_)));

        let err = h.engine.create_localvlan(&localvlan("net-1", "compute-01", "p9")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound(_)));

        h.engine.create_localvlan(&localvlan("net-1", "compute-01", "p1")).await.unwrap();
        let err = h.engine.create_localvlan(&localvlan("net-1", "compute-01", "p1")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::BadRequest(_)));

        h.store
            .create_network(&NetworkRequest {
                id: "flat".to_string(),
                tenant_id: "tenant".to_string(),
                segmentation_type: segmentation_type::FLAT.to_string(),
                segmentation_id: None,
                admin_state_up: true,
                shared: false,
            })
            .await
            .unwrap();
        add_port(&h.store, "p2", "flat", "compute-01").await;
        let err = h.engine.create_localvlan(&localvlan("flat", "compute-01", "p2")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::BadRequest(_)));

        let err = h.engine.create_localvlan(&localvlan("", "compute-01", "p2")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::BadRequest(_)));

        let err = h.engine.create_localvlan(&localvlan("net-1", "compute 01;", "p2")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_delete_unknown_mapping() {
        let h = fabric().await;
        let err = h.engine.delete_localvlan("p1").await.unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_state() {
        let h = fabric().await;
        add_network(&h.store, "net-1", 1001, false).await;
        add_port(&h.store, "p1", "net-1", "compute-01").await;
        h.engine.create_localvlan(&localvlan("net-1", "compute-01", "p1")).await.unwrap();

        h.driver.fail_on(DriverOp::DeleteLocalVlanBinding, Some(TOR_A));
        assert!(h.engine.delete_localvlan("p1").await.is_err());
        assert!(h.store.get_port_vlan_mapping("p1").await.unwrap().is_some());
        assert_eq!(h.store.list_vlan_allocations().await.unwrap().len(), 1);
        assert_eq!(h.engine.vlans().lookup(TOR_A, "net-1", false), Some(2));

        h.driver.clear_failures();
        h.engine.delete_localvlan("p1").await.unwrap();
        assert!(h.store.list_vlan_allocations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_allocations_survive_restart() {
        let h = fabric().await;
        add_network(&h.store, "net-1", 1001, false).await;
        add_network(&h.store, "net-2", 1002, false).await;
        add_port(&h.store, "p1", "net-1", "compute-01").await;
        add_port(&h.store, "p2", "net-1", "compute-02").await;
        add_port(&h.store, "p3", "net-2", "compute-02").await;
        h.engine.create_localvlan(&localvlan("net-1", "compute-01", "p1")).await.unwrap();

        let restarted = harness_with_store(h.store.clone(), Arc::new(SimulatedDriver::new())).await;
        let m2 = restarted
            .engine
            .create_localvlan(&localvlan("net-1", "compute-02", "p2"))
            .await
            .unwrap();
        assert_eq!(m2.vlan_id, 2);
        let m3 = restarted
            .engine
            .create_localvlan(&localvlan("net-2", "compute-02", "p3"))
            .await
            .unwrap();
        assert_eq!(m3.vlan_id, 3);
    }

    #[tokio::test]
    async fn test_allocation_keeps_its_class_when_network_flips_shared() {
        let h = fabric().await;
        add_network(&h.store, "net-1", 1001, false).await;
        add_port(&h.store, "p1", "net-1", "compute-01").await;
        add_port(&h.store, "p2", "net-1", "compute-01").await;

        let m1 = h.engine.create_localvlan(&localvlan("net-1", "compute-01", "p1")).await.unwrap();
        assert_eq!(m1.vlan_id, 2);

        h.store
            .update_network(
                "net-1",
                &NetworkRequest {
                    id: "net-1".to_string(),
                    tenant_id: "tenant".to_string(),
                    segmentation_type: segmentation_type::VXLAN.to_string(),
                    segmentation_id: Some(1001),
                    admin_state_up: true,
                    shared: true,
                },
            )
            .await
            .unwrap();

        let m2 = h.engine.create_localvlan(&localvlan("net-1", "compute-01", "p2")).await.unwrap();
        assert_eq!(m2.vlan_id, 2);
        let allocations = h.store.list_vlan_allocations().await.unwrap();
        assert_eq!(allocations.len(), 1);
        assert!(!allocations[0].shared);
        assert_eq!(h.engine.vlans().in_use(TOR_A), 1);

        h.engine.delete_localvlan("p1").await.unwrap();
        h.engine.delete_localvlan("p2").await.unwrap();
        assert!(h.store.list_vlan_allocations().await.unwrap().is_empty());
        assert_eq!(h.engine.vlans().in_use(TOR_A), 0);
        assert_eq!(h.engine.vlans().lookup_network(TOR_A, "net-1"), None);
        assert!(h.driver.device(TOR_A).bindings.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_binds_share_one_vlan() {
        let h = fabric().await;
        add_network(&h.store, "net-1", 1001, false).await;
        add_port(&h.store, "p1", "net-1", "compute-01").await;
        add_port(&h.store, "p2", "net-1", "compute-01").await;

        let tasks: Vec<_> = ["p1", "p2"]
            .into_iter()
            .map(|port| {
                let engine = h.engine.clone();
                tokio::spawn(async move {
                    engine
                        .create_localvlan(&localvlan("net-1", "compute-01", port))
                        .await
                })
            })
            .collect();

        let mut vlans = Vec::new();
        for task in tasks {
            vlans.push(task.await.unwrap().unwrap().vlan_id);
        }
        assert_eq!(vlans, vec![2, 2]);
        assert_eq!(h.driver.calls_of(DriverOp::NewLocalVlanBinding).len(), 1);
        assert_eq!(h.store.list_vlan_allocations().await.unwrap().len(), 1);
        assert_eq!(h.store.list_vsis_by_tor(TOR_A).await.unwrap().len(), 1);
        assert_eq!(h.engine.vlans().in_use(TOR_A), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_bind_racing_new_tor_still_joins_its_tunnel() {
        let h = fabric().await;
        add_network(&h.store, "net-1", 1001, false).await;
        add_port(&h.store, "p1", "net-1", "compute-01").await;

        let engine = h.engine.clone();
        let bind = tokio::spawn(async move {
            engine
                .create_localvlan(&localvlan("net-1", "compute-01", "p1"))
                .await
        });
        let engine = h.engine.clone();
        let add_tor = tokio::spawn(async move { engine.create_tor(&tor_request(TOR_B, SRC_B)).await });

        bind.await.unwrap().unwrap();
        add_tor.await.unwrap().unwrap();

        // Whichever ran first, the vxlan ends up on TOR_A's tunnel to TOR_B
        let tunnel = h.store.find_tunnel(TOR_A, SRC_B).await.unwrap().unwrap();
        assert!(h
            .driver
            .device(TOR_A)
            .memberships
            .contains(&(1001, tunnel.tunnel_id)));
    }

    #[tokio::test]
    async fn test_failed_mapping_write_removes_new_allocation_rows() {
        let h = fabric().await;
        add_network(&h.store, "net-1", 1001, false).await;
        add_port(&h.store, "p1", "net-1", "compute-01").await;
        h.store
            .execute_raw(
                "CREATE TRIGGER refuse_mapping BEFORE INSERT ON port_vlan_mappings \
                 BEGIN SELECT RAISE(ABORT, 'mapping write refused'); END",
            )
            .await
            .unwrap();

        let err = h
            .engine
            .create_localvlan(&localvlan("net-1", "compute-01", "p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Store(_)));
        assert!(h.store.list_vlan_allocations().await.unwrap().is_empty());
        assert!(h.store.list_vsis_by_tor(TOR_A).await.unwrap().is_empty());
        assert_eq!(h.engine.vlans().in_use(TOR_A), 0);

        h.store.execute_raw("DROP TRIGGER refuse_mapping").await.unwrap();
        let m = h.engine.create_localvlan(&localvlan("net-1", "compute-01", "p1")).await.unwrap();
        assert_eq!(m.vlan_id, 2);
    }
}
