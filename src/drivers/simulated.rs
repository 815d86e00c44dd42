use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{DriverError, DriverResult, SwitchDriver};
use crate::models::TunnelId;

/// Driver operations, used to journal calls and to target injected failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOp {
    Initialize,
    NewTunnel,
    DeleteTunnel,
    NewLocalVlanBinding,
    DeleteLocalVlanBinding,
    EnsureTunnelMembership,
}

impl DriverOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverOp::Initialize => "initialize",
            DriverOp::NewTunnel => "new_tunnel",
            DriverOp::DeleteTunnel => "delete_tunnel",
            DriverOp::NewLocalVlanBinding => "new_local_vlan_binding",
            DriverOp::DeleteLocalVlanBinding => "delete_local_vlan_binding",
            DriverOp::EnsureTunnelMembership => "ensure_tunnel_membership",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Initialize { endpoint: String },
    NewTunnel { endpoint: String, src: String, dst: String },
    DeleteTunnel { endpoint: String, tunnel_id: TunnelId },
    NewLocalVlanBinding { endpoint: String, index: u32, vlan: u16, vxlan: u32 },
    DeleteLocalVlanBinding { endpoint: String, index: u32, vlan: u16, vxlan: u32, keep_vsi: bool },
    EnsureTunnelMembership { endpoint: String, vxlans: Vec<u32>, tunnel_ids: Vec<TunnelId> },
}

impl DriverCall {
    pub fn op(&self) -> DriverOp {
        match self {
            DriverCall::Initialize { .. } => DriverOp::Initialize,
            DriverCall::NewTunnel { .. } => DriverOp::NewTunnel,
            DriverCall::DeleteTunnel { .. } => DriverOp::DeleteTunnel,
            DriverCall::NewLocalVlanBinding { .. } => DriverOp::NewLocalVlanBinding,
            DriverCall::DeleteLocalVlanBinding { .. } => DriverOp::DeleteLocalVlanBinding,
            DriverCall::EnsureTunnelMembership { .. } => DriverOp::EnsureTunnelMembership,
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            DriverCall::Initialize { endpoint }
            | DriverCall::NewTunnel { endpoint, .. }
            | DriverCall::DeleteTunnel { endpoint, .. }
            | DriverCall::NewLocalVlanBinding { endpoint, .. }
            | DriverCall::DeleteLocalVlanBinding { endpoint, .. }
            | DriverCall::EnsureTunnelMembership { endpoint, .. } => endpoint,
        }
    }
}

/// Configuration a simulated switch currently carries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    /// tunnel id -> (src, dst)
    pub tunnels: BTreeMap<TunnelId, (String, String)>,
    pub vsis: BTreeSet<u32>,
    /// (interface index, vlan) -> vxlan
    pub bindings: BTreeMap<(u32, u16), u32>,
    /// (vxlan, tunnel id)
    pub memberships: BTreeSet<(u32, TunnelId)>,
}

#[derive(Default)]
struct SimState {
    sessions: HashSet<String>,
    devices: HashMap<String, DeviceState>,
    calls: Vec<DriverCall>,
    /// (operation, endpoint); no endpoint fails the operation everywhere
    failures: HashSet<(DriverOp, Option<String>)>,
}

/// In-memory switch fleet for dry runs and tests.
///
/// Removals of configuration that is already absent succeed, matching the
/// NETCONF `remove` operation.
#[derive(Default)]
pub struct SimulatedDriver {
    state: Mutex<SimState>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a test panicked mid-call; keep serving
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail `op` on `endpoint` (or on every endpoint) until cleared
    pub fn fail_on(&self, op: DriverOp, endpoint: Option<&str>) {
        self.lock()
            .failures
            .insert((op, endpoint.map(str::to_string)));
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    pub fn calls_of(&self, op: DriverOp) -> Vec<DriverCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op() == op)
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn device(&self, endpoint: &str) -> DeviceState {
        self.lock()
            .devices
            .get(endpoint)
            .cloned()
            .unwrap_or_default()
    }

    /// Journal the call, then apply failures and session checks
    fn begin(&self, call: DriverCall) -> DriverResult<MutexGuard<'_, SimState>> {
        let mut state = self.lock();
        let op = call.op();
        let endpoint = call.endpoint().to_string();
        state.calls.push(call);

        let injected = state.failures.contains(&(op, None))
            || state.failures.contains(&(op, Some(endpoint.clone())));
        if injected {
            return Err(DriverError::Rejected {
                endpoint,
                operation: op.as_str().to_string(),
                detail: "injected failure".to_string(),
            });
        }
        if op != DriverOp::Initialize && !state.sessions.contains(&endpoint) {
            return Err(DriverError::NotInitialized(endpoint));
        }
        Ok(state)
    }
}

#[async_trait]
impl SwitchDriver for SimulatedDriver {
    async fn initialize(&self, endpoint: &str, _user: &str, _pass: &str) -> DriverResult<()> {
        let mut state = self.begin(DriverCall::Initialize {
            endpoint: endpoint.to_string(),
        })?;
        state.sessions.insert(endpoint.to_string());
        state.devices.entry(endpoint.to_string()).or_default();
        Ok(())
    }

    async fn new_tunnel(&self, endpoint: &str, src: &str, dst: &str) -> DriverResult<TunnelId> {
        let mut state = self.begin(DriverCall::NewTunnel {
            endpoint: endpoint.to_string(),
            src: src.to_string(),
            dst: dst.to_string(),
        })?;
        let device = state.devices.entry(endpoint.to_string()).or_default();
        let tunnel_id = (1..=TunnelId::MAX)
            .find(|id| !device.tunnels.contains_key(id))
            .ok_or_else(|| DriverError::NoTunnelId(endpoint.to_string()))?;
        device
            .tunnels
            .insert(tunnel_id, (src.to_string(), dst.to_string()));
        Ok(tunnel_id)
    }

    async fn delete_tunnel(&self, endpoint: &str, tunnel_id: TunnelId) -> DriverResult<()> {
        let mut state = self.begin(DriverCall::DeleteTunnel {
            endpoint: endpoint.to_string(),
            tunnel_id,
        })?;
        let device = state.devices.entry(endpoint.to_string()).or_default();
        device.tunnels.remove(&tunnel_id);
        device.memberships.retain(|(_, t)| *t != tunnel_id);
        Ok(())
    }

    async fn new_local_vlan_binding(
        &self,
        endpoint: &str,
        index: u32,
        vlan: u16,
        vxlan: u32,
    ) -> DriverResult<()> {
        let mut state = self.begin(DriverCall::NewLocalVlanBinding {
            endpoint: endpoint.to_string(),
            index,
            vlan,
            vxlan,
        })?;
        let device = state.devices.entry(endpoint.to_string()).or_default();
        device.vsis.insert(vxlan);
        device.bindings.insert((index, vlan), vxlan);
        Ok(())
    }

    async fn delete_local_vlan_binding(
        &self,
        endpoint: &str,
        index: u32,
        vlan: u16,
        vxlan: u32,
        keep_vsi: bool,
    ) -> DriverResult<()> {
        let mut state = self.begin(DriverCall::DeleteLocalVlanBinding {
            endpoint: endpoint.to_string(),
            index,
            vlan,
            vxlan,
            keep_vsi,
        })?;
        let device = state.devices.entry(endpoint.to_string()).or_default();
        device.bindings.remove(&(index, vlan));
        if !keep_vsi {
            device.vsis.remove(&vxlan);
            device.memberships.retain(|(v, _)| *v != vxlan);
        }
        Ok(())
    }

    async fn ensure_tunnel_membership(
        &self,
        endpoint: &str,
        vxlans: &[u32],
        tunnel_ids: &[TunnelId],
    ) -> DriverResult<()> {
        let mut state = self.begin(DriverCall::EnsureTunnelMembership {
            endpoint: endpoint.to_string(),
            vxlans: vxlans.to_vec(),
            tunnel_ids: tunnel_ids.to_vec(),
        })?;
        let device = state.devices.entry(endpoint.to_string()).or_default();
        for vxlan in vxlans {
            for tunnel_id in tunnel_ids {
                device.memberships.insert((*vxlan, *tunnel_id));
            }
        }
        Ok(())
    }
}
