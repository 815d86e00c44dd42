use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device-assigned tunnel identifier
pub type TunnelId = u32;

/// Tunnel encapsulation requested from the peer registry
pub const TUNNEL_TYPE_VXLAN: &str = "vxlan";

/// TorSwitch is a registered top-of-rack switch, keyed by management ip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorSwitch {
    pub tor_ip: String,
    pub tunnel_src_ip: String,
    pub switch_type: String,
    pub created_at: DateTime<Utc>,
}

/// VlanAllocation records the local vlan a network holds on one switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanAllocation {
    pub network_id: String,
    pub tor_ip: String,
    pub vlan_id: u16,
    pub allocated: bool,
    pub shared: bool,
}

/// TorTunnel is one directed edge of the tunnel mesh, owned by `tor_ip`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorTunnel {
    pub tor_ip: String,
    pub dst_addr: String,
    pub tunnel_id: TunnelId,
}

/// PortVlanMapping binds a port to the (switch, vlan, interface) it uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortVlanMapping {
    pub port_id: String,
    pub network_id: String,
    pub tor_ip: String,
    pub vlan_id: u16,
    pub if_index: u32,
}

/// VsiRecord notes that a switch carries a vsi for a vxlan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VsiRecord {
    pub tor_ip: String,
    pub vxlan: u32,
}

/// CreateTorRequest registers a switch and meshes it with its peers
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTorRequest {
    pub switch_type: String,
    #[serde(alias = "tunnel_src_ip")]
    pub tunnel_src: String,
    #[serde(alias = "mgr")]
    pub mgmt_ip: String,
}

/// CreateLocalVlanRequest binds a port on a host to its network's local vlan
#[derive(Debug, Clone, Deserialize)]
pub struct CreateLocalVlanRequest {
    #[serde(alias = "netid")]
    pub network_id: String,
    pub host: String,
    #[serde(alias = "portid")]
    pub port_id: String,
}
