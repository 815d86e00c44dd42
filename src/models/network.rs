use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical network segmentation type values
pub mod segmentation_type {
    pub const VXLAN: &str = "vxlan";
    pub const VLAN: &str = "vlan";
    pub const FLAT: &str = "flat";
}

/// Network mirrors a cloud network; `segmentation_id` is its VXLAN id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub tenant_id: String,
    pub segmentation_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segmentation_id: Option<u32>,
    pub admin_state_up: bool,
    pub shared: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Network {
    /// VXLAN id for vxlan-segmented networks
    pub fn vxlan_id(&self) -> Option<u32> {
        if self.segmentation_type == segmentation_type::VXLAN {
            self.segmentation_id
        } else {
            None
        }
    }
}

/// NetworkRequest accepts the cloud API field names as well as plain ones
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(rename = "provider:network_type", alias = "segmentation_type")]
    pub segmentation_type: String,
    #[serde(rename = "provider:segmentation_id", alias = "segmentation_id", default)]
    pub segmentation_id: Option<u32>,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    #[serde(default)]
    pub shared: bool,
}

/// Port mirrors a cloud port bound to a host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    pub tenant_id: String,
    pub network_id: String,
    pub device_id: String,
    pub device_owner: String,
    pub status: String,
    pub admin_state_up: bool,
    pub binding_host_id: String,
    pub mac_address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of a port's `fixed_ips` list
#[derive(Debug, Clone, Deserialize)]
pub struct FixedIp {
    pub ip_address: String,
    #[serde(default)]
    pub subnet_id: String,
}

/// PortRequest for creating/updating ports
#[derive(Debug, Clone, Deserialize)]
pub struct PortRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub tenant_id: String,
    pub network_id: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub device_owner: String,
    #[serde(default)]
    pub status: String,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    #[serde(rename = "binding:host_id", alias = "binding_host_id", default)]
    pub binding_host_id: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
}

impl PortRequest {
    /// First fixed ip, which is the only one tracked per port
    pub fn primary_ip(&self) -> Option<&FixedIp> {
        self.fixed_ips.first()
    }
}

/// Subnet is kept for completeness of the synced cloud state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub tenant_id: String,
    pub network_id: String,
    pub shared: bool,
    pub enable_dhcp: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// SubnetRequest for creating/updating subnets
#[derive(Debug, Clone, Deserialize)]
pub struct SubnetRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub tenant_id: String,
    pub network_id: String,
    #[serde(default)]
    pub shared: bool,
    #[serde(default = "default_true")]
    pub enable_dhcp: bool,
}

/// SyncRequest replaces all networks, ports and subnets in one go
#[derive(Debug, Clone, Deserialize)]
pub struct SyncRequest {
    #[serde(alias = "network", default)]
    pub networks: Vec<NetworkRequest>,
    #[serde(alias = "port", default)]
    pub ports: Vec<PortRequest>,
    #[serde(alias = "subnet", default)]
    pub subnets: Vec<SubnetRequest>,
}

/// SyncResult reports how many rows each table holds after a sync
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub networks: usize,
    pub ports: usize,
    pub subnets: usize,
}

fn default_true() -> bool {
    true
}
