use sqlx::{Row, sqlite::SqliteRow};

use crate::models::*;

/// Filter empty strings to None (the DB stores '' instead of NULL)
pub fn none_if_empty(opt: Option<String>) -> Option<String> {
    opt.filter(|s| !s.is_empty())
}

/// Map a SQLite row to a Network struct
pub fn map_network_row(row: &SqliteRow) -> Network {
    Network {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        segmentation_type: row.get("segmentation_type"),
        segmentation_id: row.try_get::<Option<u32>, _>("segmentation_id").ok().flatten(),
        admin_state_up: row.get("admin_state_up"),
        shared: row.get("shared"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Map a SQLite row to a Port struct
pub fn map_port_row(row: &SqliteRow) -> Port {
    Port {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        network_id: row.get("network_id"),
        device_id: row.get("device_id"),
        device_owner: row.get("device_owner"),
        status: row.get("status"),
        admin_state_up: row.get("admin_state_up"),
        binding_host_id: row.get("binding_host_id"),
        mac_address: row.get("mac_address"),
        ip_address: none_if_empty(row.get("ip_address")),
        subnet_id: none_if_empty(row.get("subnet_id")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Map a SQLite row to a Subnet struct
pub fn map_subnet_row(row: &SqliteRow) -> Subnet {
    Subnet {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        network_id: row.get("network_id"),
        shared: row.get("shared"),
        enable_dhcp: row.get("enable_dhcp"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Map a SQLite row to a TorSwitch struct
pub fn map_tor_row(row: &SqliteRow) -> TorSwitch {
    TorSwitch {
        tor_ip: row.get("tor_ip"),
        tunnel_src_ip: row.get("tunnel_src_ip"),
        switch_type: row.get("switch_type"),
        created_at: row.get("created_at"),
    }
}

/// Map a SQLite row to a TorTunnel struct
pub fn map_tunnel_row(row: &SqliteRow) -> TorTunnel {
    TorTunnel {
        tor_ip: row.get("tor_ip"),
        dst_addr: row.get("dst_addr"),
        tunnel_id: row.get("tunnel_id"),
    }
}

/// Map a SQLite row to a VlanAllocation struct
pub fn map_vlan_allocation_row(row: &SqliteRow) -> VlanAllocation {
    VlanAllocation {
        network_id: row.get("network_id"),
        tor_ip: row.get("tor_ip"),
        vlan_id: row.get("vlan_id"),
        allocated: row.get("allocated"),
        shared: row.get("shared"),
    }
}

/// Map a SQLite row to a PortVlanMapping struct
pub fn map_port_vlan_mapping_row(row: &SqliteRow) -> PortVlanMapping {
    PortVlanMapping {
        port_id: row.get("port_id"),
        network_id: row.get("network_id"),
        tor_ip: row.get("tor_ip"),
        vlan_id: row.get("vlan_id"),
        if_index: row.get("if_index"),
    }
}

/// Map a SQLite row to a VsiRecord struct
pub fn map_vsi_row(row: &SqliteRow) -> VsiRecord {
    VsiRecord {
        tor_ip: row.get("tor_ip"),
        vxlan: row.get("vxlan"),
    }
}
