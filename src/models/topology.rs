use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One discovered neighbor behind a local switch interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEntry {
    pub index_name: String,
    pub tor_ip: String,
    /// Switch system name
    pub tor: String,
    pub host: String,
    pub desc: String,
    pub host_ip: String,
    pub mac: String,
    /// Remote (host side) interface description
    pub interface: String,
}

/// TopologyView is the API rendering of the topology snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyView {
    /// ToR ip -> local interface index -> neighbor
    pub topology: BTreeMap<String, BTreeMap<u32, TopologyEntry>>,
    /// ToR ip -> neighbor host names
    pub topology_sp: BTreeMap<String, Vec<String>>,
}
