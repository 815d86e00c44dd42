mod lldp;
mod refresher;

pub use lldp::SnmpLldpSource;
pub use refresher::TopologyRefresher;

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::models::{TopologyEntry, TopologyView};

/// What a switch reports about itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalRecord {
    pub chassis_mac: String,
    pub sysname: String,
    pub desc: String,
    /// local interface index -> interface name
    pub ports: BTreeMap<u32, String>,
    /// management address -> interface index it is reached through
    pub mgmt_addrs: BTreeMap<String, u32>,
}

/// One neighbor heard on a local interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteNeighbor {
    pub mac: String,
    pub port_desc: String,
    pub hostname: String,
    pub host_desc: String,
    pub ip: String,
}

/// Neighbors keyed by the local interface index they were heard on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteRecord {
    pub neighbors: BTreeMap<u32, RemoteNeighbor>,
}

/// Source of link-layer adjacency for a switch
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    async fn discover(&self, tor_ip: &str) -> anyhow::Result<(LocalRecord, RemoteRecord)>;
}

/// Immutable topology as of one rebuild
#[derive(Debug, Default)]
pub struct Snapshot {
    entries: BTreeMap<String, BTreeMap<u32, TopologyEntry>>,
    /// host -> (tor ip, local index)
    hosts: HashMap<String, (String, u32)>,
}

impl Snapshot {
    fn build(discovered: Vec<(String, LocalRecord, RemoteRecord)>) -> Self {
        let mut discovered = discovered;
        discovered.sort_by_key(|(tor_ip, _, _)| tor_order(tor_ip));

        let mut snapshot = Snapshot::default();
        for (tor_ip, local, remote) in discovered {
            let mut entries = BTreeMap::new();
            for (index, neighbor) in remote.neighbors {
                let entry = TopologyEntry {
                    index_name: local.ports.get(&index).cloned().unwrap_or_default(),
                    tor_ip: tor_ip.clone(),
                    tor: local.sysname.clone(),
                    host: neighbor.hostname,
                    desc: neighbor.host_desc,
                    host_ip: neighbor.ip,
                    mac: neighbor.mac,
                    interface: neighbor.port_desc,
                };
                // First switch (lowest ip) and lowest index win
                if !entry.host.is_empty() {
                    snapshot
                        .hosts
                        .entry(entry.host.clone())
                        .or_insert_with(|| (tor_ip.clone(), index));
                }
                entries.insert(index, entry);
            }
            snapshot.entries.insert(tor_ip, entries);
        }
        snapshot
    }

    pub fn locate(&self, host: &str) -> Option<(String, u32)> {
        self.hosts.get(host).cloned()
    }

    pub fn tor_count(&self) -> usize {
        self.entries.len()
    }

    pub fn view(&self) -> TopologyView {
        let topology_sp = self
            .entries
            .iter()
            .map(|(tor_ip, entries)| {
                let hosts = entries
                    .values()
                    .filter(|e| !e.host.is_empty())
                    .map(|e| e.host.clone())
                    .collect();
                (tor_ip.clone(), hosts)
            })
            .collect();
        TopologyView {
            topology: self.entries.clone(),
            topology_sp,
        }
    }
}

fn tor_order(tor_ip: &str) -> (Option<Ipv4Addr>, String) {
    (tor_ip.parse().ok(), tor_ip.to_string())
}

/// Host -> switch/interface adjacency, rebuilt from discovery and swapped in
/// whole so readers never see a partial rebuild
pub struct TopologyModel {
    source: Arc<dyn DiscoverySource>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl TopologyModel {
    pub fn new(source: Arc<dyn DiscoverySource>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Query every switch concurrently and replace the snapshot. A switch
    /// whose discovery fails contributes an empty entry.
    pub async fn rebuild(&self, tor_ips: &[String]) {
        let queries = tor_ips.iter().map(|tor_ip| async move {
            match self.source.discover(tor_ip).await {
                Ok((local, remote)) => (tor_ip.clone(), local, remote),
                Err(e) => {
                    tracing::warn!("Topology discovery failed for {}: {:#}", tor_ip, e);
                    (tor_ip.clone(), LocalRecord::default(), RemoteRecord::default())
                }
            }
        });
        let discovered = futures::future::join_all(queries).await;
        let snapshot = Arc::new(Snapshot::build(discovered));

        tracing::info!(
            "Topology rebuilt: {} switches, {} hosts",
            snapshot.tor_count(),
            snapshot.hosts.len()
        );
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    pub fn get_up_tor(&self, host: &str) -> Option<String> {
        self.snapshot().locate(host).map(|(tor_ip, _)| tor_ip)
    }

    pub fn get_index_for_host(&self, host: &str) -> Option<u32> {
        self.snapshot().locate(host).map(|(_, index)| index)
    }

    pub fn locate(&self, host: &str) -> Option<(String, u32)> {
        self.snapshot().locate(host)
    }

    pub fn view(&self) -> TopologyView {
        self.snapshot().view()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::StaticDiscovery;
    use super::*;

    fn tors(ips: &[&str]) -> Vec<String> {
        ips.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_locate_hosts() {
        let source = StaticDiscovery::new()
            .with_switch("10.0.0.1", "tor-a", &[(5, "compute-01"), (6, "compute-02")])
            .with_switch("10.0.0.2", "tor-b", &[(3, "compute-03")]);
        let model = TopologyModel::new(Arc::new(source));
        assert!(model.get_up_tor("compute-01").is_none());

        model.rebuild(&tors(&["10.0.0.1", "10.0.0.2"])).await;

        assert_eq!(model.get_up_tor("compute-01").as_deref(), Some("10.0.0.1"));
        assert_eq!(model.get_index_for_host("compute-02"), Some(6));
        assert_eq!(model.locate("compute-03"), Some(("10.0.0.2".to_string(), 3)));
        assert!(model.get_up_tor("compute-99").is_none());
        assert!(model.get_index_for_host("compute-99").is_none());
    }

    #[tokio::test]
    async fn test_host_under_several_switches_resolves_to_lowest_ip() {
        let source = StaticDiscovery::new()
            .with_switch("10.0.0.10", "tor-b", &[(1, "dual-homed")])
            .with_switch("10.0.0.9", "tor-a", &[(7, "dual-homed")]);
        let model = TopologyModel::new(Arc::new(source));
        model.rebuild(&tors(&["10.0.0.10", "10.0.0.9"])).await;

        // Numeric, not lexical, ordering
        assert_eq!(model.locate("dual-homed"), Some(("10.0.0.9".to_string(), 7)));
    }

    #[tokio::test]
    async fn test_failed_switch_yields_empty_entry() {
        let source = StaticDiscovery::new().with_switch("10.0.0.1", "tor-a", &[(5, "compute-01")]);
        let model = TopologyModel::new(Arc::new(source));
        model.rebuild(&tors(&["10.0.0.1", "10.0.0.2"])).await;

        let view = model.view();
        assert_eq!(view.topology.len(), 2);
        assert!(view.topology["10.0.0.2"].is_empty());
        assert!(view.topology_sp["10.0.0.2"].is_empty());
        assert_eq!(view.topology_sp["10.0.0.1"], vec!["compute-01".to_string()]);

        let entry = &view.topology["10.0.0.1"][&5];
        assert_eq!(entry.tor, "tor-a");
        assert_eq!(entry.index_name, "Ten-GigabitEthernet1/0/5");
        assert_eq!(entry.interface, "eth0");
    }

    #[tokio::test]
    async fn test_rebuild_replaces_snapshot() {
        let source = Arc::new(
            StaticDiscovery::new().with_switch("10.0.0.1", "tor-a", &[(5, "compute-01")]),
        );
        let model = TopologyModel::new(source.clone());
        model.rebuild(&tors(&["10.0.0.1"])).await;
        let before = model.snapshot();

        source.set_switch("10.0.0.1", "tor-a", &[(8, "compute-02")]);
        model.rebuild(&tors(&["10.0.0.1"])).await;

        // Old readers keep their snapshot
        assert_eq!(before.locate("compute-01"), Some(("10.0.0.1".to_string(), 5)));
        assert!(model.get_up_tor("compute-01").is_none());
        assert_eq!(model.get_index_for_host("compute-02"), Some(8));
    }
}
