mod pool;

pub use pool::*;

use std::collections::HashMap;

use crate::models::VlanAllocation;

/// Which of the two disjoint per-switch ranges an allocation comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    Shared,
    Unshared,
}

impl PoolKind {
    pub fn for_network(shared: bool) -> Self {
        if shared {
            PoolKind::Shared
        } else {
            PoolKind::Unshared
        }
    }

    fn new_pool(self) -> VlanPool {
        match self {
            PoolKind::Shared => VlanPool::shared(),
            PoolKind::Unshared => VlanPool::unshared(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tor_ip: String,
    network_id: String,
    shared: bool,
}

impl CacheKey {
    fn new(tor_ip: &str, network_id: &str, shared: bool) -> Self {
        Self {
            tor_ip: tor_ip.to_string(),
            network_id: network_id.to_string(),
            shared,
        }
    }
}

/// In-memory mirror of the persisted vlan allocations: one pair of pools per
/// switch plus the (tor, network, shared) -> vlan cache.
///
/// Ids move through `reserve` (bit set, not cached) and then either `commit`
/// (cached, after the allocation row is written) or `cancel` (bit cleared).
#[derive(Debug, Default)]
pub struct VlanAllocator {
    pools: HashMap<(String, PoolKind), VlanPool>,
    cache: HashMap<CacheKey, u16>,
}

impl VlanAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild pools and cache from persisted allocation rows
    pub fn seed(allocations: &[VlanAllocation]) -> Self {
        let mut allocator = Self::new();
        for va in allocations {
            if !va.allocated {
                continue;
            }
            let pool = allocator.pool_mut(&va.tor_ip, PoolKind::for_network(va.shared));
            if !pool.mark(va.vlan_id) {
                tracing::warn!(
                    "Ignoring persisted vlan {} for network {} on {}: out of range or duplicate",
                    va.vlan_id,
                    va.network_id,
                    va.tor_ip
                );
                continue;
            }
            allocator
                .cache
                .insert(CacheKey::new(&va.tor_ip, &va.network_id, va.shared), va.vlan_id);
        }
        allocator
    }

    fn pool_mut(&mut self, tor_ip: &str, kind: PoolKind) -> &mut VlanPool {
        self.pools
            .entry((tor_ip.to_string(), kind))
            .or_insert_with(|| kind.new_pool())
    }

    /// Ensure both pools exist for a switch
    pub fn register_tor(&mut self, tor_ip: &str) {
        self.pool_mut(tor_ip, PoolKind::Shared);
        self.pool_mut(tor_ip, PoolKind::Unshared);
    }

    /// Cached vlan for (tor, network, shared), if any
    pub fn lookup(&self, tor_ip: &str, network_id: &str, shared: bool) -> Option<u16> {
        self.cache
            .get(&CacheKey::new(tor_ip, network_id, shared))
            .copied()
    }

    /// Cached vlan for (tor, network) in either class, with the class it was
    /// allocated from
    pub fn lookup_network(&self, tor_ip: &str, network_id: &str) -> Option<(u16, bool)> {
        [false, true].into_iter().find_map(|shared| {
            self.lookup(tor_ip, network_id, shared)
                .map(|vlan_id| (vlan_id, shared))
        })
    }

    /// Take the lowest free id from the switch's pool for this network class.
    /// The id is marked but not cached until `commit`.
    pub fn reserve(&mut self, tor_ip: &str, shared: bool) -> Option<u16> {
        self.pool_mut(tor_ip, PoolKind::for_network(shared)).allocate()
    }

    /// Return a reserved id that was never committed
    pub fn cancel(&mut self, tor_ip: &str, shared: bool, vlan_id: u16) {
        self.pool_mut(tor_ip, PoolKind::for_network(shared)).release(vlan_id);
    }

    /// Record a reserved id once its allocation row is persisted
    pub fn commit(&mut self, tor_ip: &str, network_id: &str, shared: bool, vlan_id: u16) {
        self.cache
            .insert(CacheKey::new(tor_ip, network_id, shared), vlan_id);
    }

    /// Drop the cached allocation for (tor, network, shared) and clear its bit.
    /// Returns the released id.
    pub fn release(&mut self, tor_ip: &str, network_id: &str, shared: bool) -> Option<u16> {
        let vlan_id = self
            .cache
            .remove(&CacheKey::new(tor_ip, network_id, shared))?;
        self.pool_mut(tor_ip, PoolKind::for_network(shared)).release(vlan_id);
        Some(vlan_id)
    }

    /// Release every cached allocation of (tor, network), whatever its class
    pub fn release_network(&mut self, tor_ip: &str, network_id: &str) -> Vec<u16> {
        [false, true]
            .into_iter()
            .filter_map(|shared| self.release(tor_ip, network_id, shared))
            .collect()
    }

    /// Number of ids in use on a switch across both pools
    pub fn in_use(&self, tor_ip: &str) -> usize {
        [PoolKind::Shared, PoolKind::Unshared]
            .iter()
            .filter_map(|kind| self.pools.get(&(tor_ip.to_string(), *kind)))
            .map(VlanPool::in_use)
            .sum()
    }

    /// Drop the pools of a removed switch. Pools still holding ids are kept.
    pub fn forget_tor(&mut self, tor_ip: &str) -> bool {
        if self.in_use(tor_ip) > 0 {
            return false;
        }
        self.pools.remove(&(tor_ip.to_string(), PoolKind::Shared));
        self.pools.remove(&(tor_ip.to_string(), PoolKind::Unshared));
        true
    }

    pub fn has_pools(&self, tor_ip: &str) -> bool {
        self.pools.contains_key(&(tor_ip.to_string(), PoolKind::Unshared))
    }
}
