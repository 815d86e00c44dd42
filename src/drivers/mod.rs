pub mod h3c;
mod netconf;
pub mod simulated;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::models::TunnelId;

/// Vendor family a registered switch is driven by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchType {
    H3c,
    Simulated,
}

impl SwitchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwitchType::H3c => "h3c",
            SwitchType::Simulated => "simulated",
        }
    }
}

impl FromStr for SwitchType {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h3c" => Ok(SwitchType::H3c),
            "simulated" | "sim" => Ok(SwitchType::Simulated),
            other => Err(DriverError::UnknownType(other.to_string())),
        }
    }
}

impl fmt::Display for SwitchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("unknown switch type: {0}")]
    UnknownType(String),
    #[error("no driver loaded for switch type {0}")]
    Unavailable(String),
    #[error("session to {endpoint} failed: {detail}")]
    Session { endpoint: String, detail: String },
    #[error("no session initialized for {0}")]
    NotInitialized(String),
    #[error("{operation} rejected by {endpoint}: {detail}")]
    Rejected {
        endpoint: String,
        operation: String,
        detail: String,
    },
    #[error("no tunnel id available on {0}")]
    NoTunnelId(String),
    #[error("driver task failed: {0}")]
    Task(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Capability set every switch adapter provides.
///
/// One instance serves every switch of its type, so each operation names the
/// management endpoint it targets. `initialize` must precede the other calls
/// for an endpoint; implementations cache the session and re-establish it
/// only once it is stale.
#[async_trait]
pub trait SwitchDriver: Send + Sync {
    async fn initialize(&self, endpoint: &str, user: &str, pass: &str) -> DriverResult<()>;

    /// Create a transport tunnel from `src` to `dst`, returning the id the
    /// switch assigned
    async fn new_tunnel(&self, endpoint: &str, src: &str, dst: &str) -> DriverResult<TunnelId>;

    async fn delete_tunnel(&self, endpoint: &str, tunnel_id: TunnelId) -> DriverResult<()>;

    /// Bind `vlan` on interface `index` to the vsi of `vxlan`, creating the
    /// vsi when absent
    async fn new_local_vlan_binding(
        &self,
        endpoint: &str,
        index: u32,
        vlan: u16,
        vxlan: u32,
    ) -> DriverResult<()>;

    /// Inverse of `new_local_vlan_binding`; `keep_vsi` leaves the vsi and
    /// its vxlan in place
    async fn delete_local_vlan_binding(
        &self,
        endpoint: &str,
        index: u32,
        vlan: u16,
        vxlan: u32,
        keep_vsi: bool,
    ) -> DriverResult<()>;

    /// Make every vxlan reachable over every tunnel
    async fn ensure_tunnel_membership(
        &self,
        endpoint: &str,
        vxlans: &[u32],
        tunnel_ids: &[TunnelId],
    ) -> DriverResult<()>;
}

/// Driver instances by switch type, resolved once at startup
#[derive(Clone, Default)]
pub struct DriverRegistry {
    drivers: HashMap<SwitchType, Arc<dyn SwitchDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the drivers named in `SWITCH_DRIVERS`. Unknown names are logged
    /// and skipped.
    pub fn from_config(config: &Config) -> Self {
        let mut registry = Self::new();
        for name in config.switch_drivers.iter() {
            let switch_type = match name.parse::<SwitchType>() {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("Skipping switch driver {}: {}", name, e);
                    continue;
                }
            };
            let driver: Arc<dyn SwitchDriver> = match switch_type {
                SwitchType::H3c => Arc::new(h3c::H3cDriver::new(h3c::H3cOptions {
                    port: config.netconf_port,
                    session_ttl_secs: config.session_ttl_secs,
                    timeout_secs: config.driver_timeout_secs,
                })),
                SwitchType::Simulated => Arc::new(simulated::SimulatedDriver::new()),
            };
            tracing::info!("Loaded {} switch driver", switch_type);
            registry.register(switch_type, driver);
        }
        registry
    }

    pub fn register(&mut self, switch_type: SwitchType, driver: Arc<dyn SwitchDriver>) {
        self.drivers.insert(switch_type, driver);
    }

    pub fn get(&self, switch_type: &str) -> Option<Arc<dyn SwitchDriver>> {
        let switch_type = switch_type.parse::<SwitchType>().ok()?;
        self.drivers.get(&switch_type).cloned()
    }

    pub fn supports(&self, switch_type: SwitchType) -> bool {
        self.drivers.contains_key(&switch_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_type_parsing() {
        assert_eq!("h3c".parse::<SwitchType>().unwrap(), SwitchType::H3c);
        assert_eq!(" H3C ".parse::<SwitchType>().unwrap(), SwitchType::H3c);
        assert_eq!("simulated".parse::<SwitchType>().unwrap(), SwitchType::Simulated);
        assert!(matches!(
            "cisco".parse::<SwitchType>(),
            Err(DriverError::UnknownType(t)) if t == "cisco"
        ));
        assert_eq!(SwitchType::H3c.to_string(), "h3c");
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = DriverRegistry::new();
        registry.register(SwitchType::Simulated, Arc::new(simulated::SimulatedDriver::new()));

        assert!(registry.get("simulated").is_some());
        assert!(registry.get("h3c").is_none());
        assert!(registry.get("bogus").is_none());
        assert!(registry.supports(SwitchType::Simulated));
    }
}
