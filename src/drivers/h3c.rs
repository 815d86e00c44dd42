//! H3C Comware switches driven over NETCONF.
//!
//! Every change is an `edit-config` against `running` carrying one of the
//! L2VPN / VXLAN / TUNNEL subtrees below. A vxlan `N` lives in vsi `vsiN`;
//! the service instance on a port uses the vlan id as its service id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex_lite::Regex;

use super::netconf::NetconfSession;
use super::{DriverError, DriverResult, SwitchDriver};
use crate::models::TunnelId;

const CONFIG_OPEN: &str = concat!(
    r#"<config xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" "#,
    r#"xmlns:xc="urn:ietf:params:xml:ns:netconf:base:1.0">"#,
    r#"<top xmlns="http://www.h3c.com/netconf/config:1.0">"#,
);
const CONFIG_CLOSE: &str = "</top></config>";

const AVAILABLE_TUNNEL_ID_FILTER: &str = concat!(
    r#"<top xmlns="http://www.h3c.com/netconf/data:1.0">"#,
    "<TUNNEL><AvailableTunnelID></AvailableTunnelID></TUNNEL>",
    "</top>",
);

/// Tunnel mode 24 is VXLAN over IPv4
const TUNNEL_MODE_VXLAN: u32 = 24;
/// SRV encapsulation 4 matches on the outer (service) vlan
const ENCAP_SVID: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    Merge,
    Remove,
}

impl EditOp {
    fn as_str(&self) -> &'static str {
        match self {
            EditOp::Merge => "merge",
            EditOp::Remove => "remove",
        }
    }
}

fn wrap_config(body: String) -> String {
    format!("{}{}{}", CONFIG_OPEN, body, CONFIG_CLOSE)
}

pub fn vsi_name(vxlan: u32) -> String {
    format!("vsi{}", vxlan)
}

pub fn vsi_payload(op: EditOp, vxlan: u32) -> String {
    wrap_config(format!(
        r#"<L2VPN xc:operation="{}"><VSIs><VSI><VsiName>{}</VsiName></VSI></VSIs></L2VPN>"#,
        op.as_str(),
        vsi_name(vxlan)
    ))
}

pub fn vxlan_payload(op: EditOp, vxlan: u32) -> String {
    let vsi = match op {
        EditOp::Merge => format!("<VsiName>{}</VsiName>", vsi_name(vxlan)),
        EditOp::Remove => String::new(),
    };
    wrap_config(format!(
        r#"<VXLAN xc:operation="{}"><VXLANs><Vxlan><VxlanID>{}</VxlanID>{}</Vxlan></VXLANs></VXLAN>"#,
        op.as_str(),
        vxlan,
        vsi
    ))
}

pub fn tunnel_membership_payload(vxlan: u32, tunnel_id: TunnelId) -> String {
    wrap_config(format!(
        r#"<VXLAN xc:operation="merge"><Tunnels><Tunnel><VxlanID>{}</VxlanID><TunnelID>{}</TunnelID></Tunnel></Tunnels></VXLAN>"#,
        vxlan, tunnel_id
    ))
}

pub fn tunnel_create_payload(tunnel_id: TunnelId, src: &str, dst: &str) -> String {
    wrap_config(format!(
        concat!(
            r#"<TUNNEL xc:operation="merge"><Tunnels><Tunnel><ID>{}</ID><Mode>{}</Mode>"#,
            "<IPv4Addr><SrcAddr>{}</SrcAddr><DstAddr>{}</DstAddr></IPv4Addr>",
            "</Tunnel></Tunnels></TUNNEL>",
        ),
        tunnel_id, TUNNEL_MODE_VXLAN, src, dst
    ))
}

pub fn tunnel_delete_payload(tunnel_id: TunnelId) -> String {
    wrap_config(format!(
        r#"<TUNNEL xc:operation="remove"><Tunnels><Tunnel><ID>{}</ID></Tunnel></Tunnels></TUNNEL>"#,
        tunnel_id
    ))
}

/// Service instance matching `vlan` on interface `index`
pub fn srv_payload(op: EditOp, index: u32, vlan: u16) -> String {
    let encap = match op {
        EditOp::Merge => format!("<Encap>{}</Encap><SVlanRange>{}</SVlanRange>", ENCAP_SVID, vlan),
        EditOp::Remove => String::new(),
    };
    wrap_config(format!(
        r#"<L2VPN xc:operation="{}"><SRVs><SRV><IfIndex>{}</IfIndex><SrvID>{}</SrvID>{}</SRV></SRVs></L2VPN>"#,
        op.as_str(),
        index,
        vlan,
        encap
    ))
}

/// Attachment circuit binding the service instance to the vsi
pub fn ac_payload(op: EditOp, index: u32, vlan: u16, vxlan: u32) -> String {
    let vsi = match op {
        EditOp::Merge => format!("<VsiName>{}</VsiName>", vsi_name(vxlan)),
        EditOp::Remove => String::new(),
    };
    wrap_config(format!(
        r#"<L2VPN xc:operation="{}"><ACs><AC><IfIndex>{}</IfIndex><SrvID>{}</SrvID>{}</AC></ACs></L2VPN>"#,
        op.as_str(),
        index,
        vlan,
        vsi
    ))
}

const OK_PATTERN: &str = r"<(?:[\w-]+:)?ok\s*/>";
const ERROR_MESSAGE_PATTERN: &str = r"(?s)<(?:[\w-]+:)?error-message[^>]*>(.*?)</";
const TUNNEL_ID_PATTERN: &str = r"<ID>\s*(\d+)\s*</ID>";

static OK_RE: OnceLock<Option<Regex>> = OnceLock::new();
static ERROR_MESSAGE_RE: OnceLock<Option<Regex>> = OnceLock::new();
static TUNNEL_ID_RE: OnceLock<Option<Regex>> = OnceLock::new();

/// Compile a reply pattern once; a bad pattern is logged on first use
fn cached_regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!("Invalid NETCONF reply pattern {}: {}", pattern, e);
            None
        }
    })
    .as_ref()
}

/// Whether an rpc-reply acknowledges the edit
pub fn reply_ok(reply: &str) -> bool {
    let error = reply.contains("rpc-error");
    !error && cached_regex(&OK_RE, OK_PATTERN).map_or(false, |re| re.is_match(reply))
}

/// The device's error-message, or the raw reply when there is none
pub fn reply_error(reply: &str) -> String {
    cached_regex(&ERROR_MESSAGE_RE, ERROR_MESSAGE_PATTERN)
        .and_then(|re| re.captures(reply))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| reply.trim().to_string())
}

/// Last `<ID>` in an AvailableTunnelID reply
pub fn parse_available_tunnel_id(reply: &str) -> Option<TunnelId> {
    cached_regex(&TUNNEL_ID_RE, TUNNEL_ID_PATTERN)?
        .captures_iter(reply)
        .filter_map(|c| c.get(1)?.as_str().parse::<TunnelId>().ok())
        .last()
}

#[derive(Debug, Clone)]
pub struct H3cOptions {
    pub port: u16,
    pub session_ttl_secs: u64,
    pub timeout_secs: u64,
}

struct CachedSession {
    netconf: Arc<Mutex<NetconfSession>>,
    established: Instant,
}

/// H3C NETCONF driver with one cached session per management endpoint
pub struct H3cDriver {
    options: H3cOptions,
    sessions: Mutex<HashMap<String, CachedSession>>,
}

impl H3cDriver {
    pub fn new(options: H3cOptions) -> Self {
        Self {
            options,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.options.session_ttl_secs)
    }

    fn lock_sessions(&self) -> DriverResult<std::sync::MutexGuard<'_, HashMap<String, CachedSession>>> {
        self.sessions
            .lock()
            .map_err(|_| DriverError::Task("session table lock poisoned".to_string()))
    }

    fn session(&self, endpoint: &str) -> DriverResult<Arc<Mutex<NetconfSession>>> {
        self.lock_sessions()?
            .get(endpoint)
            .map(|s| s.netconf.clone())
            .ok_or_else(|| DriverError::NotInitialized(endpoint.to_string()))
    }

    fn evict(&self, endpoint: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(endpoint);
        }
    }

    /// Run `f` against the endpoint's session on the blocking pool. A
    /// transport failure drops the cached session so the next `initialize`
    /// reconnects.
    async fn run<T, F>(&self, endpoint: &str, f: F) -> DriverResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut NetconfSession, &str) -> DriverResult<T> + Send + 'static,
    {
        let netconf = self.session(endpoint)?;
        let target = endpoint.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let mut session = netconf
                .lock()
                .map_err(|_| DriverError::Task(format!("session for {} poisoned", target)))?;
            f(&mut session, &target)
        })
        .await
        .map_err(|e| DriverError::Task(e.to_string()))?;

        if let Err(DriverError::Session { .. }) = &result {
            self.evict(endpoint);
        }
        result
    }
}

fn apply(netconf: &mut NetconfSession, endpoint: &str, operation: &str, payload: &str) -> DriverResult<()> {
    tracing::debug!("{} on {}: {}", operation, endpoint, payload);
    let reply = netconf
        .edit_config(payload)
        .map_err(|detail| DriverError::Session {
            endpoint: endpoint.to_string(),
            detail,
        })?;
    if reply_ok(&reply) {
        Ok(())
    } else {
        Err(DriverError::Rejected {
            endpoint: endpoint.to_string(),
            operation: operation.to_string(),
            detail: reply_error(&reply),
        })
    }
}

#[async_trait]
impl SwitchDriver for H3cDriver {
    async fn initialize(&self, endpoint: &str, user: &str, pass: &str) -> DriverResult<()> {
        {
            let sessions = self.lock_sessions()?;
            if let Some(cached) = sessions.get(endpoint) {
                if cached.established.elapsed() <= self.session_ttl() {
                    return Ok(());
                }
            }
        }

        let host = endpoint.to_string();
        let user = user.to_string();
        let pass = pass.to_string();
        let port = self.options.port;
        let timeout = self.options.timeout_secs;
        let netconf = tokio::task::spawn_blocking(move || {
            NetconfSession::connect(&host, port, &user, &pass, timeout)
        })
        .await
        .map_err(|e| DriverError::Task(e.to_string()))?
        .map_err(|detail| DriverError::Session {
            endpoint: endpoint.to_string(),
            detail,
        })?;

        tracing::info!("NETCONF session established to {}", endpoint);
        let previous = self.lock_sessions()?.insert(
            endpoint.to_string(),
            CachedSession {
                netconf: Arc::new(Mutex::new(netconf)),
                established: Instant::now(),
            },
        );
        if let Some(stale) = previous {
            // Close the replaced session off the async thread
            tokio::task::spawn_blocking(move || {
                if let Ok(session) = Arc::try_unwrap(stale.netconf) {
                    if let Ok(session) = session.into_inner() {
                        session.close();
                    }
                }
            });
        }
        Ok(())
    }

    async fn new_tunnel(&self, endpoint: &str, src: &str, dst: &str) -> DriverResult<TunnelId> {
        let src = src.to_string();
        let dst = dst.to_string();
        self.run(endpoint, move |netconf, endpoint| {
            let reply = netconf
                .get(AVAILABLE_TUNNEL_ID_FILTER)
                .map_err(|detail| DriverError::Session {
                    endpoint: endpoint.to_string(),
                    detail,
                })?;
            let tunnel_id = parse_available_tunnel_id(&reply)
                .ok_or_else(|| DriverError::NoTunnelId(endpoint.to_string()))?;
            apply(
                netconf,
                endpoint,
                "create tunnel",
                &tunnel_create_payload(tunnel_id, &src, &dst),
            )?;
            Ok(tunnel_id)
        })
        .await
    }

    async fn delete_tunnel(&self, endpoint: &str, tunnel_id: TunnelId) -> DriverResult<()> {
        self.run(endpoint, move |netconf, endpoint| {
            apply(netconf, endpoint, "delete tunnel", &tunnel_delete_payload(tunnel_id))
        })
        .await
    }

    async fn new_local_vlan_binding(
        &self,
        endpoint: &str,
        index: u32,
        vlan: u16,
        vxlan: u32,
    ) -> DriverResult<()> {
        self.run(endpoint, move |netconf, endpoint| {
            apply(netconf, endpoint, "create vsi", &vsi_payload(EditOp::Merge, vxlan))?;
            apply(netconf, endpoint, "create vxlan", &vxlan_payload(EditOp::Merge, vxlan))?;
            apply(netconf, endpoint, "create service", &srv_payload(EditOp::Merge, index, vlan))?;
            apply(netconf, endpoint, "create ac", &ac_payload(EditOp::Merge, index, vlan, vxlan))
        })
        .await
    }

    async fn delete_local_vlan_binding(
        &self,
        endpoint: &str,
        index: u32,
        vlan: u16,
        vxlan: u32,
        keep_vsi: bool,
    ) -> DriverResult<()> {
        self.run(endpoint, move |netconf, endpoint| {
            let mut steps = vec![
                ("delete ac", ac_payload(EditOp::Remove, index, vlan, vxlan)),
                ("delete service", srv_payload(EditOp::Remove, index, vlan)),
            ];
            if !keep_vsi {
                steps.push(("delete vxlan", vxlan_payload(EditOp::Remove, vxlan)));
                steps.push(("delete vsi", vsi_payload(EditOp::Remove, vxlan)));
            }

            // Attempt every removal, report the first failure
            let mut first_err = None;
            for (operation, payload) in steps {
                if let Err(e) = apply(netconf, endpoint, operation, &payload) {
                    tracing::warn!("{}", e);
                    if let DriverError::Session { .. } = e {
                        return Err(e);
                    }
                    first_err.get_or_insert(e);
                }
            }
            first_err.map_or(Ok(()), Err)
        })
        .await
    }

    async fn ensure_tunnel_membership(
        &self,
        endpoint: &str,
        vxlans: &[u32],
        tunnel_ids: &[TunnelId],
    ) -> DriverResult<()> {
        if vxlans.is_empty() || tunnel_ids.is_empty() {
            return Ok(());
        }
        let pairs: Vec<(u32, TunnelId)> = vxlans
            .iter()
            .flat_map(|v| tunnel_ids.iter().map(move |t| (*v, *t)))
            .collect();
        self.run(endpoint, move |netconf, endpoint| {
            for (vxlan, tunnel_id) in pairs {
                apply(
                    netconf,
                    endpoint,
                    "bind vxlan to tunnel",
                    &tunnel_membership_payload(vxlan, tunnel_id),
                )?;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vsi_payload() {
        let xml = vsi_payload(EditOp::Merge, 1001);
        assert!(xml.starts_with("<config xmlns=\"urn:ietf:params:xml:ns:netconf:base:1.0\""));
        assert!(xml.contains(r#"<top xmlns="http://www.h3c.com/netconf/config:1.0">"#));
        assert!(xml.contains(r#"<L2VPN xc:operation="merge"><VSIs><VSI><VsiName>vsi1001</VsiName>"#));
        assert!(xml.ends_with("</top></config>"));

        let xml = vsi_payload(EditOp::Remove, 1001);
        assert!(xml.contains(r#"<L2VPN xc:operation="remove">"#));
    }

    #[test]
    fn test_vxlan_payload_names_vsi_only_on_merge() {
        let merge = vxlan_payload(EditOp::Merge, 5000);
        assert!(merge.contains("<VxlanID>5000</VxlanID><VsiName>vsi5000</VsiName>"));

        let remove = vxlan_payload(EditOp::Remove, 5000);
        assert!(remove.contains(r#"<VXLAN xc:operation="remove">"#));
        assert!(remove.contains("<VxlanID>5000</VxlanID></Vxlan>"));
        assert!(!remove.contains("VsiName"));
    }

    #[test]
    fn test_tunnel_payloads() {
        let create = tunnel_create_payload(7, "192.168.0.1", "192.168.0.2");
        assert!(create.contains("<ID>7</ID><Mode>24</Mode>"));
        assert!(create.contains("<SrcAddr>192.168.0.1</SrcAddr><DstAddr>192.168.0.2</DstAddr>"));

        let delete = tunnel_delete_payload(7);
        assert!(delete.contains(r#"<TUNNEL xc:operation="remove"><Tunnels><Tunnel><ID>7</ID></Tunnel>"#));

        let member = tunnel_membership_payload(1001, 7);
        assert!(member.contains("<VxlanID>1001</VxlanID><TunnelID>7</TunnelID>"));
    }

    #[test]
    fn test_port_binding_payloads() {
        let srv = srv_payload(EditOp::Merge, 5, 4002);
        assert!(srv.contains("<IfIndex>5</IfIndex><SrvID>4002</SrvID><Encap>4</Encap><SVlanRange>4002</SVlanRange>"));
        let srv = srv_payload(EditOp::Remove, 5, 4002);
        assert!(srv.contains("<SrvID>4002</SrvID></SRV>"));

        let ac = ac_payload(EditOp::Merge, 5, 4002, 1001);
        assert!(ac.contains("<IfIndex>5</IfIndex><SrvID>4002</SrvID><VsiName>vsi1001</VsiName>"));
        let ac = ac_payload(EditOp::Remove, 5, 4002, 1001);
        assert!(!ac.contains("VsiName"));
    }

    #[test]
    fn test_reply_classification() {
        assert!(reply_ok(r#"<rpc-reply message-id="1" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><ok/></rpc-reply>"#));
        assert!(reply_ok("<nc:rpc-reply><nc:ok /></nc:rpc-reply>"));
        assert!(!reply_ok("<rpc-reply><data/></rpc-reply>"));

        let err = concat!(
            "<rpc-reply><rpc-error><error-type>application</error-type>",
            "<error-message xml:lang=\"en\">Tunnel 7 does not exist.</error-message>",
            "</rpc-error></rpc-reply>",
        );
        assert!(!reply_ok(err));
        assert_eq!(reply_error(err), "Tunnel 7 does not exist.");
        assert_eq!(reply_error("<rpc-reply/>"), "<rpc-reply/>");
    }

    #[test]
    fn test_parse_available_tunnel_id() {
        let reply = concat!(
            "<rpc-reply><data><top xmlns=\"http://www.h3c.com/netconf/data:1.0\">",
            "<TUNNEL><AvailableTunnelID>\n  <ID>3</ID>\n  <ID> 12 </ID>\n</AvailableTunnelID></TUNNEL>",
            "</top></data></rpc-reply>",
        );
        assert_eq!(parse_available_tunnel_id(reply), Some(12));
        assert_eq!(parse_available_tunnel_id("<rpc-reply><data/></rpc-reply>"), None);
    }

    #[test]
    fn test_reply_patterns_compile_once() {
        assert!(cached_regex(&OK_RE, OK_PATTERN).is_some());
        assert!(cached_regex(&ERROR_MESSAGE_RE, ERROR_MESSAGE_PATTERN).is_some());
        assert!(cached_regex(&TUNNEL_ID_RE, TUNNEL_ID_PATTERN).is_some());

        let first = cached_regex(&OK_RE, OK_PATTERN).unwrap() as *const Regex;
        let second = cached_regex(&OK_RE, OK_PATTERN).unwrap() as *const Regex;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_operations_require_initialize() {
        let driver = H3cDriver::new(H3cOptions {
            port: 830,
            session_ttl_secs: 30,
            timeout_secs: 1,
        });
        let err = driver.delete_tunnel("10.0.0.1", 1).await.unwrap_err();
        assert!(matches!(err, DriverError::NotInitialized(ep) if ep == "10.0.0.1"));

        // Nothing to bind is not a device call
        driver.ensure_tunnel_membership("10.0.0.1", &[], &[1]).await.unwrap();
    }
}
