use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use super::{DiscoverySource, LocalRecord, RemoteNeighbor, RemoteRecord};
use crate::utils::normalize_mac;

/// LLDP-MIB lldpLocalSystemData
const LLDP_LOCAL_OID: &str = "1.0.8802.1.1.2.1.3";
/// LLDP-MIB lldpRemoteSystemsData
const LLDP_REMOTE_OID: &str = "1.0.8802.1.1.2.1.4";

const LOC_CHASSIS_ID: &[u32] = &[1, 0, 8802, 1, 1, 2, 1, 3, 2, 0];
const LOC_SYS_NAME: &[u32] = &[1, 0, 8802, 1, 1, 2, 1, 3, 3, 0];
const LOC_SYS_DESC: &[u32] = &[1, 0, 8802, 1, 1, 2, 1, 3, 4, 0];
const LOC_PORT_ID: &[u32] = &[1, 0, 8802, 1, 1, 2, 1, 3, 7, 1, 3];
const LOC_MAN_ADDR_IF_ID: &[u32] = &[1, 0, 8802, 1, 1, 2, 1, 3, 8, 1, 5];

const REM_CHASSIS_ID: &[u32] = &[1, 0, 8802, 1, 1, 2, 1, 4, 1, 1, 5];
const REM_PORT_DESC: &[u32] = &[1, 0, 8802, 1, 1, 2, 1, 4, 1, 1, 8];
const REM_SYS_NAME: &[u32] = &[1, 0, 8802, 1, 1, 2, 1, 4, 1, 1, 9];
const REM_SYS_DESC: &[u32] = &[1, 0, 8802, 1, 1, 2, 1, 4, 1, 1, 10];
const REM_MAN_ADDR_IF_SUBTYPE: &[u32] = &[1, 0, 8802, 1, 1, 2, 1, 4, 2, 1, 3];

/// Discovery by walking a switch's LLDP-MIB with net-snmp's `snmpwalk`
pub struct SnmpLldpSource {
    snmpwalk: String,
    community: String,
}

impl SnmpLldpSource {
    pub fn new(snmpwalk: &str, community: &str) -> Self {
        Self {
            snmpwalk: snmpwalk.to_string(),
            community: community.to_string(),
        }
    }

    async fn walk(&self, ip: &str, oid: &str) -> Result<String> {
        if !crate::utils::is_valid_ipv4(ip) {
            bail!("Invalid switch address: {}", ip);
        }

        let output = Command::new(&self.snmpwalk)
            .args(["-v", "2c", "-c", &self.community, ip, &format!(".{}", oid)])
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.snmpwalk))?;

        if !output.status.success() {
            bail!(
                "snmpwalk {} {} exited with {}: {}",
                ip,
                oid,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl DiscoverySource for SnmpLldpSource {
    async fn discover(&self, tor_ip: &str) -> Result<(LocalRecord, RemoteRecord)> {
        let local = self.walk(tor_ip, LLDP_LOCAL_OID).await?;
        let remote = self.walk(tor_ip, LLDP_REMOTE_OID).await?;
        Ok((parse_local(&local), parse_remote(&remote)))
    }
}

/// Split `OID = TYPE: value` into numeric oid components and the value
fn parse_line(line: &str) -> Option<(Vec<u32>, String)> {
    let (oid, rest) = line.split_once(" = ")?;
    let value = match rest.split_once(": ") {
        Some((_, value)) => value,
        // Empty values render as `""` or `TYPE:`
        None => "",
    };

    let oid = oid.trim().trim_start_matches('.');
    let oid = match oid.strip_prefix("iso") {
        Some(rest) => format!("1{}", rest),
        None => oid.to_string(),
    };
    let parts = oid
        .split('.')
        .map(|p| p.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;

    Some((parts, value.trim().trim_matches('"').to_string()))
}

fn suffix<'a>(oid: &'a [u32], column: &[u32]) -> Option<&'a [u32]> {
    oid.strip_prefix(column)
}

fn ipv4_tail(oid: &[u32]) -> Option<String> {
    if oid.len() < 4 {
        return None;
    }
    let tail = &oid[oid.len() - 4..];
    if tail.iter().any(|b| *b > 255) {
        return None;
    }
    Some(format!("{}.{}.{}.{}", tail[0], tail[1], tail[2], tail[3]))
}

pub fn parse_local(output: &str) -> LocalRecord {
    let mut local = LocalRecord::default();
    for (oid, value) in output.lines().filter_map(parse_line) {
        if oid == LOC_CHASSIS_ID {
            local.chassis_mac = normalize_mac(&value);
        } else if oid == LOC_SYS_NAME {
            local.sysname = value;
        } else if oid == LOC_SYS_DESC {
            local.desc = value;
        } else if let Some(rest) = suffix(&oid, LOC_PORT_ID) {
            // lldpLocPortId.<portNum>
            if let [index] = rest {
                local.ports.insert(*index, value);
            }
        } else if let Some(rest) = suffix(&oid, LOC_MAN_ADDR_IF_ID) {
            // lldpLocManAddrIfId.<subtype>.<len>.<a>.<b>.<c>.<d> = ifIndex
            if let (Some(addr), Ok(index)) = (ipv4_tail(rest), value.parse::<u32>()) {
                local.mgmt_addrs.insert(addr, index);
            }
        }
    }
    local
}

pub fn parse_remote(output: &str) -> RemoteRecord {
    let mut remote = RemoteRecord::default();
    for (oid, value) in output.lines().filter_map(parse_line) {
        if let Some(rest) = suffix(&oid, REM_MAN_ADDR_IF_SUBTYPE) {
            // .<timeMark>.<localPort>.<remIndex>.<subtype>.<len>.<a>.<b>.<c>.<d>
            if rest.len() == 9 {
                if let Some(ip) = ipv4_tail(rest) {
                    remote.neighbors.entry(rest[1]).or_default().ip = ip;
                }
            }
            continue;
        }

        let columns: [(&[u32], fn(&mut RemoteNeighbor, String)); 4] = [
            (REM_CHASSIS_ID, |n, v| n.mac = normalize_mac(&v)),
            (REM_PORT_DESC, |n, v| n.port_desc = v),
            (REM_SYS_NAME, |n, v| n.hostname = v),
            (REM_SYS_DESC, |n, v| n.host_desc = v),
        ];
        for (column, set) in columns {
            // .<timeMark>.<localPort>.<remIndex>
            if let Some([_, index, _]) = suffix(&oid, column) {
                set(remote.neighbors.entry(*index).or_default(), value);
                break;
            }
        }
    }
    remote
}
