use std::env;

/// Config holds all application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub db_path: String,
    pub db_max_connections: u32,
    pub listen_addr: String,
    pub switch_drivers: Vec<String>,
    pub switch_user: String,
    pub switch_pass: String,
    pub netconf_port: u16,
    pub session_ttl_secs: u64,
    pub driver_timeout_secs: u64,
    pub snmp_community: String,
    pub snmpwalk_bin: String,
    /// 0 disables the periodic topology refresh
    pub topology_refresh_secs: u64,
    /// Empty means peers are the registered switches
    pub tunnel_registry_url: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        Self {
            app_name: get_env("APP_NAME", "torconf"),
            db_path: get_env("DB_PATH", "/data/torconf.db"),
            db_max_connections: get_env("DB_MAX_CONNECTIONS", "5")
                .parse()
                .unwrap_or(5),
            listen_addr: get_env("LISTEN_ADDR", "127.0.0.1:8080"),
            switch_drivers: parse_list(&get_env("SWITCH_DRIVERS", "h3c")),
            switch_user: get_env("SWITCH_USER", "admin"),
            switch_pass: get_env("SWITCH_PASS", ""),
            netconf_port: get_env("NETCONF_PORT", "830").parse().unwrap_or(830),
            session_ttl_secs: get_env("SESSION_TTL_SECS", "30").parse().unwrap_or(30),
            driver_timeout_secs: get_env("DRIVER_TIMEOUT_SECS", "30").parse().unwrap_or(30),
            snmp_community: get_env("SNMP_COMMUNITY", "public"),
            snmpwalk_bin: get_env("SNMPWALK_BIN", "snmpwalk"),
            topology_refresh_secs: get_env("TOPOLOGY_REFRESH_SECS", "0").parse().unwrap_or(0),
            tunnel_registry_url: get_env("TUNNEL_REGISTRY_URL", ""),
        }
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("h3c, simulated,"), vec!["h3c", "simulated"]);
        assert!(parse_list("").is_empty());
    }
}
