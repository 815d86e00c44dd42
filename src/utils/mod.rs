use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::time::Duration;

/// Keyboard-interactive prompt handler that always responds with the password
struct PasswordPrompt {
    password: String,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

/// Normalize MAC address to lowercase with colons.
/// Accepts colon, dash, space or no separators (SNMP renders chassis ids
/// as space-separated hex octets).
pub fn normalize_mac(mac: &str) -> String {
    let clean: String = mac
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .collect();

    if clean.len() != 12 {
        return mac.trim().to_lowercase();
    }

    clean
        .chars()
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|c| c.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(":")
        .to_lowercase()
}

/// Validate an IPv4 address (e.g., "192.168.1.1").
/// Returns true if the string is a valid dotted-decimal IPv4 address.
pub fn is_valid_ipv4(ip: &str) -> bool {
    let parts: Vec<&str> = ip.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|p| p.parse::<u8>().is_ok())
}

/// Validate a hostname.
/// Allows alphanumeric, hyphens, dots, and underscores. No path separators or shell metacharacters.
pub fn is_valid_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > 253 {
        return false;
    }
    hostname.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
}

/// Validate a resource id as a UUID (cloud networking ids are UUIDs)
pub fn is_valid_uuid(id: &str) -> bool {
    uuid::Uuid::parse_str(id).is_ok()
}

/// Create an SSH session and authenticate with password + keyboard-interactive.
/// Returns the authenticated Session. Uses the ssh2 crate (libssh2).
/// This is blocking, so call from a spawn_blocking context.
pub fn ssh_connect(
    host: &str,
    port: u16,
    user: &str,
    pass: &str,
    timeout_secs: u64,
) -> Result<ssh2::Session, String> {
    let ip: Ipv4Addr = host
        .parse()
        .map_err(|e| format!("Invalid address {}: {}", host, e))?;
    let addr = SocketAddr::from((ip, port));
    let tcp = TcpStream::connect_timeout(&addr, Duration::from_secs(timeout_secs))
        .map_err(|e| format!("TCP connection to {} failed: {}", addr, e))?;

    tcp.set_read_timeout(Some(Duration::from_secs(timeout_secs)))
        .ok();
    tcp.set_write_timeout(Some(Duration::from_secs(timeout_secs)))
        .ok();

    let mut session = ssh2::Session::new()
        .map_err(|e| format!("Failed to create SSH session: {}", e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout_secs as u32 * 1000);
    session.handshake()
        .map_err(|e| format!("SSH handshake failed: {}", e))?;

    // Try password auth first
    match session.userauth_password(user, pass) {
        Ok(_) if session.authenticated() => return Ok(session),
        _ => {}
    }

    // Try keyboard-interactive auth (some switch OSes only offer this)
    let mut prompter = PasswordPrompt { password: pass.to_string() };
    let _ = session.userauth_keyboard_interactive(user, &mut prompter);

    if session.authenticated() {
        Ok(session)
    } else {
        Err("SSH authentication failed: all methods exhausted".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("AA:BB:CC:DD:EE:FF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(normalize_mac("AA-BB-CC-DD-EE-FF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(normalize_mac("AABBCCDDEEFF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(normalize_mac("3C 8C 40 AB 01 02 "), "3c:8c:40:ab:01:02");
        assert_eq!(normalize_mac(" not-a-mac "), "not-a-mac");
    }

    #[test]
    fn test_is_valid_ipv4() {
        assert!(is_valid_ipv4("192.168.1.1"));
        assert!(is_valid_ipv4("0.0.0.0"));
        assert!(is_valid_ipv4("255.255.255.255"));
        assert!(!is_valid_ipv4(""));
        assert!(!is_valid_ipv4("not-an-ip"));
        assert!(!is_valid_ipv4("256.1.1.1"));
        assert!(!is_valid_ipv4("1.2.3"));
        assert!(!is_valid_ipv4("1.2.3.4.5"));
        assert!(!is_valid_ipv4("1.2.3.-1"));
        assert!(!is_valid_ipv4("; rm -rf /"));
    }

    #[test]
    fn test_is_valid_hostname() {
        assert!(is_valid_hostname("compute-01"));
        assert!(is_valid_hostname("node.rack3.local"));
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("host name"));
        assert!(!is_valid_hostname("host;rm"));
        assert!(!is_valid_hostname("../etc/passwd"));
    }

    #[test]
    fn test_is_valid_uuid() {
        assert!(is_valid_uuid("5b0e3d0e-8a4f-4a1c-9d57-0d7c8e2f6b11"));
        assert!(!is_valid_uuid("port-1"));
        assert!(!is_valid_uuid(""));
    }
}
