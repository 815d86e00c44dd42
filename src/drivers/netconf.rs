use std::io::{Read, Write};

use crate::utils::ssh_connect;

/// NETCONF 1.0 end-of-message delimiter
const FRAME_END: &str = "]]>]]>";

const NETCONF_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

const CLIENT_HELLO: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8"?>"#,
    r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">"#,
    "<capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities>",
    "</hello>",
);

/// A blocking NETCONF client over the SSH `netconf` subsystem.
/// Every method blocks; callers run it under `spawn_blocking`.
pub struct NetconfSession {
    // Keep the session alive for as long as the channel is used
    _session: ssh2::Session,
    channel: ssh2::Channel,
    message_id: u64,
}

impl NetconfSession {
    pub fn connect(
        host: &str,
        port: u16,
        user: &str,
        pass: &str,
        timeout_secs: u64,
    ) -> Result<Self, String> {
        let session = ssh_connect(host, port, user, pass, timeout_secs)?;
        let mut channel = session
            .channel_session()
            .map_err(|e| format!("Failed to open channel: {}", e))?;
        channel
            .subsystem("netconf")
            .map_err(|e| format!("Failed to start netconf subsystem: {}", e))?;

        let mut netconf = Self {
            _session: session,
            channel,
            message_id: 0,
        };
        let server_hello = netconf.read_message()?;
        if !server_hello.contains("<capabilities") {
            return Err("Server hello carried no capabilities".to_string());
        }
        netconf.write_message(CLIENT_HELLO)?;
        Ok(netconf)
    }

    /// edit-config against the running datastore
    pub fn edit_config(&mut self, config: &str) -> Result<String, String> {
        let body = format!(
            "<edit-config><target><running/></target>{}</edit-config>",
            config
        );
        self.rpc(&body)
    }

    /// get with a subtree filter
    pub fn get(&mut self, filter: &str) -> Result<String, String> {
        let body = format!(r#"<get><filter type="subtree">{}</filter></get>"#, filter);
        self.rpc(&body)
    }

    pub fn close(mut self) {
        let id = self.next_message_id();
        let msg = format!(
            r#"<rpc message-id="{}" xmlns="{}"><close-session/></rpc>"#,
            id, NETCONF_NS
        );
        let _ = self.write_message(&msg);
        let _ = self.channel.send_eof();
        let _ = self.channel.wait_close();
    }

    fn next_message_id(&mut self) -> u64 {
        self.message_id += 1;
        self.message_id
    }

    fn rpc(&mut self, body: &str) -> Result<String, String> {
        let id = self.next_message_id();
        let msg = format!(r#"<rpc message-id="{}" xmlns="{}">{}</rpc>"#, id, NETCONF_NS, body);
        self.write_message(&msg)?;
        self.read_message()
    }

    fn write_message(&mut self, msg: &str) -> Result<(), String> {
        self.channel
            .write_all(msg.as_bytes())
            .and_then(|_| self.channel.write_all(FRAME_END.as_bytes()))
            .and_then(|_| self.channel.flush())
            .map_err(|e| format!("Failed to write netconf message: {}", e))
    }

    fn read_message(&mut self) -> Result<String, String> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self
                .channel
                .read(&mut chunk)
                .map_err(|e| format!("Failed to read netconf reply: {}", e))?;
            if n == 0 {
                return Err("Netconf channel closed".to_string());
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(message) = split_frame(&buf) {
                return Ok(message);
            }
        }
    }
}

/// Return the message preceding the first end-of-message delimiter
fn split_frame(buf: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(buf);
    text.find(FRAME_END)
        .map(|pos| text[..pos].trim().to_string())
}
