//! NetBIOS node status (NBSTAT) query, RFC 1002.

use super::NameResolver;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

const NETBIOS_NS_PORT: u16 = 137;

/// Group names have the high bit of the first flag byte set.
const GROUP_FLAG: u8 = 0x80;

#[derive(Debug, Clone)]
pub struct NetBios {
    timeout: Duration,
}

impl Default for NetBios {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl NameResolver for NetBios {
    fn name(&self) -> &'static str {
        "netbios"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn resolve(&self, ip: Ipv4Addr) -> Option<String> {
        tokio::time::timeout(self.timeout, query(ip))
            .await
            .ok()
            .flatten()
    }
}

async fn query(ip: Ipv4Addr) -> Option<String> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.ok()?;
    socket
        .send_to(&build_nbstat_query(), SocketAddr::from((ip, NETBIOS_NS_PORT)))
        .await
        .ok()?;

    let mut buf = [0u8; 1024];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await.ok()?;
        if from.ip() == ip {
            return parse_nbstat_response(&buf[..len]);
        }
    }
}

/// Wildcard `*` node status request.
fn build_nbstat_query() -> Vec<u8> {
    let mut query = Vec::with_capacity(50);
    query.extend_from_slice(&[0x4C, 0x43]); // transaction id
    query.extend_from_slice(&[0x00, 0x00]); // flags
    query.extend_from_slice(&[0x00, 0x01]); // one question
    query.extend_from_slice(&[0x00; 6]);

    // First-level encoding: each nibble becomes 'A' + nibble
    query.push(32);
    for &b in b"*\0\0\0\0\0\0\0\0\0\0\0\0\0\0\0" {
        query.push((b >> 4) + b'A');
        query.push((b & 0x0F) + b'A');
    }
    query.push(0);

    query.extend_from_slice(&[0x00, 0x21]); // NBSTAT
    query.extend_from_slice(&[0x00, 0x01]); // IN
    query
}

/// First unique workstation name (`<00>` suffix) in the node name table.
fn parse_nbstat_response(data: &[u8]) -> Option<String> {
    // Header, then the echoed question name
    let mut pos = 12;
    while *data.get(pos)? != 0 {
        pos += 1 + data[pos] as usize;
    }
    // Terminator, type, class, ttl, rdlength
    pos += 1 + 2 + 2 + 4 + 2;

    let count = *data.get(pos)? as usize;
    pos += 1;

    for _ in 0..count {
        let entry = data.get(pos..pos + 18)?;
        pos += 18;

        let suffix = entry[15];
        let flags = entry[16];
        if suffix != 0x00 || flags & GROUP_FLAG != 0 {
            continue;
        }

        let name = String::from_utf8_lossy(&entry[..15])
            .trim_end_matches(['\0', ' '])
            .to_string();
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_graphic()) {
            return Some(name);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, suffix: u8, flags: u8) -> Vec<u8> {
        let mut e = format!("{:<15}", name).into_bytes();
        e.push(suffix);
        e.extend_from_slice(&[flags, 0x00]);
        e
    }

    fn response(entries: &[Vec<u8>]) -> Vec<u8> {
        let query = build_nbstat_query();
        let mut msg = query[..12].to_vec();
        msg[2] = 0x84;
        msg[7] = 1;
        msg.extend_from_slice(&query[12..46]); // encoded name with terminator
        msg.extend_from_slice(&[0x00, 0x21, 0x00, 0x01]);
        msg.extend_from_slice(&[0, 0, 0, 0]);
        let rdlength = 1 + entries.len() * 18 + 46;
        msg.extend_from_slice(&(rdlength as u16).to_be_bytes());
        msg.push(entries.len() as u8);
        for e in entries {
            msg.extend_from_slice(e);
        }
        msg.extend_from_slice(&[0u8; 46]); // statistics
        msg
    }

    #[test]
    fn query_layout() {
        let query = build_nbstat_query();
        assert_eq!(query.len(), 50);
        assert_eq!(query[12], 32);
        assert_eq!(&query[13..15], b"CK");
        assert_eq!(&query[15..17], b"AA");
        assert_eq!(&query[46..], &[0x00, 0x21, 0x00, 0x01]);
    }

    #[test]
    fn picks_unique_workstation_name() {
        let msg = response(&[
            entry("WORKGROUP", 0x00, 0x84),
            entry("OFFICE-PC", 0x20, 0x04),
            entry("OFFICE-PC", 0x00, 0x04),
        ]);
        assert_eq!(parse_nbstat_response(&msg).as_deref(), Some("OFFICE-PC"));
    }

    #[test]
    fn no_usable_name() {
        let msg = response(&[entry("WORKGROUP", 0x00, 0x84)]);
        assert_eq!(parse_nbstat_response(&msg), None);
        assert_eq!(parse_nbstat_response(&msg[..40]), None);
    }
}
