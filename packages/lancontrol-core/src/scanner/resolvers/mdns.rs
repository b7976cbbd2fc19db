//! Multicast DNS reverse lookup.
//!
//! Sends a PTR query for `d.c.b.a.in-addr.arpa` straight to the host's mDNS
//! port from an ephemeral port. Responders treat that as a legacy unicast
//! query and answer the sender directly.

use super::{NameResolver, clean_hostname};
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

const MDNS_PORT: u16 = 5353;
const TYPE_PTR: u16 = 12;
const CLASS_IN: u16 = 1;

#[derive(Debug, Clone)]
pub struct Mdns {
    timeout: Duration,
}

impl Default for Mdns {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
        }
    }
}

#[async_trait]
impl NameResolver for Mdns {
    fn name(&self) -> &'static str {
        "mdns"
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
    let target = SocketAddr::from((ip, MDNS_PORT));
    let id = transaction_id(ip);
    socket.send_to(&build_ptr_query(id, ip), target).await.ok()?;

    let mut buf = [0u8; 1500];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await.ok()?;
        if from.ip() != ip {
            continue;
        }
        if let Some(name) = parse_ptr_answer(&buf[..len]) {
            return clean_hostname(&name);
        }
    }
}

fn transaction_id(ip: Ipv4Addr) -> u16 {
    let [_, _, c, d] = ip.octets();
    u16::from_be_bytes([c, d])
}

fn reverse_name(ip: Ipv4Addr) -> String {
    let [a, b, c, d] = ip.octets();
    format!("{d}.{c}.{b}.{a}.in-addr.arpa")
}

fn build_ptr_query(id: u16, ip: Ipv4Addr) -> Vec<u8> {
    let mut packet = Vec::with_capacity(48);
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x00]); // standard query
    packet.extend_from_slice(&[0x00, 0x01]); // one question
    packet.extend_from_slice(&[0x00; 6]);

    for label in reverse_name(ip).split('.') {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);

    packet.extend_from_slice(&TYPE_PTR.to_be_bytes());
    packet.extend_from_slice(&CLASS_IN.to_be_bytes());
    packet
}

/// Target of the first PTR record in the answer section.
fn parse_ptr_answer(msg: &[u8]) -> Option<String> {
    if msg.len() < 12 || msg[2] & 0x80 == 0 {
        return None;
    }
    let questions = u16::from_be_bytes([msg[4], msg[5]]);
    let answers = u16::from_be_bytes([msg[6], msg[7]]);

    let mut pos = 12;
    for _ in 0..questions {
        pos = skip_name(msg, pos)? + 4;
    }

    for _ in 0..answers {
        pos = skip_name(msg, pos)?;
        let header = msg.get(pos..pos + 10)?;
        let rtype = u16::from_be_bytes([header[0], header[1]]);
        let rdlength = u16::from_be_bytes([header[8], header[9]]) as usize;
        let rdata = pos + 10;
        if rdata + rdlength > msg.len() {
            return None;
        }
        if rtype == TYPE_PTR {
            return read_name(msg, rdata);
        }
        pos = rdata + rdlength;
    }

    None
}

/// Offset just past the name starting at `pos`.
fn skip_name(msg: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let len = *msg.get(pos)?;
        match len {
            0 => return Some(pos + 1),
            l if l & 0xC0 == 0xC0 => return Some(pos + 2),
            l => pos += 1 + l as usize,
        }
    }
}

/// Decode a possibly compressed name. Pointer hops are capped so a
/// malicious loop cannot spin forever.
fn read_name(msg: &[u8], mut pos: usize) -> Option<String> {
    let mut labels = Vec::new();
    let mut hops = 0;

    loop {
        let len = *msg.get(pos)?;
        if len == 0 {
            break;
        }
        if len & 0xC0 == 0xC0 {
            hops += 1;
            if hops > 16 {
                return None;
            }
            let low = *msg.get(pos + 1)?;
            pos = (((len & 0x3F) as usize) << 8) | low as usize;
            continue;
        }
        let label = msg.get(pos + 1..pos + 1 + len as usize)?;
        labels.push(String::from_utf8_lossy(label).into_owned());
        pos += 1 + len as usize;
    }

    (!labels.is_empty()).then(|| labels.join("."))
}
