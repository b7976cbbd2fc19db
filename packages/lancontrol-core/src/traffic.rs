//! Per-device traffic counters from the kernel connection-tracking table.
//!
//! Each tracked connection is charged to the address that opened it: the
//! original-direction counters are bytes it sent, the reply-direction
//! counters are bytes it received. Counters are only present when the kernel
//! has connection accounting enabled (`nf_conntrack_acct=1`); without it the
//! connection counts are still reported.

use crate::error::{Error, Result};
#[cfg(target_os = "linux")]
use crate::scanner::hidden_command;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Totals for one address over the connections in a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficCounters {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub connections: u32,
}

/// Source of connection-tracking listings. Calls may block.
pub trait ConnectionTracker: Send + Sync {
    /// The table in `conntrack -L -o extended` form.
    fn snapshot(&self) -> Result<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemConntrack;

impl ConnectionTracker for SystemConntrack {
    #[cfg(target_os = "linux")]
    fn snapshot(&self) -> Result<String> {
        if let Ok(table) = std::fs::read_to_string("/proc/net/nf_conntrack") {
            return Ok(table);
        }

        let output = hidden_command("conntrack")
            .args(["-L", "-o", "extended"])
            .output()
            .map_err(|e| Error::Unavailable {
                source_name: "conntrack",
                detail: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::Unavailable {
                source_name: "conntrack",
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    #[cfg(not(target_os = "linux"))]
    fn snapshot(&self) -> Result<String> {
        Err(Error::Unavailable {
            source_name: "conntrack",
            detail: "connection tracking is only readable on Linux".to_string(),
        })
    }
}

/// Sum a connection-tracking listing per originating IPv4 address. Lines
/// for other address families are skipped.
pub fn parse_conntrack(table: &str) -> HashMap<Ipv4Addr, TrafficCounters> {
    let mut totals: HashMap<Ipv4Addr, TrafficCounters> = HashMap::new();

    for line in table.lines() {
        let mut source = None;
        let mut bytes = Vec::with_capacity(2);
        let mut packets = Vec::with_capacity(2);

        for token in line.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            match key {
                "src" if source.is_none() => source = Some(value),
                "bytes" => bytes.push(value.parse::<u64>().unwrap_or(0)),
                "packets" => packets.push(value.parse::<u64>().unwrap_or(0)),
                _ => {}
            }
        }

        let Some(ip) = source.and_then(|s| s.parse::<Ipv4Addr>().ok()) else {
            continue;
        };

        let entry = totals.entry(ip).or_default();
        entry.connections += 1;
        entry.bytes_sent += bytes.first().copied().unwrap_or(0);
        entry.bytes_received += bytes.get(1).copied().unwrap_or(0);
        entry.packets_sent += packets.first().copied().unwrap_or(0);
        entry.packets_received += packets.get(1).copied().unwrap_or(0);
    }

    totals
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
ipv4     2 tcp      6 431999 ESTABLISHED src=192.168.1.20 dst=93.184.216.34 sport=51234 dport=443 packets=12 bytes=3400 src=93.184.216.34 dst=192.168.1.20 sport=443 dport=51234 packets=10 bytes=9800 [ASSURED] mark=0 use=1
ipv4     2 udp      17 29 src=192.168.1.20 dst=192.168.1.1 sport=40000 dport=53 packets=1 bytes=60 src=192.168.1.1 dst=192.168.1.20 sport=53 dport=40000 packets=1 bytes=120 mark=0 use=1
ipv4     2 tcp      6 117 TIME_WAIT src=192.168.1.31 dst=192.168.1.20 sport=55000 dport=22 packets=5 bytes=400 src=192.168.1.20 dst=192.168.1.31 sport=22 dport=55000 packets=4 bytes=900 [ASSURED] mark=0 use=1
ipv6     10 tcp      6 300 ESTABLISHED src=fe80::1 dst=fe80::2 sport=1 dport=2 packets=1 bytes=1 src=fe80::2 dst=fe80::1 sport=2 dport=1 packets=1 bytes=1 mark=0 use=1
";

    #[test]
    fn charges_connections_to_their_originator() {
        let totals = parse_conntrack(TABLE);
        assert_eq!(totals.len(), 2);

        let desktop = totals[&Ipv4Addr::new(192, 168, 1, 20)];
        assert_eq!(
            desktop,
            TrafficCounters {
                bytes_sent: 3460,
                bytes_received: 9920,
                packets_sent: 13,
                packets_received: 11,
                connections: 2,
            }
        );

        let laptop = totals[&Ipv4Addr::new(192, 168, 1, 31)];
        assert_eq!(laptop.bytes_sent, 400);
        assert_eq!(laptop.bytes_received, 900);
        assert_eq!(laptop.connections, 1);
    }

    #[test]
    fn connections_count_without_accounting() {
        let table = "tcp      6 431999 ESTABLISHED src=10.0.0.4 dst=10.0.0.9 sport=1 dport=2 src=10.0.0.9 dst=10.0.0.4 sport=2 dport=1 mark=0 use=1\n\n";
        let totals = parse_conntrack(table);
        let counters = totals[&Ipv4Addr::new(10, 0, 0, 4)];
        assert_eq!(counters.connections, 1);
        assert_eq!(counters.bytes_sent, 0);
    }
}
