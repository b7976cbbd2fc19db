//! Wake-on-LAN magic packets.

use crate::error::Result;
use crate::mac::MacAddress;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;

pub const MAGIC_PACKET_LEN: usize = 102;

/// Discard port, the conventional wake target.
const PRIMARY_PORT: u16 = 9;
/// Echo port, which some older NICs listen on instead.
const SECONDARY_PORT: u16 = 7;

/// Six `0xFF` bytes followed by the hardware address sixteen times.
pub fn magic_packet(mac: &MacAddress) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0xFF; MAGIC_PACKET_LEN];
    for chunk in packet[6..].chunks_exact_mut(6) {
        chunk.copy_from_slice(&mac.octets());
    }
    packet
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeResult {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkWakeResult {
    /// Keyed by the address exactly as the caller passed it.
    pub results: BTreeMap<String, WakeResult>,
    pub total: usize,
    pub success_count: usize,
}

#[derive(Debug, Clone)]
pub struct WakeOnLan {
    broadcast: Ipv4Addr,
}

impl Default for WakeOnLan {
    fn default() -> Self {
        Self::new(Ipv4Addr::BROADCAST)
    }
}

impl WakeOnLan {
    pub fn new(broadcast: Ipv4Addr) -> Self {
        Self { broadcast }
    }

    pub async fn wake(&self, mac: &str) -> WakeResult {
        let mac = match mac.parse::<MacAddress>() {
            Ok(mac) => mac,
            Err(e) => {
                return WakeResult {
                    success: false,
                    message: e.to_string(),
                };
            }
        };

        match self.send(&mac).await {
            Ok(()) => {
                tracing::info!("Sent wake packet to {} via {}", mac, self.broadcast);
                WakeResult {
                    success: true,
                    message: format!("Wake-on-LAN packet sent to {}", mac),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to send wake packet to {}: {}", mac, e);
                WakeResult {
                    success: false,
                    message: format!("Failed to send Wake-on-LAN packet: {}", e),
                }
            }
        }
    }

    /// Wake every address concurrently. One failure never stops the others.
    pub async fn wake_many(&self, macs: &[String]) -> BulkWakeResult {
        let outcomes = join_all(macs.iter().map(|mac| async move {
            (mac.clone(), self.wake(mac).await)
        }))
        .await;

        let results: BTreeMap<String, WakeResult> = outcomes.into_iter().collect();
        let success_count = results.values().filter(|r| r.success).count();

        BulkWakeResult {
            total: macs.len(),
            success_count,
            results,
        }
    }

    async fn send(&self, mac: &MacAddress) -> Result<()> {
        let packet = magic_packet(mac);
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;

        socket
            .send_to(&packet, SocketAddr::from((self.broadcast, PRIMARY_PORT)))
            .await?;

        if let Err(e) = socket
            .send_to(&packet, SocketAddr::from((self.broadcast, SECONDARY_PORT)))
            .await
        {
            tracing::debug!("Secondary wake send to port {} failed: {}", SECONDARY_PORT, e);
        }
        Ok(())
    }
}
