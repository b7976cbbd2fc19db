//! Gateway-centred view of the known devices.
//!
//! Without switch or access-point data the only link that can be inferred is
//! each device's path to the default gateway, so every addressed device gets
//! one edge to the gateway's record.

use crate::mac::MacAddress;
use crate::model::{Device, DeviceId, DeviceStatus};
use crate::ports::DeviceType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: DeviceId,
    pub label: String,
    pub ip: Option<Ipv4Addr>,
    pub mac: MacAddress,
    pub status: DeviceStatus,
    pub vendor: String,
    pub device_type: DeviceType,
    pub is_gateway: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub from: DeviceId,
    pub to: DeviceId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub gateway_ip: Option<Ipv4Addr>,
    /// The stored device at the gateway address, if the gateway has been swept.
    pub gateway: Option<DeviceId>,
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
}

/// Nickname, hostname, address, then hardware address.
fn node_label(device: &Device) -> String {
    device
        .nickname
        .clone()
        .or_else(|| device.hostname.clone())
        .or_else(|| device.ip.map(|ip| ip.to_string()))
        .unwrap_or_else(|| device.mac.to_string())
}

/// Build the graph. `device_types` holds the classification of devices that
/// have been port-probed; the rest are `Unknown`.
pub fn build_topology(
    devices: &[Device],
    gateway_ip: Option<Ipv4Addr>,
    device_types: &HashMap<DeviceId, DeviceType>,
    now: DateTime<Utc>,
) -> Topology {
    let gateway = gateway_ip.and_then(|gw| {
        devices
            .iter()
            .find(|d| d.ip == Some(gw))
            .map(|d| d.id)
    });

    let nodes = devices
        .iter()
        .map(|device| TopologyNode {
            id: device.id,
            label: node_label(device),
            ip: device.ip,
            mac: device.mac,
            status: device.status_at(now),
            vendor: device.vendor(),
            device_type: device_types
                .get(&device.id)
                .copied()
                .unwrap_or(DeviceType::Unknown),
            is_gateway: Some(device.id) == gateway,
        })
        .collect();

    let edges = match gateway {
        Some(to) => devices
            .iter()
            .filter(|d| d.ip.is_some() && d.id != to)
            .map(|d| TopologyEdge { from: d.id, to })
            .collect(),
        None => Vec::new(),
    };

    Topology {
        gateway_ip,
        gateway,
        nodes,
        edges,
    }
}
