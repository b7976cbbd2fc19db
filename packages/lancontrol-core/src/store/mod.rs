//! Device store capability.
//!
//! The engine never owns persistence. Everything it reads or writes goes
//! through [`DeviceStore`]; [`MemoryStore`] is the in-process implementation
//! used by the CLI (with JSON snapshots) and by tests.

mod memory;

pub use memory::{DeviceEdit, MemoryStore, StoreSnapshot};

use crate::config::Settings;
use crate::mac::MacAddress;
use crate::model::{
    AlertEvent, AlertRule, Device, DeviceId, DeviceStatus, DiscoveredHost, NewAlert, PortFinding,
    StatusEvent, TrafficSample,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result of upserting a discovered host.
#[derive(Debug, Clone)]
pub struct Upserted {
    pub device: Device,
    pub created: bool,
}

/// Outcome of [`DeviceStore::append_status_if_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// The status repeats the most recent event; nothing was written.
    Unchanged,
    /// An event was written. `previous` is the status it superseded.
    Recorded { previous: Option<DeviceStatus> },
}

impl StatusChange {
    pub fn is_recorded(&self) -> bool {
        matches!(self, StatusChange::Recorded { .. })
    }

    /// The status this write moved away from, if one had been recorded.
    pub fn transition_from(&self) -> Option<DeviceStatus> {
        match self {
            StatusChange::Recorded { previous } => *previous,
            StatusChange::Unchanged => None,
        }
    }
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Insert or update the device keyed by `mac`. Updates refresh address,
    /// hostname (when resolved) and `last_seen`; they never change the key or
    /// user-owned fields.
    async fn upsert_discovered(&self, mac: MacAddress, host: &DiscoveredHost) -> Result<Upserted>;

    async fn device(&self, id: DeviceId) -> Result<Option<Device>>;

    async fn device_by_mac(&self, mac: MacAddress) -> Result<Option<Device>>;

    async fn devices(&self) -> Result<Vec<Device>>;

    async fn mark_seen(&self, id: DeviceId, at: DateTime<Utc>) -> Result<()>;

    /// Most recent recorded status, if any.
    async fn latest_status(&self, id: DeviceId) -> Result<Option<DeviceStatus>>;

    async fn append_status(&self, event: StatusEvent) -> Result<()>;

    /// Append a status event unless it repeats the most recent one.
    ///
    /// Concurrent sweeps and polls both land here, so implementations must
    /// make the comparison and the write one step. The default is only
    /// correct for stores with a single writer.
    async fn append_status_if_changed(
        &self,
        id: DeviceId,
        status: DeviceStatus,
        at: DateTime<Utc>,
    ) -> Result<StatusChange> {
        let previous = self.latest_status(id).await?;
        if previous == Some(status) {
            return Ok(StatusChange::Unchanged);
        }
        self.append_status(StatusEvent {
            device_id: id,
            status,
            timestamp: at,
        })
        .await?;
        Ok(StatusChange::Recorded { previous })
    }

    /// A device's status events at or after `since`, oldest first.
    async fn status_events_since(
        &self,
        id: DeviceId,
        since: DateTime<Utc>,
    ) -> Result<Vec<StatusEvent>>;

    /// Delete status events older than `before`. Returns how many went.
    async fn prune_status_history(&self, before: DateTime<Utc>) -> Result<usize>;

    /// `None` when the device has never been port-probed.
    async fn port_findings(&self, id: DeviceId) -> Result<Option<Vec<PortFinding>>>;

    /// Replace the whole finding set for a device.
    async fn replace_port_findings(&self, id: DeviceId, findings: Vec<PortFinding>) -> Result<()>;

    async fn append_traffic(&self, samples: Vec<TrafficSample>) -> Result<()>;

    /// Traffic samples for every device taken at or after `since`.
    async fn traffic_since(&self, since: DateTime<Utc>) -> Result<Vec<TrafficSample>>;

    async fn prune_traffic(&self, before: DateTime<Utc>) -> Result<usize>;

    async fn append_alert(&self, alert: NewAlert) -> Result<AlertEvent>;

    async fn mark_alert_notified(&self, alert_id: u64) -> Result<()>;

    async fn enabled_alert_rules(&self) -> Result<Vec<AlertRule>>;

    async fn settings(&self) -> Result<Settings>;
}
