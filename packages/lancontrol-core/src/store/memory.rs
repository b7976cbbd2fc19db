//! In-process device store with JSON-friendly snapshots.

use super::{DeviceStore, StatusChange, Upserted};
use crate::config::Settings;
use crate::mac::MacAddress;
use crate::model::{
    AlertEvent, AlertRule, Device, DeviceId, DeviceStatus, DiscoveredHost, NewAlert, PortFinding,
    StatusEvent, TrafficSample,
};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Serializable copy of everything the store holds except settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub devices: Vec<Device>,
    pub status_history: Vec<StatusEvent>,
    pub port_findings: BTreeMap<DeviceId, Vec<PortFinding>>,
    pub alerts: Vec<AlertEvent>,
    pub traffic: Vec<TrafficSample>,
    pub next_device_id: DeviceId,
    pub next_alert_id: u64,
}

/// User-owned fields to change on a device. `None` leaves a field alone;
/// `Some(None)` clears an optional one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceEdit {
    pub nickname: Option<Option<String>>,
    pub group: Option<Option<String>>,
    pub is_favorite: Option<bool>,
    pub ip: Option<Option<Ipv4Addr>>,
    pub hostname: Option<Option<String>>,
}

impl DeviceEdit {
    pub fn is_empty(&self) -> bool {
        *self == DeviceEdit::default()
    }

    fn apply(&self, device: &mut Device) {
        if let Some(ref nickname) = self.nickname {
            device.nickname = nickname.clone();
        }
        if let Some(ref group) = self.group {
            device.group = group.clone();
        }
        if let Some(favorite) = self.is_favorite {
            device.is_favorite = favorite;
        }
        if let Some(ip) = self.ip {
            device.ip = ip;
        }
        if let Some(ref hostname) = self.hostname {
            device.hostname = hostname.clone();
        }
    }
}

#[derive(Debug)]
struct Inner {
    devices: BTreeMap<DeviceId, Device>,
    status_history: Vec<StatusEvent>,
    port_findings: BTreeMap<DeviceId, Vec<PortFinding>>,
    alerts: Vec<AlertEvent>,
    traffic: Vec<TrafficSample>,
    next_device_id: DeviceId,
    next_alert_id: u64,
    settings: Settings,
}

impl Inner {
    fn allocate_device_id(&mut self) -> DeviceId {
        self.next_device_id += 1;
        self.next_device_id
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(settings: Settings) -> Self {
        Self::from_snapshot(settings, StoreSnapshot::default())
    }

    pub fn from_snapshot(mut settings: Settings, snapshot: StoreSnapshot) -> Self {
        number_rules(&mut settings.alert_rules);

        let next_device_id = snapshot
            .devices
            .iter()
            .map(|d| d.id)
            .max()
            .unwrap_or(0)
            .max(snapshot.next_device_id);
        let next_alert_id = snapshot
            .alerts
            .iter()
            .map(|a| a.id)
            .max()
            .unwrap_or(0)
            .max(snapshot.next_alert_id);

        Self {
            inner: Mutex::new(Inner {
                devices: snapshot.devices.into_iter().map(|d| (d.id, d)).collect(),
                status_history: snapshot.status_history,
                port_findings: snapshot.port_findings,
                alerts: snapshot.alerts,
                traffic: snapshot.traffic,
                next_device_id,
                next_alert_id,
                settings,
            }),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.lock();
        StoreSnapshot {
            devices: inner.devices.values().cloned().collect(),
            status_history: inner.status_history.clone(),
            port_findings: inner.port_findings.clone(),
            alerts: inner.alerts.clone(),
            traffic: inner.traffic.clone(),
            next_device_id: inner.next_device_id,
            next_alert_id: inner.next_alert_id,
        }
    }

    /// Register a device by hand. Manual devices never raise new-device alerts.
    pub fn add_manual_device(
        &self,
        mac: MacAddress,
        ip: Option<Ipv4Addr>,
        nickname: Option<String>,
    ) -> Result<Device> {
        let mut inner = self.inner.lock();
        if inner.devices.values().any(|d| d.mac == mac) {
            return Err(anyhow!("Device with MAC {} already exists", mac));
        }

        let id = inner.allocate_device_id();
        let device = Device {
            id,
            mac,
            ip,
            hostname: None,
            nickname,
            group: None,
            is_favorite: false,
            is_manual: true,
            is_local: false,
            last_seen: None,
            created_at: Utc::now(),
        };
        inner.devices.insert(id, device.clone());
        Ok(device)
    }

    /// Change user-owned fields. The hardware address is the key and never
    /// changes.
    pub fn update_device(&self, id: DeviceId, edit: &DeviceEdit) -> Result<Device> {
        let mut inner = self.inner.lock();
        let device = inner
            .devices
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Device {} not found", id))?;
        edit.apply(device);
        Ok(device.clone())
    }

    /// Delete a device with its status history, port findings and traffic
    /// samples. Alerts stay as a log.
    pub fn remove_device(&self, id: DeviceId) -> Result<Device> {
        let mut inner = self.inner.lock();
        let device = inner
            .devices
            .remove(&id)
            .ok_or_else(|| anyhow!("Device {} not found", id))?;
        inner.status_history.retain(|e| e.device_id != id);
        inner.port_findings.remove(&id);
        inner.traffic.retain(|t| t.device_id != id);
        Ok(device)
    }

    pub fn status_history(&self, id: DeviceId) -> Vec<StatusEvent> {
        self.inner
            .lock()
            .status_history
            .iter()
            .filter(|e| e.device_id == id)
            .cloned()
            .collect()
    }

    /// Alerts, newest first.
    pub fn alerts(&self) -> Vec<AlertEvent> {
        let mut alerts = self.inner.lock().alerts.clone();
        alerts.reverse();
        alerts
    }
}

fn number_rules(rules: &mut [AlertRule]) {
    for (idx, rule) in rules.iter_mut().enumerate() {
        if rule.id == 0 {
            rule.id = idx as u64 + 1;
        }
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn upsert_discovered(&self, mac: MacAddress, host: &DiscoveredHost) -> Result<Upserted> {
        let mut inner = self.inner.lock();

        if let Some(device) = inner.devices.values_mut().find(|d| d.mac == mac) {
            device.ip = Some(host.ip);
            if host.hostname.is_some() {
                device.hostname = host.hostname.clone();
            }
            device.last_seen = Some(host.seen_at);
            device.is_local |= host.is_local;
            return Ok(Upserted {
                device: device.clone(),
                created: false,
            });
        }

        let id = inner.allocate_device_id();
        let device = Device {
            id,
            mac,
            ip: Some(host.ip),
            hostname: host.hostname.clone(),
            nickname: None,
            group: None,
            is_favorite: false,
            is_manual: false,
            is_local: host.is_local,
            last_seen: Some(host.seen_at),
            created_at: Utc::now(),
        };
        inner.devices.insert(id, device.clone());
        Ok(Upserted {
            device,
            created: true,
        })
    }

    async fn device(&self, id: DeviceId) -> Result<Option<Device>> {
        Ok(self.inner.lock().devices.get(&id).cloned())
    }

    async fn device_by_mac(&self, mac: MacAddress) -> Result<Option<Device>> {
        Ok(self
            .inner
            .lock()
            .devices
            .values()
            .find(|d| d.mac == mac)
            .cloned())
    }

    async fn devices(&self) -> Result<Vec<Device>> {
        Ok(self.inner.lock().devices.values().cloned().collect())
    }

    async fn mark_seen(&self, id: DeviceId, at: DateTime<Utc>) -> Result<()> {
        let mut inner = self.inner.lock();
        let device = inner
            .devices
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Device {} not found", id))?;
        device.last_seen = Some(at);
        Ok(())
    }

    async fn latest_status(&self, id: DeviceId) -> Result<Option<DeviceStatus>> {
        Ok(self
            .inner
            .lock()
            .status_history
            .iter()
            .filter(|e| e.device_id == id)
            .max_by_key(|e| e.timestamp)
            .map(|e| e.status))
    }

    async fn append_status(&self, event: StatusEvent) -> Result<()> {
        self.inner.lock().status_history.push(event);
        Ok(())
    }

    async fn append_status_if_changed(
        &self,
        id: DeviceId,
        status: DeviceStatus,
        at: DateTime<Utc>,
    ) -> Result<StatusChange> {
        let mut inner = self.inner.lock();
        let previous = inner
            .status_history
            .iter()
            .filter(|e| e.device_id == id)
            .max_by_key(|e| e.timestamp)
            .map(|e| e.status);
        if previous == Some(status) {
            return Ok(StatusChange::Unchanged);
        }
        inner.status_history.push(StatusEvent {
            device_id: id,
            status,
            timestamp: at,
        });
        Ok(StatusChange::Recorded { previous })
    }

    async fn status_events_since(
        &self,
        id: DeviceId,
        since: DateTime<Utc>,
    ) -> Result<Vec<StatusEvent>> {
        let mut events: Vec<_> = self
            .inner
            .lock()
            .status_history
            .iter()
            .filter(|e| e.device_id == id && e.timestamp >= since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn prune_status_history(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock();
        let count = inner.status_history.len();
        inner.status_history.retain(|e| e.timestamp >= before);
        Ok(count - inner.status_history.len())
    }

    async fn port_findings(&self, id: DeviceId) -> Result<Option<Vec<PortFinding>>> {
        Ok(self.inner.lock().port_findings.get(&id).cloned())
    }

    async fn replace_port_findings(&self, id: DeviceId, findings: Vec<PortFinding>) -> Result<()> {
        self.inner.lock().port_findings.insert(id, findings);
        Ok(())
    }

    async fn append_traffic(&self, samples: Vec<TrafficSample>) -> Result<()> {
        self.inner.lock().traffic.extend(samples);
        Ok(())
    }

    async fn traffic_since(&self, since: DateTime<Utc>) -> Result<Vec<TrafficSample>> {
        Ok(self
            .inner
            .lock()
            .traffic
            .iter()
            .filter(|t| t.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn prune_traffic(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.lock();
        let count = inner.traffic.len();
        inner.traffic.retain(|t| t.timestamp >= before);
        Ok(count - inner.traffic.len())
    }

    async fn append_alert(&self, alert: NewAlert) -> Result<AlertEvent> {
        let mut inner = self.inner.lock();
        inner.next_alert_id += 1;
        let event = AlertEvent {
            id: inner.next_alert_id,
            device_id: alert.device_id,
            kind: alert.kind,
            severity: alert.severity,
            message: alert.message,
            metadata: alert.metadata,
            is_read: false,
            is_notified: false,
            created_at: Utc::now(),
        };
        inner.alerts.push(event.clone());
        Ok(event)
    }

    async fn mark_alert_notified(&self, alert_id: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let alert = inner
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id)
            .ok_or_else(|| anyhow!("Alert {} not found", alert_id))?;
        alert.is_notified = true;
        Ok(())
    }

    async fn enabled_alert_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self
            .inner
            .lock()
            .settings
            .alert_rules
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn settings(&self) -> Result<Settings> {
        Ok(self.inner.lock().settings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn host(ip: [u8; 4], hostname: Option<&str>) -> DiscoveredHost {
        DiscoveredHost {
            ip: Ipv4Addr::from(ip),
            mac: None,
            hostname: hostname.map(String::from),
            seen_at: Utc::now(),
            is_local: false,
        }
    }

    fn mac(s: &str) -> MacAddress {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_mac() {
        let store = MemoryStore::new(Settings::default());
        let first = store
            .upsert_discovered(mac("00:11:22:33:44:55"), &host([10, 0, 0, 5], Some("tv")))
            .await
            .unwrap();
        assert!(first.created);
        assert!(!first.device.is_manual);

        let second = store
            .upsert_discovered(mac("00-11-22-33-44-55"), &host([10, 0, 0, 9], None))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.device.id, first.device.id);
        assert_eq!(second.device.ip, Some(Ipv4Addr::new(10, 0, 0, 9)));
        assert_eq!(second.device.hostname.as_deref(), Some("tv"));
        assert_eq!(store.devices().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_events_skip_repeats() {
        let store = MemoryStore::new(Settings::default());
        let now = Utc::now();
        assert_eq!(
            store.append_status_if_changed(1, DeviceStatus::Online, now).await.unwrap(),
            StatusChange::Recorded { previous: None }
        );
        assert_eq!(
            store.append_status_if_changed(1, DeviceStatus::Online, now).await.unwrap(),
            StatusChange::Unchanged
        );
        assert_eq!(
            store.append_status_if_changed(1, DeviceStatus::Offline, now).await.unwrap(),
            StatusChange::Recorded {
                previous: Some(DeviceStatus::Online)
            }
        );
        assert_eq!(store.status_history(1).len(), 2);
        assert_eq!(store.latest_status(1).await.unwrap(), Some(DeviceStatus::Offline));
    }

    #[tokio::test]
    async fn prune_drops_only_old_events() {
        let store = MemoryStore::new(Settings::default());
        let now = Utc::now();
        for (status, age) in [(DeviceStatus::Online, 40), (DeviceStatus::Offline, 2)] {
            store
                .append_status(StatusEvent {
                    device_id: 1,
                    status,
                    timestamp: now - Duration::days(age),
                })
                .await
                .unwrap();
        }
        let removed = store
            .prune_status_history(now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.status_history(1).len(), 1);
    }

    #[tokio::test]
    async fn snapshot_round_trip_keeps_id_sequence() {
        let store = MemoryStore::new(Settings::default());
        store
            .upsert_discovered(mac("AA:AA:AA:AA:AA:01"), &host([10, 0, 0, 1], None))
            .await
            .unwrap();
        store
            .add_manual_device(mac("AA:AA:AA:AA:AA:02"), None, Some("printer".into()))
            .unwrap();

        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let restored =
            MemoryStore::from_snapshot(Settings::default(), serde_json::from_str(&json).unwrap());
        let added = restored
            .upsert_discovered(mac("AA:AA:AA:AA:AA:03"), &host([10, 0, 0, 3], None))
            .await
            .unwrap();
        assert_eq!(added.device.id, 3);
        assert_eq!(restored.devices().await.unwrap().len(), 3);
    }

    #[test]
    fn manual_devices_are_unique_by_mac() {
        let store = MemoryStore::new(Settings::default());
        store
            .add_manual_device(mac("AA:AA:AA:AA:AA:02"), None, None)
            .unwrap();
        assert!(
            store
                .add_manual_device(mac("aa:aa:aa:aa:aa:02"), None, None)
                .is_err()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_status_writes_record_one_transition() {
        let store = std::sync::Arc::new(MemoryStore::new(Settings::default()));
        let now = Utc::now();
        store
            .append_status_if_changed(1, DeviceStatus::Offline, now)
            .await
            .unwrap();

        let writers: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append_status_if_changed(1, DeviceStatus::Online, Utc::now())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut recorded = Vec::new();
        for writer in writers {
            let change = writer.await.unwrap();
            if change.is_recorded() {
                recorded.push(change);
            }
        }
        assert_eq!(
            recorded,
            vec![StatusChange::Recorded {
                previous: Some(DeviceStatus::Offline)
            }]
        );
        assert_eq!(store.status_history(1).len(), 2);
    }

    #[tokio::test]
    async fn edits_touch_only_named_fields() {
        let store = MemoryStore::new(Settings::default());
        let device = store
            .add_manual_device(mac("AA:AA:AA:AA:AA:05"), None, Some("old".into()))
            .unwrap();

        let edit = DeviceEdit {
            group: Some(Some("media".into())),
            is_favorite: Some(true),
            ..DeviceEdit::default()
        };
        let updated = store.update_device(device.id, &edit).unwrap();
        assert_eq!(updated.nickname.as_deref(), Some("old"));
        assert_eq!(updated.group.as_deref(), Some("media"));
        assert!(updated.is_favorite);
        assert_eq!(updated.mac, device.mac);

        let clear = DeviceEdit {
            nickname: Some(None),
            ..DeviceEdit::default()
        };
        assert_eq!(store.update_device(device.id, &clear).unwrap().nickname, None);
        assert!(store.update_device(99, &clear).is_err());
    }

    #[tokio::test]
    async fn removing_a_device_drops_its_history() {
        let store = MemoryStore::new(Settings::default());
        let device = store
            .add_manual_device(mac("AA:AA:AA:AA:AA:06"), Some(Ipv4Addr::new(10, 0, 0, 6)), None)
            .unwrap();
        let now = Utc::now();
        store
            .append_status_if_changed(device.id, DeviceStatus::Online, now)
            .await
            .unwrap();
        store.replace_port_findings(device.id, Vec::new()).await.unwrap();
        store
            .append_traffic(vec![TrafficSample {
                device_id: device.id,
                timestamp: now,
                bytes_sent: 10,
                bytes_received: 20,
                packets_sent: 1,
                packets_received: 2,
                active_connections: 1,
            }])
            .await
            .unwrap();

        store.remove_device(device.id).unwrap();
        assert!(store.device(device.id).await.unwrap().is_none());
        assert!(store.status_history(device.id).is_empty());
        assert!(store.port_findings(device.id).await.unwrap().is_none());
        assert!(store.traffic_since(now - Duration::days(1)).await.unwrap().is_empty());
        assert!(store.remove_device(device.id).is_err());
    }

    #[tokio::test]
    async fn only_enabled_rules_are_returned() {
        let mut settings = Settings::default();
        settings.alert_rules = serde_json::from_value(serde_json::json!([
            { "event": "new_device", "enabled": true },
            { "event": "port_change", "enabled": false },
        ]))
        .unwrap();
        let store = MemoryStore::new(settings);
        let rules = store.enabled_alert_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, 1);
    }
}
