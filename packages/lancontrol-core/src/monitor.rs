//! Reconciliation of probe results against the device store.
//!
//! The sweeper, poller and port prober only observe the network. [`Monitor`]
//! turns their observations into device records, status history and alerts,
//! and provides the job bodies the scheduler runs.

use crate::alerts::AlertEngine;
use crate::error::{Error, Result};
use crate::model::{Device, DeviceId, DeviceStatus, PortFinding, TrafficSample};
use crate::ports::{self, DeviceType, ScanPreset};
use crate::scanner::{
    LivenessPoller, NetworkSweeper, PollOutcome, ProgressCallback, ScanGuard, ScanStatus,
};
use crate::store::{DeviceStore, StatusChange};
use crate::topology::{self, Topology};
use crate::traffic::{self, ConnectionTracker, TrafficCounters};
use crate::uptime;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Raise alerts for the machine running the sweep.
    pub alert_on_local_host: bool,
    pub port_concurrency: usize,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            alert_on_local_host: false,
            port_concurrency: ports::DEFAULT_PORT_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub discovered: usize,
    pub created: usize,
    pub updated: usize,
    pub alerts_raised: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PollSummary {
    pub checked: usize,
    pub online: usize,
    pub offline: usize,
    /// Devices whose recorded status changed.
    pub changed: usize,
    pub alerts_raised: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortScanReport {
    pub device_id: DeviceId,
    pub ip: Ipv4Addr,
    pub findings: Vec<PortFinding>,
    pub device_type: DeviceType,
    /// False when this was the device's first probe.
    pub compared: bool,
    pub alerts_raised: usize,
}

/// Result of checking a single device on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCheck {
    pub device_id: DeviceId,
    pub online: bool,
    pub checked_at: DateTime<Utc>,
    pub message: String,
    /// The check recorded a new status.
    pub changed: bool,
    pub alert_raised: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficReport {
    /// Devices a sample was stored for.
    pub sampled: usize,
    /// Originating addresses that match no stored device.
    pub unmatched: usize,
}

/// Traffic totals for one device over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficTotal {
    pub device: Device,
    pub total_bytes: u64,
    pub total_packets: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupSummary {
    pub status_events: usize,
    pub traffic_samples: usize,
}

#[derive(Clone)]
pub struct Monitor {
    store: Arc<dyn DeviceStore>,
    sweeper: NetworkSweeper,
    poller: LivenessPoller,
    alerts: AlertEngine,
    options: MonitorOptions,
}

impl Monitor {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        sweeper: NetworkSweeper,
        poller: LivenessPoller,
        alerts: AlertEngine,
    ) -> Self {
        Self {
            store,
            sweeper,
            poller,
            alerts,
            options: MonitorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MonitorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.store
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn scan_state(&self) -> ScanStatus {
        self.sweeper.state().status()
    }

    fn alertable(&self, device: &Device) -> bool {
        !device.is_local || self.options.alert_on_local_host
    }

    /// Sweep `range` and reconcile the results. Fails immediately with
    /// [`Error::ScanInProgress`] if a sweep is already running.
    pub async fn run_sweep(
        &self,
        range: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<SweepSummary> {
        let guard = self.sweeper.state().try_begin()?;
        self.sweep_under(guard, range, on_progress).await
    }

    /// Claim the sweep slot now and run the sweep in the background.
    pub fn trigger_sweep(&self, range: &str) -> Result<JoinHandle<Result<SweepSummary>>> {
        let guard = self.sweeper.state().try_begin()?;
        let monitor = self.clone();
        let range = range.to_string();

        Ok(tokio::spawn(async move {
            let result = monitor.sweep_under(guard, &range, None).await;
            if let Err(ref e) = result {
                tracing::warn!("Background sweep of {} failed: {}", range, e);
            }
            result
        }))
    }

    async fn sweep_under(
        &self,
        guard: ScanGuard,
        range: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<SweepSummary> {
        let hosts = self
            .sweeper
            .sweep_with_guard(guard, range, on_progress)
            .await?;

        let mut summary = SweepSummary {
            discovered: hosts.len(),
            ..SweepSummary::default()
        };

        for host in &hosts {
            let Some(mac) = host.mac else {
                continue;
            };

            let upserted = self.store.upsert_discovered(mac, host).await?;
            let device = upserted.device;
            let change = self
                .store
                .append_status_if_changed(device.id, DeviceStatus::Online, host.seen_at)
                .await?;

            if upserted.created {
                summary.created += 1;
                tracing::debug!("New device {} at {}", device.mac, host.ip);
            } else {
                summary.updated += 1;
            }

            if !self.alertable(&device) {
                continue;
            }

            // Only the writer of a transition alerts on it; a poll running
            // alongside may already have recorded this one.
            let raised = if upserted.created {
                self.alerts.new_device(&device).await?
            } else if let Some(old) = change.transition_from() {
                self.alerts
                    .status_changed(&device, old, DeviceStatus::Online)
                    .await?
            } else {
                None
            };
            summary.alerts_raised += usize::from(raised.is_some());
        }

        tracing::info!(
            "Sweep reconciled: {} discovered, {} new, {} updated, {} alerts",
            summary.discovered,
            summary.created,
            summary.updated,
            summary.alerts_raised
        );
        Ok(summary)
    }

    /// Re-check every stored device and record status transitions.
    pub async fn run_poll(&self) -> Result<PollSummary> {
        let devices = self.store.devices().await?;
        let outcomes = self.poller.poll(&devices).await;
        let mut summary = PollSummary::default();

        for device in &devices {
            let Some(outcome) = outcomes.get(&device.id) else {
                continue;
            };
            summary.checked += 1;
            if outcome.online {
                summary.online += 1;
            } else {
                summary.offline += 1;
            }

            let (change, raised) = self.record_liveness(device, outcome).await?;
            summary.changed += usize::from(change.is_recorded());
            summary.alerts_raised += usize::from(raised);
        }

        tracing::info!(
            "Status poll: {} checked, {} online, {} offline, {} changed",
            summary.checked,
            summary.online,
            summary.offline,
            summary.changed
        );
        Ok(summary)
    }

    /// Store one liveness outcome. Returns the status write and whether an
    /// alert was raised for it.
    async fn record_liveness(
        &self,
        device: &Device,
        outcome: &PollOutcome,
    ) -> Result<(StatusChange, bool)> {
        let status = if outcome.online {
            self.store.mark_seen(device.id, outcome.checked_at).await?;
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        };

        let change = self
            .store
            .append_status_if_changed(device.id, status, outcome.checked_at)
            .await?;

        let mut raised = false;
        if let Some(old) = change.transition_from().filter(|_| self.alertable(device)) {
            raised = self
                .alerts
                .status_changed(device, old, status)
                .await?
                .is_some();
        }
        Ok((change, raised))
    }

    /// Re-check a single device now, recording and alerting like a poll.
    pub async fn check_device(&self, device_id: DeviceId) -> Result<DeviceCheck> {
        let device = self
            .store
            .device(device_id)
            .await?
            .ok_or(Error::DeviceNotFound(device_id))?;

        let outcome = self.poller.check(&device).await;
        let (change, alert_raised) = if device.ip.is_some() {
            self.record_liveness(&device, &outcome).await?
        } else {
            (StatusChange::Unchanged, false)
        };

        let message = match outcome.message {
            Some(ref reason) => reason.clone(),
            None if outcome.online => "Device is reachable".to_string(),
            None => "Device is not reachable".to_string(),
        };

        Ok(DeviceCheck {
            device_id,
            online: outcome.online,
            checked_at: outcome.checked_at,
            message,
            changed: change.is_recorded(),
            alert_raised,
        })
    }

    /// Probe one device's ports, store the findings and alert on differences
    /// from the previous probe.
    pub async fn run_port_scan(
        &self,
        device_id: DeviceId,
        preset: ScanPreset,
    ) -> Result<PortScanReport> {
        let device = self
            .store
            .device(device_id)
            .await?
            .ok_or(Error::DeviceNotFound(device_id))?;
        let ip = device
            .ip
            .ok_or_else(|| Error::InvalidAddress(format!("device {} has no IP address", device_id)))?;

        let findings = ports::probe_ports(
            ip,
            &preset.ports(),
            preset.timeout(),
            self.options.port_concurrency,
        )
        .await;

        let previous = self.store.port_findings(device_id).await?;
        self.store
            .replace_port_findings(device_id, findings.clone())
            .await?;

        let open: Vec<u16> = findings.iter().map(|f| f.port).collect();
        let device_type = ports::classify_device_type(&open);

        let mut alerts_raised = 0;
        if let Some(ref previous) = previous {
            if self.alertable(&device) {
                alerts_raised = self
                    .alerts
                    .port_changes(&device, previous, &findings)
                    .await?
                    .len();
            }
        } else {
            tracing::debug!("First port scan of {}, recording baseline", ip);
        }

        tracing::info!(
            "Port scan of {}: {} open, looks like {}",
            ip,
            findings.len(),
            device_type
        );

        Ok(PortScanReport {
            device_id,
            ip,
            findings,
            device_type,
            compared: previous.is_some(),
            alerts_raised,
        })
    }

    /// Delete status history and traffic samples older than the retention
    /// window.
    pub async fn cleanup_history(&self) -> Result<CleanupSummary> {
        let days = self.store.settings().await?.history_retention_days;
        let before = Utc::now() - Duration::days(i64::from(days));
        let summary = CleanupSummary {
            status_events: self.store.prune_status_history(before).await?,
            traffic_samples: self.store.prune_traffic(before).await?,
        };
        tracing::info!(
            "Removed {} status events and {} traffic samples older than {} days",
            summary.status_events,
            summary.traffic_samples,
            days
        );
        Ok(summary)
    }

    /// Percentage of the last `days` days the device was recorded online,
    /// or `None` if nothing was recorded in that window.
    pub async fn uptime(&self, device_id: DeviceId, days: u32) -> Result<Option<f64>> {
        let now = Utc::now();
        let since = now - Duration::days(i64::from(days));
        let events = self.store.status_events_since(device_id, since).await?;
        Ok(uptime::uptime_percentage(&events, since, now))
    }

    /// Gateway-centred graph of every stored device.
    pub async fn topology(&self, gateway_ip: Option<Ipv4Addr>) -> Result<Topology> {
        let devices = self.store.devices().await?;
        let mut device_types = HashMap::new();
        for device in &devices {
            if let Some(findings) = self.store.port_findings(device.id).await? {
                let open: Vec<u16> = findings.iter().map(|f| f.port).collect();
                device_types.insert(device.id, ports::classify_device_type(&open));
            }
        }
        Ok(topology::build_topology(
            &devices,
            gateway_ip,
            &device_types,
            Utc::now(),
        ))
    }

    /// Read the connection-tracking table once and store a sample for every
    /// device that originated traffic.
    pub async fn collect_traffic(
        &self,
        tracker: Arc<dyn ConnectionTracker>,
    ) -> Result<TrafficReport> {
        let table = tokio::task::spawn_blocking(move || tracker.snapshot())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        let totals = traffic::parse_conntrack(&table);

        let by_ip: HashMap<Ipv4Addr, DeviceId> = self
            .store
            .devices()
            .await?
            .into_iter()
            .filter_map(|d| d.ip.map(|ip| (ip, d.id)))
            .collect();

        let now = Utc::now();
        let mut report = TrafficReport::default();
        let mut samples = Vec::new();
        for (ip, counters) in totals {
            match by_ip.get(&ip) {
                Some(&device_id) => samples.push(sample(device_id, now, counters)),
                None => report.unmatched += 1,
            }
        }
        report.sampled = samples.len();
        self.store.append_traffic(samples).await?;

        tracing::info!(
            "Collected traffic for {} devices ({} unknown addresses)",
            report.sampled,
            report.unmatched
        );
        Ok(report)
    }

    /// Devices with the most traffic in the last `hours` hours, largest first.
    pub async fn top_talkers(&self, hours: u32, limit: usize) -> Result<Vec<TrafficTotal>> {
        let since = Utc::now() - Duration::hours(i64::from(hours));
        let mut sums: HashMap<DeviceId, (u64, u64)> = HashMap::new();
        for s in self.store.traffic_since(since).await? {
            let entry = sums.entry(s.device_id).or_default();
            entry.0 += s.bytes_sent + s.bytes_received;
            entry.1 += s.packets_sent + s.packets_received;
        }

        let mut totals = Vec::with_capacity(sums.len());
        for (device_id, (total_bytes, total_packets)) in sums {
            if let Some(device) = self.store.device(device_id).await? {
                totals.push(TrafficTotal {
                    device,
                    total_bytes,
                    total_packets,
                });
            }
        }
        totals.sort_by(|a, b| {
            b.total_bytes
                .cmp(&a.total_bytes)
                .then(a.device.id.cmp(&b.device.id))
        });
        totals.truncate(limit);
        Ok(totals)
    }
}

fn sample(device_id: DeviceId, timestamp: DateTime<Utc>, c: TrafficCounters) -> TrafficSample {
    TrafficSample {
        device_id,
        timestamp,
        bytes_sent: c.bytes_sent,
        bytes_received: c.bytes_received,
        packets_sent: c.packets_sent,
        packets_received: c.packets_received,
        active_connections: c.connections,
    }
}
