//! Alert recording, rule evaluation and notification dispatch.
//!
//! [`AlertEngine::raise`] writes the alert to the store and then runs every
//! enabled rule against it. Each matching rule fans out to its channels
//! independently; a failing channel is logged and never stops the others or
//! reaches the caller.

pub mod email;
pub mod webhook;

use crate::config::MailSettings;
use crate::error::{Error, Result};
use crate::model::{AlertEvent, AlertKind, Device, DeviceStatus, NewAlert, PortFinding, Severity};
use crate::store::DeviceStore;
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use webhook::WebhookSender;

/// Failure of a single notification channel.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),

    #[error("mail settings are incomplete")]
    Incomplete,

    /// The HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

/// Outbound notification channels.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send_email(
        &self,
        mail: &MailSettings,
        alert: &AlertEvent,
        device: &Device,
    ) -> Result<(), NotifyError>;

    async fn send_webhook(
        &self,
        url: &str,
        alert: &AlertEvent,
        device: &Device,
    ) -> Result<(), NotifyError>;
}

/// SMTP and HTTP delivery.
pub struct Dispatcher {
    webhook: WebhookSender,
}

impl Dispatcher {
    pub fn new() -> Result<Self, NotifyError> {
        Ok(Self {
            webhook: WebhookSender::new()?,
        })
    }
}

#[async_trait]
impl NotificationSink for Dispatcher {
    async fn send_email(
        &self,
        mail: &MailSettings,
        alert: &AlertEvent,
        device: &Device,
    ) -> Result<(), NotifyError> {
        email::send_alert_email(mail, alert, device).await
    }

    async fn send_webhook(
        &self,
        url: &str,
        alert: &AlertEvent,
        device: &Device,
    ) -> Result<(), NotifyError> {
        self.webhook.send(url, alert, device).await
    }
}

#[derive(Clone)]
pub struct AlertEngine {
    store: Arc<dyn DeviceStore>,
    sink: Arc<dyn NotificationSink>,
}

impl AlertEngine {
    pub fn new(store: Arc<dyn DeviceStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, sink }
    }

    /// Persist the alert, then notify every matching rule's channels.
    pub async fn raise(&self, alert: NewAlert) -> Result<AlertEvent> {
        let device = self
            .store
            .device(alert.device_id)
            .await?
            .ok_or(Error::DeviceNotFound(alert.device_id))?;

        let event = self.store.append_alert(alert).await?;
        tracing::info!("[{}] {}", event.severity, event.message);

        self.dispatch(&event, &device).await?;
        self.store.mark_alert_notified(event.id).await?;

        Ok(AlertEvent {
            is_notified: true,
            ..event
        })
    }

    async fn dispatch(&self, alert: &AlertEvent, device: &Device) -> Result<()> {
        let rules = self.store.enabled_alert_rules().await?;
        let settings = self.store.settings().await?;

        for rule in rules.iter().filter(|r| r.applies_to(alert.kind, device)) {
            if rule.notify_email {
                if !settings.mail.is_complete() {
                    tracing::info!("Email settings not configured, skipping email notification");
                } else if let Err(e) = self.sink.send_email(&settings.mail, alert, device).await {
                    tracing::warn!("Email notification for alert {} failed: {}", alert.id, e);
                } else {
                    tracing::info!("Email notification sent for alert {}", alert.id);
                }
            }

            if let Some(url) = rule.webhook_target() {
                match self.sink.send_webhook(url, alert, device).await {
                    Ok(()) => tracing::info!("Webhook notification sent for alert {}", alert.id),
                    Err(e) => {
                        tracing::warn!("Webhook notification for alert {} failed: {}", alert.id, e)
                    }
                }
            }
        }

        Ok(())
    }

    /// Raise a status-change alert when `old` and `new` differ.
    pub async fn status_changed(
        &self,
        device: &Device,
        old: DeviceStatus,
        new: DeviceStatus,
    ) -> Result<Option<AlertEvent>> {
        match status_change_alert(device, old, new) {
            Some(alert) => self.raise(alert).await.map(Some),
            None => Ok(None),
        }
    }

    /// Raise a new-device alert unless the device was added by hand.
    pub async fn new_device(&self, device: &Device) -> Result<Option<AlertEvent>> {
        match new_device_alert(device) {
            Some(alert) => self.raise(alert).await.map(Some),
            None => Ok(None),
        }
    }

    /// Raise one alert for newly opened ports and one for newly closed ports.
    pub async fn port_changes(
        &self,
        device: &Device,
        old: &[PortFinding],
        new: &[PortFinding],
    ) -> Result<Vec<AlertEvent>> {
        let sensitive = self.store.settings().await?.sensitive_ports;
        let mut raised = Vec::new();
        for alert in port_change_alerts(device, old, new, &sensitive) {
            raised.push(self.raise(alert).await?);
        }
        Ok(raised)
    }
}

pub fn status_change_alert(
    device: &Device,
    old: DeviceStatus,
    new: DeviceStatus,
) -> Option<NewAlert> {
    if old == new {
        return None;
    }

    let severity = if new == DeviceStatus::Offline {
        Severity::Warning
    } else {
        Severity::Info
    };

    Some(NewAlert {
        device_id: device.id,
        kind: AlertKind::StatusChange,
        severity,
        message: format!(
            "Device '{}' changed from {} to {}",
            device.display_name(),
            old,
            new
        ),
        metadata: Some(json!({ "old_status": old, "new_status": new })),
    })
}

pub fn new_device_alert(device: &Device) -> Option<NewAlert> {
    if device.is_manual {
        return None;
    }

    let ip = device
        .ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "N/A".to_string());

    Some(NewAlert {
        device_id: device.id,
        kind: AlertKind::NewDevice,
        severity: Severity::Info,
        message: format!("New device discovered: '{}' ({})", device.display_name(), ip),
        metadata: Some(json!({ "vendor": device.vendor() })),
    })
}

/// Opened-port alert first, then closed-port alert; either may be absent.
pub fn port_change_alerts(
    device: &Device,
    old: &[PortFinding],
    new: &[PortFinding],
    sensitive_ports: &[u16],
) -> Vec<NewAlert> {
    let old: BTreeSet<u16> = old.iter().map(|f| f.port).collect();
    let new: BTreeSet<u16> = new.iter().map(|f| f.port).collect();
    let opened: Vec<u16> = new.difference(&old).copied().collect();
    let closed: Vec<u16> = old.difference(&new).copied().collect();

    let name = device.display_name();
    let mut alerts = Vec::new();

    if !opened.is_empty() {
        let severity = if opened.iter().any(|p| sensitive_ports.contains(p)) {
            Severity::Warning
        } else {
            Severity::Info
        };
        alerts.push(NewAlert {
            device_id: device.id,
            kind: AlertKind::PortChange,
            severity,
            message: format!("New ports opened on '{}': {}", name, join_ports(&opened)),
            metadata: Some(json!({ "opened_ports": opened })),
        });
    }

    if !closed.is_empty() {
        alerts.push(NewAlert {
            device_id: device.id,
            kind: AlertKind::PortChange,
            severity: Severity::Info,
            message: format!("Ports closed on '{}': {}", name, join_ports(&closed)),
            metadata: Some(json!({ "closed_ports": closed })),
        });
    }

    alerts
}

fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PortState, Protocol};
    use chrono::Utc;
    use std::net::Ipv4Addr;

    fn device() -> Device {
        Device {
            id: 4,
            mac: "00:11:32:AA:BB:CC".parse().unwrap(),
            ip: Some(Ipv4Addr::new(192, 168, 1, 40)),
            hostname: Some("diskstation".into()),
            nickname: None,
            group: None,
            is_favorite: false,
            is_manual: false,
            is_local: false,
            last_seen: None,
            created_at: Utc::now(),
        }
    }

    fn open(ports: &[u16]) -> Vec<PortFinding> {
        ports
            .iter()
            .map(|&port| PortFinding {
                port,
                protocol: Protocol::Tcp,
                service: crate::ports::service_name(port).to_string(),
                state: PortState::Open,
            })
            .collect()
    }

    #[test]
    fn status_change_message_and_severity() {
        let d = device();
        assert!(status_change_alert(&d, DeviceStatus::Online, DeviceStatus::Online).is_none());

        let alert = status_change_alert(&d, DeviceStatus::Online, DeviceStatus::Offline).unwrap();
        assert_eq!(alert.message, "Device 'diskstation' changed from online to offline");
        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(
            alert.metadata,
            Some(json!({ "old_status": "online", "new_status": "offline" }))
        );

        let back = status_change_alert(&d, DeviceStatus::Offline, DeviceStatus::Online).unwrap();
        assert_eq!(back.severity, Severity::Info);
    }

    #[test]
    fn new_device_skips_manual_entries() {
        let mut d = device();
        let alert = new_device_alert(&d).unwrap();
        assert_eq!(alert.message, "New device discovered: 'diskstation' (192.168.1.40)");
        assert_eq!(alert.kind, AlertKind::NewDevice);
        assert!(alert.metadata.unwrap()["vendor"].is_string());

        d.is_manual = true;
        assert!(new_device_alert(&d).is_none());
    }

    #[test]
    fn port_changes_split_opened_and_closed() {
        let d = device();
        let alerts = port_change_alerts(&d, &open(&[22, 80]), &open(&[80, 443, 23]), &[21, 23, 3389]);
        assert_eq!(alerts.len(), 2);

        assert_eq!(alerts[0].message, "New ports opened on 'diskstation': 23, 443");
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].metadata, Some(json!({ "opened_ports": [23, 443] })));

        assert_eq!(alerts[1].message, "Ports closed on 'diskstation': 22");
        assert_eq!(alerts[1].severity, Severity::Info);
    }

    #[test]
    fn sensitive_set_is_policy() {
        let d = device();
        let alerts = port_change_alerts(&d, &[], &open(&[3389]), &[]);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Info);
        assert!(port_change_alerts(&d, &open(&[80]), &open(&[80]), &[80]).is_empty());
    }
}
