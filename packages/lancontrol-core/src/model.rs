//! Records exchanged between the engine and the device store.

use crate::mac::MacAddress;
use crate::scanner::oui;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Store-assigned device identifier.
pub type DeviceId = u64;

/// A device with no successful probe for this long is offline.
pub const LIVENESS_WINDOW_SECS: i64 = 600;

/// Transient result of probing one address during a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredHost {
    pub ip: Ipv4Addr,
    pub mac: Option<MacAddress>,
    pub hostname: Option<String>,
    pub seen_at: DateTime<Utc>,
    /// The machine running the sweep.
    #[serde(default)]
    pub is_local: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Unknown,
    Online,
    Offline,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Unknown => write!(f, "unknown"),
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Unique key; never changes once assigned.
    pub mac: MacAddress,
    pub ip: Option<Ipv4Addr>,
    pub hostname: Option<String>,
    pub nickname: Option<String>,
    pub group: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default)]
    pub is_manual: bool,
    #[serde(default)]
    pub is_local: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Device {
    /// Status derived from `last_seen` against the liveness window.
    pub fn status_at(&self, now: DateTime<Utc>) -> DeviceStatus {
        match self.last_seen {
            None => DeviceStatus::Unknown,
            Some(seen) if now - seen < Duration::seconds(LIVENESS_WINDOW_SECS) => {
                DeviceStatus::Online
            }
            Some(_) => DeviceStatus::Offline,
        }
    }

    pub fn status(&self) -> DeviceStatus {
        self.status_at(Utc::now())
    }

    /// Nickname, then hostname, then hardware address.
    pub fn display_name(&self) -> String {
        self.nickname
            .clone()
            .or_else(|| self.hostname.clone())
            .unwrap_or_else(|| self.mac.to_string())
    }

    pub fn vendor(&self) -> String {
        oui::lookup_vendor(&self.mac).unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Append-only record of a status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub device_id: DeviceId,
    pub status: DeviceStatus,
    pub timestamp: DateTime<Utc>,
}

/// Connection-tracking counters attributed to one device at one moment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSample {
    pub device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub active_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
}

/// One open port found on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortFinding {
    pub port: u16,
    pub protocol: Protocol,
    pub service: String,
    pub state: PortState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    StatusChange,
    NewDevice,
    PortChange,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::StatusChange => "status_change",
            AlertKind::NewDevice => "new_device",
            AlertKind::PortChange => "port_change",
        }
    }

    /// "Status Change", "New Device", "Port Change".
    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::StatusChange => "Status Change",
            AlertKind::NewDevice => "New Device",
            AlertKind::PortChange => "Port Change",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert before the store assigns it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub device_id: DeviceId,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: u64,
    pub device_id: DeviceId,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_notified: bool,
    pub created_at: DateTime<Utc>,
}

/// Event a rule subscribes to. Online and offline rules both fire on any
/// status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEvent {
    DeviceOffline,
    DeviceOnline,
    NewDevice,
    PortChange,
}

impl RuleEvent {
    pub fn alert_kind(&self) -> AlertKind {
        match self {
            RuleEvent::DeviceOffline | RuleEvent::DeviceOnline => AlertKind::StatusChange,
            RuleEvent::NewDevice => AlertKind::NewDevice,
            RuleEvent::PortChange => AlertKind::PortChange,
        }
    }
}

/// Which devices a rule applies to. Serialized as `"all"`, `"favorites"` or a
/// group name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceFilter {
    #[default]
    All,
    Favorites,
    Group(String),
}

impl DeviceFilter {
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            DeviceFilter::All => true,
            DeviceFilter::Favorites => device.is_favorite,
            DeviceFilter::Group(name) => device.group.as_deref() == Some(name.as_str()),
        }
    }
}

impl From<String> for DeviceFilter {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" | "all" => DeviceFilter::All,
            "favorites" => DeviceFilter::Favorites,
            _ => DeviceFilter::Group(value),
        }
    }
}

impl From<DeviceFilter> for String {
    fn from(filter: DeviceFilter) -> Self {
        match filter {
            DeviceFilter::All => "all".to_string(),
            DeviceFilter::Favorites => "favorites".to_string(),
            DeviceFilter::Group(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub event: RuleEvent,
    #[serde(default)]
    pub device_filter: DeviceFilter,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub notify_email: bool,
    #[serde(default)]
    pub notify_webhook: bool,
    pub webhook_url: Option<String>,
}

impl AlertRule {
    pub fn applies_to(&self, kind: AlertKind, device: &Device) -> bool {
        self.enabled && self.event.alert_kind() == kind && self.device_filter.matches(device)
    }

    /// Webhook target, when the channel is switched on and has a URL.
    pub fn webhook_target(&self) -> Option<&str> {
        self.webhook_url
            .as_deref()
            .filter(|url| self.notify_webhook && !url.trim().is_empty())
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device {
            id: 7,
            mac: "00:11:22:33:44:55".parse().unwrap(),
            ip: Some(Ipv4Addr::new(192, 168, 1, 20)),
            hostname: Some("nas".to_string()),
            nickname: None,
            group: Some("lab".to_string()),
            is_favorite: false,
            is_manual: false,
            is_local: false,
            last_seen: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_follows_liveness_window() {
        let now = Utc::now();
        let mut d = device();
        assert_eq!(d.status_at(now), DeviceStatus::Unknown);

        d.last_seen = Some(now - Duration::seconds(599));
        assert_eq!(d.status_at(now), DeviceStatus::Online);

        d.last_seen = Some(now - Duration::seconds(600));
        assert_eq!(d.status_at(now), DeviceStatus::Offline);
    }

    #[test]
    fn display_name_prefers_nickname() {
        let mut d = device();
        assert_eq!(d.display_name(), "nas");
        d.nickname = Some("Backup box".to_string());
        assert_eq!(d.display_name(), "Backup box");
        d.nickname = None;
        d.hostname = None;
        assert_eq!(d.display_name(), "00:11:22:33:44:55");
    }

    #[test]
    fn rule_events_map_to_alert_kinds() {
        assert_eq!(RuleEvent::DeviceOffline.alert_kind(), AlertKind::StatusChange);
        assert_eq!(RuleEvent::DeviceOnline.alert_kind(), AlertKind::StatusChange);
        assert_eq!(RuleEvent::NewDevice.alert_kind(), AlertKind::NewDevice);
        assert_eq!(RuleEvent::PortChange.alert_kind(), AlertKind::PortChange);
    }

    #[test]
    fn device_filters() {
        let mut d = device();
        assert!(DeviceFilter::All.matches(&d));
        assert!(!DeviceFilter::Favorites.matches(&d));
        d.is_favorite = true;
        assert!(DeviceFilter::Favorites.matches(&d));
        assert!(DeviceFilter::Group("lab".into()).matches(&d));
        assert!(!DeviceFilter::Group("office".into()).matches(&d));
    }

    #[test]
    fn device_filter_string_form() {
        assert_eq!(DeviceFilter::from("all".to_string()), DeviceFilter::All);
        assert_eq!(DeviceFilter::from(String::new()), DeviceFilter::All);
        assert_eq!(DeviceFilter::from("favorites".to_string()), DeviceFilter::Favorites);
        assert_eq!(
            DeviceFilter::from("iot".to_string()),
            DeviceFilter::Group("iot".to_string())
        );
        let json = serde_json::to_string(&DeviceFilter::Group("iot".into())).unwrap();
        assert_eq!(json, "\"iot\"");
    }

    #[test]
    fn disabled_rules_never_apply() {
        let d = device();
        let mut rule = AlertRule {
            id: 1,
            name: "offline".into(),
            event: RuleEvent::DeviceOffline,
            device_filter: DeviceFilter::All,
            enabled: true,
            notify_email: true,
            notify_webhook: false,
            webhook_url: None,
        };
        assert!(rule.applies_to(AlertKind::StatusChange, &d));
        assert!(!rule.applies_to(AlertKind::PortChange, &d));
        rule.enabled = false;
        assert!(!rule.applies_to(AlertKind::StatusChange, &d));
    }

    #[test]
    fn webhook_target_requires_flag_and_url() {
        let mut rule = AlertRule {
            id: 1,
            name: String::new(),
            event: RuleEvent::NewDevice,
            device_filter: DeviceFilter::All,
            enabled: true,
            notify_email: false,
            notify_webhook: true,
            webhook_url: Some("  ".into()),
        };
        assert_eq!(rule.webhook_target(), None);
        rule.webhook_url = Some("http://hooks.local/x".into());
        assert_eq!(rule.webhook_target(), Some("http://hooks.local/x"));
        rule.notify_webhook = false;
        assert_eq!(rule.webhook_target(), None);
    }
}
