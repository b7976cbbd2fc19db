//! LANControl Core Library
//!
//! This crate provides the engine behind the LANControl agent:
//! - Network sweeps (ping, neighbor table, reverse DNS / mDNS / SSDP / NetBIOS names)
//! - Liveness polling of known devices
//! - TCP port probing and device-type classification
//! - Wake-on-LAN
//! - Rule-based alerts delivered by e-mail and webhook
//! - Uptime figures, a gateway topology and per-device traffic counters
//!
//! Persistence is behind the [`store::DeviceStore`] trait; [`store::MemoryStore`]
//! is a complete in-process implementation with JSON snapshots.
//!
//! # Example
//!
//! ```no_run
//! use lancontrol_core::alerts::{AlertEngine, Dispatcher};
//! use lancontrol_core::scanner::{
//!     IdentityResolver, LivenessPoller, NetworkSweeper, ScanState, SystemPing,
//! };
//! use lancontrol_core::{Monitor, MemoryStore, Settings};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(MemoryStore::new(Settings::default()));
//!     let probe = Arc::new(SystemPing);
//!
//!     let sweeper = NetworkSweeper::new(probe.clone(), IdentityResolver::default(), ScanState::new());
//!     let poller = LivenessPoller::new(probe);
//!     let alerts = AlertEngine::new(store.clone(), Arc::new(Dispatcher::new()?));
//!     let monitor = Monitor::new(store, sweeper, poller, alerts);
//!
//!     let summary = monitor.run_sweep("192.168.1.0/24", None).await?;
//!     println!("Found {} devices ({} new)", summary.discovered, summary.created);
//!
//!     Ok(())
//! }
//! ```

pub mod alerts;
pub mod config;
pub mod error;
pub mod mac;
pub mod model;
pub mod monitor;
pub mod ports;
pub mod scanner;
pub mod store;
pub mod topology;
pub mod traffic;
pub mod uptime;
pub mod wol;

// Re-export commonly used types
pub use config::{ConfigSource, LoadedSettings, MailSettings, Settings};
pub use error::{Error, Result};
pub use mac::{MacAddress, normalize_hardware_address};
pub use model::{
    AlertEvent, AlertKind, AlertRule, Device, DeviceFilter, DeviceId, DeviceStatus,
    DiscoveredHost, PortFinding, RuleEvent, Severity, StatusEvent, TrafficSample,
};
pub use monitor::{
    CleanupSummary, DeviceCheck, Monitor, MonitorOptions, PollSummary, PortScanReport,
    SweepSummary, TrafficReport, TrafficTotal,
};
pub use ports::{DeviceType, ScanPreset};
pub use store::{DeviceEdit, DeviceStore, MemoryStore, StatusChange, StoreSnapshot};
pub use topology::Topology;
pub use traffic::{ConnectionTracker, SystemConntrack};
pub use wol::{BulkWakeResult, WakeOnLan, WakeResult};
