//! LANControl CLI - LAN device discovery and monitoring agent
//!
//! This binary can:
//! - Sweep the local network and record the devices it finds
//! - Probe a device's TCP ports and guess what it is
//! - Send Wake-on-LAN packets
//! - Keep a hand-edited inventory with nicknames, groups and favorites
//! - Report uptime, the gateway topology and per-device traffic
//! - Run as a daemon that sweeps, polls and alerts on a schedule

mod daemon;
mod devices;
mod persistence;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use devices::DeviceCommand;
use lancontrol_core::alerts::{AlertEngine, Dispatcher};
use lancontrol_core::config::{self, Settings};
use lancontrol_core::ports::{self, BANNER_TIMEOUT};
use lancontrol_core::scanner::{
    IdentityResolver, LivenessPoller, NetworkInspector, NetworkSweeper, ReachabilityProbe,
    ScanProgress, ScanState, SystemNetworkInspector, SystemPing, privileges,
};
use lancontrol_core::{
    BulkWakeResult, Device, DeviceStatus, DeviceStore, MemoryStore, Monitor, ScanPreset,
    SystemConntrack, WakeOnLan,
};
use persistence::{StateFile, StateLock};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Parser)]
#[command(name = "lancontrol")]
#[command(author = "LANControl Team")]
#[command(version)]
#[command(about = "LAN device discovery, monitoring and Wake-on-LAN agent")]
#[command(long_about = "
LANControl keeps an inventory of the devices on your local network,
tracks when they come and go, watches their open ports and can wake
them with Wake-on-LAN packets.

Quick start:
  1. Find devices:     lancontrol scan --range 192.168.1.0/24
  2. List them:        lancontrol devices
  3. Start daemon:     lancontrol daemon

Settings live in the file shown by: lancontrol config
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sweep an address range and record the devices found
    Scan {
        /// CIDR range to sweep (defaults to scan_range from the config)
        #[arg(short, long)]
        range: Option<String>,
    },

    /// Show inventory and network summary
    Status,

    /// List and edit known devices
    Devices {
        #[command(subcommand)]
        action: Option<DeviceCommand>,
    },

    /// Check whether one known device is reachable right now
    Check {
        /// Device id, IP address or MAC address
        target: String,
    },

    /// Probe a device's TCP ports
    Ports {
        /// Device id, IP address or MAC address; unknown IPs are probed
        /// without recording anything
        target: String,

        /// Probe the full service table instead of the quick list
        #[arg(long)]
        full: bool,

        /// Read the service banner of each open port
        #[arg(long)]
        banners: bool,
    },

    /// Send Wake-on-LAN packets
    Wake {
        /// One or more MAC addresses
        #[arg(required = true)]
        macs: Vec<String>,
    },

    /// Show devices and their links to the default gateway
    Topology,

    /// Per-device traffic from the connection-tracking table
    Traffic {
        #[command(subcommand)]
        action: TrafficCommand,
    },

    /// Show recent alerts
    Alerts {
        /// Maximum number of alerts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Run the scheduled sweep, poll and cleanup jobs
    Daemon {
        /// Run in foreground (don't daemonize)
        #[arg(long)]
        foreground: bool,
    },

    /// Show configuration paths, settings and capabilities
    Config,
}

#[derive(Subcommand)]
pub enum TrafficCommand {
    /// Read the connection-tracking table once and record a sample
    Collect,

    /// Show the devices with the most traffic
    Top {
        /// Look-back window in hours
        #[arg(long, default_value = "24")]
        hours: u32,

        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("lancontrol={},lancontrol_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Scan { ref range } => cmd_scan(&cli, range.clone()).await,
        Commands::Status => cmd_status(&cli).await,
        Commands::Devices { ref action } => devices::run(&cli, action.as_ref()).await,
        Commands::Check { ref target } => cmd_check(&cli, target).await,
        Commands::Ports {
            ref target,
            full,
            banners,
        } => cmd_ports(&cli, target, full, banners).await,
        Commands::Wake { ref macs } => cmd_wake(&cli, macs).await,
        Commands::Topology => cmd_topology(&cli).await,
        Commands::Traffic { ref action } => cmd_traffic(&cli, action).await,
        Commands::Alerts { limit } => cmd_alerts(&cli, limit),
        Commands::Daemon { foreground } => daemon::run_daemon(foreground).await,
        Commands::Config => cmd_config(&cli).await,
    }
}

/// Settings, the persisted store and its state file, for reading.
pub(crate) fn open_state() -> Result<(Settings, Arc<MemoryStore>, StateFile)> {
    let settings = config::load_settings().settings;
    let state = StateFile::default_location()?;
    let store = Arc::new(state.load(settings.clone())?);
    Ok((settings, store, state))
}

/// As [`open_state`], but claims the state file first so no other process
/// can save over this one's changes. Keep the lock until the last save.
pub(crate) fn open_state_for_update()
-> Result<(Settings, Arc<MemoryStore>, StateFile, StateLock)> {
    let settings = config::load_settings().settings;
    let state = StateFile::default_location()?;
    let lock = state.lock()?;
    let store = Arc::new(state.load(settings.clone())?);
    Ok((settings, store, state, lock))
}

/// Wire the system probe, resolvers and notification channels to `store`.
pub(crate) fn build_monitor(store: Arc<MemoryStore>, settings: &Settings) -> Result<Monitor> {
    let probe: Arc<dyn ReachabilityProbe> = Arc::new(SystemPing);
    let sweeper = NetworkSweeper::new(probe.clone(), IdentityResolver::default(), ScanState::new())
        .with_concurrency(settings.sweep_concurrency);
    let poller = LivenessPoller::new(probe).with_concurrency(settings.poll_concurrency);

    let dispatcher = Dispatcher::new().context("Failed to set up notification channels")?;
    let alerts = AlertEngine::new(store.clone(), Arc::new(dispatcher));

    Ok(Monitor::new(store, sweeper, poller, alerts))
}

fn device_json(device: &Device) -> serde_json::Value {
    serde_json::json!({
        "id": device.id,
        "name": device.display_name(),
        "ip": device.ip,
        "mac": device.mac,
        "hostname": device.hostname,
        "vendor": device.vendor(),
        "status": device.status(),
        "group": device.group,
        "is_favorite": device.is_favorite,
        "is_local": device.is_local,
        "is_manual": device.is_manual,
        "last_seen": device.last_seen,
    })
}

fn print_device_table(devices: &[Device]) {
    for device in devices {
        let ip = device
            .ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "-".to_string());
        let marker = if device.is_local { " (this machine)" } else { "" };
        println!(
            "  {:15} {:17} {:8} {}{}  [{}]",
            ip,
            device.mac.to_string(),
            device.status().to_string(),
            device.display_name(),
            marker,
            device.vendor()
        );
    }
}

async fn sorted_devices(store: &MemoryStore) -> Result<Vec<Device>> {
    let mut devices = store.devices().await?;
    devices.sort_by_key(|d| (d.ip.is_none(), d.ip));
    Ok(devices)
}

async fn cmd_scan(cli: &Cli, range: Option<String>) -> Result<()> {
    let (settings, store, state, _lock) = open_state_for_update()?;
    let monitor = build_monitor(store.clone(), &settings)?;
    let range = range.unwrap_or_else(|| settings.scan_range.clone());

    match cli.format {
        OutputFormat::Text => println!("Scanning {}...", range),
        OutputFormat::Json => {}
    }

    // Print a line every 10% in text mode
    let progress_callback: Option<lancontrol_core::scanner::ProgressCallback> = match cli.format {
        OutputFormat::Text => {
            let last_decile = AtomicUsize::new(0);
            Some(Box::new(move |progress: ScanProgress| {
                let decile = progress.completed * 10 / progress.total.max(1);
                if decile > last_decile.swap(decile, Ordering::Relaxed) {
                    println!(
                        "  [{:>3}%] {} of {} hosts probed, {} found",
                        decile * 10,
                        progress.completed,
                        progress.total,
                        progress.devices_found
                    );
                }
            }))
        }
        OutputFormat::Json => None,
    };

    let summary = monitor.run_sweep(&range, progress_callback).await?;
    state.save(&store)?;
    let devices = sorted_devices(&store).await?;

    match cli.format {
        OutputFormat::Text => {
            println!();
            println!(
                "Found {} devices ({} new, {} alerts raised):",
                summary.discovered, summary.created, summary.alerts_raised
            );
            println!();
            print_device_table(&devices);
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "range": range,
                    "summary": summary,
                    "devices": devices.iter().map(device_json).collect::<Vec<_>>(),
                })
            );
        }
    }

    Ok(())
}

async fn cmd_status(cli: &Cli) -> Result<()> {
    let (settings, store, state) = open_state()?;
    let devices = store.devices().await?;
    let now = Utc::now();
    let online = devices
        .iter()
        .filter(|d| d.status_at(now) == DeviceStatus::Online)
        .count();
    let unread = store.alerts().iter().filter(|a| !a.is_read).count();

    let (interface, gateway) = tokio::task::spawn_blocking(|| {
        let inspector = SystemNetworkInspector;
        (inspector.local_interface(), inspector.default_gateway())
    })
    .await?;

    match cli.format {
        OutputFormat::Text => {
            println!("Devices:  {} known, {} online", devices.len(), online);
            println!("Alerts:   {} unread", unread);
            println!();
            match interface {
                Some(ref iface) => println!(
                    "Local:    {} on {} ({})",
                    iface.ip,
                    iface.name.as_deref().unwrap_or("-"),
                    iface
                        .mac
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "no MAC".to_string())
                ),
                None => println!("Local:    unknown"),
            }
            println!(
                "Gateway:  {}",
                gateway
                    .map(|g| g.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            );
            println!("Range:    {}", settings.scan_range);
            println!("State:    {}", state.path().display());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "devices": devices.len(),
                    "online": online,
                    "unread_alerts": unread,
                    "local_ip": interface.as_ref().map(|i| i.ip),
                    "local_mac": interface.as_ref().and_then(|i| i.mac),
                    "interface": interface.as_ref().and_then(|i| i.name.clone()),
                    "gateway_ip": gateway,
                    "scan_range": settings.scan_range,
                    "state_file": state.path(),
                })
            );
        }
    }

    Ok(())
}

async fn cmd_ports(cli: &Cli, target: &str, full: bool, banners: bool) -> Result<()> {
    let preset = if full { ScanPreset::Full } else { ScanPreset::Quick };
    let (_, store, _) = open_state()?;

    let known = match devices::resolve_device(&store, target).await {
        Ok(device) => Some(device.id),
        Err(_) if target.parse::<Ipv4Addr>().is_ok() => None,
        Err(e) => return Err(e),
    };

    // Known devices go through the monitor so findings and alerts are kept
    let (ip, findings, device_type) = match known {
        Some(device_id) => {
            let (settings, store, state, _lock) = open_state_for_update()?;
            let monitor = build_monitor(store.clone(), &settings)?;
            let report = monitor.run_port_scan(device_id, preset).await?;
            state.save(&store)?;
            (report.ip, report.findings, report.device_type)
        }
        None => {
            let ip: Ipv4Addr = target.parse()?;
            let findings = ports::probe_preset(ip, preset).await;
            let open: Vec<u16> = findings.iter().map(|f| f.port).collect();
            (ip, findings, ports::classify_device_type(&open))
        }
    };

    let mut banner_text = Vec::with_capacity(findings.len());
    for finding in &findings {
        let banner = if banners {
            ports::grab_banner(ip, finding.port, BANNER_TIMEOUT).await
        } else {
            None
        };
        banner_text.push(banner);
    }

    match cli.format {
        OutputFormat::Text => {
            println!("{}: {} open ports, looks like {}", ip, findings.len(), device_type);
            println!();
            for (finding, banner) in findings.iter().zip(&banner_text) {
                match banner {
                    Some(b) => println!("  {:>5}/tcp  {:12} {}", finding.port, finding.service, b.trim()),
                    None => println!("  {:>5}/tcp  {}", finding.port, finding.service),
                }
            }
        }
        OutputFormat::Json => {
            let ports: Vec<_> = findings
                .iter()
                .zip(&banner_text)
                .map(|(f, banner)| {
                    serde_json::json!({
                        "port": f.port,
                        "protocol": f.protocol,
                        "service": f.service,
                        "state": f.state,
                        "banner": banner,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "ip": ip,
                    "device_type": device_type,
                    "ports": ports,
                })
            );
        }
    }

    Ok(())
}

async fn cmd_wake(cli: &Cli, macs: &[String]) -> Result<()> {
    let settings = config::load_settings().settings;
    let wol = WakeOnLan::new(settings.wol_broadcast);
    let bulk = wol.wake_many(macs).await;

    match cli.format {
        OutputFormat::Text => {
            for (mac, result) in &bulk.results {
                let mark = if result.success { "ok" } else { "FAILED" };
                println!("  {:6} {:17} {}", mark, mac, result.message);
            }
            println!();
            println!("{} of {} packets sent", bulk.success_count, bulk.total);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(&bulk)?);
        }
    }

    ensure_all_woken(&bulk)
}

fn ensure_all_woken(bulk: &BulkWakeResult) -> Result<()> {
    if bulk.success_count < bulk.total {
        bail!(
            "{} of {} wake packets could not be sent",
            bulk.total - bulk.success_count,
            bulk.total
        );
    }
    Ok(())
}

async fn cmd_check(cli: &Cli, target: &str) -> Result<()> {
    let (settings, store, state, _lock) = open_state_for_update()?;
    let device = devices::resolve_device(&store, target).await?;
    let monitor = build_monitor(store.clone(), &settings)?;
    let check = monitor.check_device(device.id).await?;
    state.save(&store)?;

    match cli.format {
        OutputFormat::Text => {
            println!(
                "{} ({}): {}",
                device.display_name(),
                device
                    .ip
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "no IP".to_string()),
                check.message
            );
            if check.changed {
                let status = if check.online { "online" } else { "offline" };
                println!("Status recorded as {}", status);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&check)?),
    }

    Ok(())
}

async fn cmd_topology(cli: &Cli) -> Result<()> {
    let (settings, store, _) = open_state()?;
    let monitor = build_monitor(store, &settings)?;
    let gateway_ip =
        tokio::task::spawn_blocking(|| SystemNetworkInspector.default_gateway()).await?;
    let topology = monitor.topology(gateway_ip).await?;

    match cli.format {
        OutputFormat::Text => {
            let gateway = topology
                .gateway
                .and_then(|id| topology.nodes.iter().find(|n| n.id == id));
            match (topology.gateway_ip, gateway) {
                (Some(ip), Some(node)) => println!("Gateway {} ({})", ip, node.label),
                (Some(ip), None) => {
                    println!("Gateway {} has not been swept yet; run 'lancontrol scan'", ip)
                }
                (None, _) => println!("No default gateway found"),
            }
            for edge in &topology.edges {
                if let Some(node) = topology.nodes.iter().find(|n| n.id == edge.from) {
                    println!(
                        "  +-- {:15} {:8} {} [{}]",
                        node.ip.map(|ip| ip.to_string()).unwrap_or_default(),
                        node.status.to_string(),
                        node.label,
                        node.device_type
                    );
                }
            }
            let linked = topology.edges.len() + usize::from(gateway.is_some());
            if topology.nodes.len() > linked {
                println!("  ({} devices without a link)", topology.nodes.len() - linked);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&topology)?),
    }

    Ok(())
}

async fn cmd_traffic(cli: &Cli, action: &TrafficCommand) -> Result<()> {
    match *action {
        TrafficCommand::Collect => {
            let (settings, store, state, _lock) = open_state_for_update()?;
            let monitor = build_monitor(store.clone(), &settings)?;
            let report = monitor
                .collect_traffic(Arc::new(SystemConntrack))
                .await
                .context("Reading the connection-tracking table usually needs root")?;
            state.save(&store)?;

            match cli.format {
                OutputFormat::Text => println!(
                    "Recorded traffic for {} devices ({} addresses not in the inventory)",
                    report.sampled, report.unmatched
                ),
                OutputFormat::Json => println!("{}", serde_json::to_string(&report)?),
            }
        }
        TrafficCommand::Top { hours, limit } => {
            let (settings, store, _) = open_state()?;
            let monitor = build_monitor(store, &settings)?;
            let top = monitor.top_talkers(hours, limit).await?;

            match cli.format {
                OutputFormat::Text => {
                    if top.is_empty() {
                        println!("No traffic recorded in the last {} hours.", hours);
                    }
                    for entry in &top {
                        println!(
                            "  {:>14} bytes {:>10} packets  {}",
                            entry.total_bytes,
                            entry.total_packets,
                            entry.device.display_name()
                        );
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string(&top)?),
            }
        }
    }

    Ok(())
}

fn cmd_alerts(cli: &Cli, limit: usize) -> Result<()> {
    let (_, store, _) = open_state()?;
    let alerts: Vec<_> = store.alerts().into_iter().take(limit).collect();

    match cli.format {
        OutputFormat::Text => {
            if alerts.is_empty() {
                println!("No alerts.");
            }
            for alert in &alerts {
                println!(
                    "  {}  {:8} {:14} {}",
                    alert.created_at.format("%Y-%m-%d %H:%M:%S"),
                    alert.severity.as_str().to_uppercase(),
                    alert.kind.title(),
                    alert.message
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(&alerts)?);
        }
    }

    Ok(())
}

async fn cmd_config(cli: &Cli) -> Result<()> {
    let loaded = config::load_settings();
    let settings = &loaded.settings;
    let config_path = config::get_config_file_path_string();
    let state_path = persistence::get_state_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());
    let caps = privileges::detect_capabilities().await;

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("Settings from:    {}", loaded.source);
            println!("State file:       {}", state_path);
            println!("Scan range:       {}", settings.scan_range);
            println!(
                "Schedule:         {} (sweep every {}s, poll every {}s)",
                if settings.auto_scan { "on" } else { "off" },
                settings.scan_interval_secs,
                settings.status_check_interval_secs
            );
            println!(
                "Mail alerts:      {}",
                if settings.mail.is_complete() { "configured" } else { "not configured" }
            );
            println!("Alert rules:      {}", settings.alert_rules.len());
            println!();
            println!("{}", privileges::format_capabilities_message(&caps));
            println!();
            println!("Environment variables:");
            println!("  LANCONTROL_SCAN_RANGE     - Override scan range");
            println!("  LANCONTROL_SCAN_INTERVAL  - Override sweep interval (seconds)");
            println!("  LANCONTROL_SMTP_PASSWORD  - SMTP password");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "settings_source": loaded.source.to_string(),
                    "state_file": state_path,
                    "scan_range": settings.scan_range,
                    "auto_scan": settings.auto_scan,
                    "scan_interval_secs": settings.scan_interval_secs,
                    "status_check_interval_secs": settings.status_check_interval_secs,
                    "mail_configured": settings.mail.is_complete(),
                    "alert_rules": settings.alert_rules.len(),
                    "capabilities": caps,
                })
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lancontrol_core::WakeResult;
    use std::collections::BTreeMap;

    fn bulk(outcomes: &[(&str, bool)]) -> BulkWakeResult {
        let results: BTreeMap<String, WakeResult> = outcomes
            .iter()
            .map(|(mac, success)| {
                let result = WakeResult {
                    success: *success,
                    message: String::new(),
                };
                (mac.to_string(), result)
            })
            .collect();
        BulkWakeResult {
            total: results.len(),
            success_count: results.values().filter(|r| r.success).count(),
            results,
        }
    }

    #[test]
    fn failed_wake_packets_become_an_error() {
        assert!(ensure_all_woken(&bulk(&[("AA:BB:CC:DD:EE:01", true)])).is_ok());

        let err = ensure_all_woken(&bulk(&[
            ("AA:BB:CC:DD:EE:01", true),
            ("not-a-mac", false),
        ]))
        .unwrap_err();
        assert_eq!(err.to_string(), "1 of 2 wake packets could not be sent");
    }
}
