//! Device inventory commands: list, show, add, edit and remove.

use crate::{Cli, OutputFormat, device_json, open_state, open_state_for_update, print_device_table};
use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use lancontrol_core::uptime::DEFAULT_UPTIME_DAYS;
use lancontrol_core::{Device, DeviceEdit, DeviceStore, MacAddress, MemoryStore, ports};
use std::net::Ipv4Addr;

#[derive(Subcommand)]
pub enum DeviceCommand {
    /// List known devices (the default)
    List,

    /// Show one device with its uptime and open ports
    Show {
        /// Device id, IP address or MAC address
        target: String,

        /// Uptime window in days
        #[arg(long, default_value_t = DEFAULT_UPTIME_DAYS)]
        days: u32,
    },

    /// Register a device by hand
    Add(AddArgs),

    /// Change a device's nickname, group, favorite flag or address
    Edit {
        /// Device id, IP address or MAC address
        target: String,

        #[command(flatten)]
        changes: EditArgs,
    },

    /// Forget a device along with its history
    Remove {
        /// Device id, IP address or MAC address
        target: String,
    },
}

#[derive(Args)]
pub struct AddArgs {
    /// Hardware address, in any common notation
    pub mac: String,

    #[arg(long)]
    pub ip: Option<Ipv4Addr>,

    /// Nickname shown instead of the hostname
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub group: Option<String>,

    #[arg(long)]
    pub favorite: bool,
}

#[derive(Args, Default)]
pub struct EditArgs {
    /// New nickname
    #[arg(long, conflicts_with = "clear_name")]
    pub name: Option<String>,

    #[arg(long)]
    pub clear_name: bool,

    /// New group
    #[arg(long, conflicts_with = "clear_group")]
    pub group: Option<String>,

    #[arg(long)]
    pub clear_group: bool,

    #[arg(long, conflicts_with = "unfavorite")]
    pub favorite: bool,

    #[arg(long)]
    pub unfavorite: bool,

    /// New IP address
    #[arg(long, conflicts_with = "clear_ip")]
    pub ip: Option<Ipv4Addr>,

    #[arg(long)]
    pub clear_ip: bool,
}

impl EditArgs {
    pub fn to_edit(&self) -> DeviceEdit {
        fn field<T: Clone>(value: &Option<T>, clear: bool) -> Option<Option<T>> {
            if clear {
                Some(None)
            } else {
                value.clone().map(Some)
            }
        }

        DeviceEdit {
            nickname: field(&self.name, self.clear_name),
            group: field(&self.group, self.clear_group),
            is_favorite: match (self.favorite, self.unfavorite) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            ip: field(&self.ip, self.clear_ip),
            hostname: None,
        }
    }
}

/// Find a device by store id, IPv4 address or hardware address.
pub async fn resolve_device(store: &MemoryStore, target: &str) -> Result<Device> {
    let target = target.trim();

    if let Ok(ip) = target.parse::<Ipv4Addr>() {
        let found = store.devices().await?.into_iter().find(|d| d.ip == Some(ip));
        return found.with_context(|| format!("No device with IP {} is known", ip));
    }

    // Bare twelve-digit MACs would also parse as numbers
    if target.len() < 12 {
        if let Ok(id) = target.parse::<u64>() {
            return store
                .device(id)
                .await?
                .with_context(|| format!("No device with id {} is known", id));
        }
    }

    match target.parse::<MacAddress>() {
        Ok(mac) => store
            .device_by_mac(mac)
            .await?
            .with_context(|| format!("No device with MAC {} is known", mac)),
        Err(_) => bail!(
            "'{}' is not a device id, IPv4 address or MAC address",
            target
        ),
    }
}

pub fn add_device(store: &MemoryStore, args: &AddArgs) -> Result<Device> {
    let mac: MacAddress = args.mac.parse()?;
    let device = store.add_manual_device(mac, args.ip, args.name.clone())?;

    if args.group.is_none() && !args.favorite {
        return Ok(device);
    }
    let edit = DeviceEdit {
        group: args.group.clone().map(Some),
        is_favorite: args.favorite.then_some(true),
        ..DeviceEdit::default()
    };
    store.update_device(device.id, &edit)
}

pub async fn run(cli: &Cli, command: Option<&DeviceCommand>) -> Result<()> {
    let Some(command) = command else {
        return list(cli).await;
    };

    match command {
        DeviceCommand::List => list(cli).await,
        DeviceCommand::Show { target, days } => show(cli, target, *days).await,
        DeviceCommand::Add(args) => {
            let (_, store, state, _lock) = open_state_for_update()?;
            let device = add_device(&store, args)?;
            state.save(&store)?;
            report(cli, "Added", &device);
            Ok(())
        }
        DeviceCommand::Edit { target, changes } => {
            let edit = changes.to_edit();
            if edit.is_empty() {
                bail!("Nothing to change; see 'lancontrol devices edit --help'");
            }
            let (_, store, state, _lock) = open_state_for_update()?;
            let device = resolve_device(&store, target).await?;
            let device = store.update_device(device.id, &edit)?;
            state.save(&store)?;
            report(cli, "Updated", &device);
            Ok(())
        }
        DeviceCommand::Remove { target } => {
            let (_, store, state, _lock) = open_state_for_update()?;
            let device = resolve_device(&store, target).await?;
            let device = store.remove_device(device.id)?;
            state.save(&store)?;
            report(cli, "Removed", &device);
            Ok(())
        }
    }
}

fn report(cli: &Cli, verb: &str, device: &Device) {
    match cli.format {
        OutputFormat::Text => println!(
            "{} device {} ({}, {})",
            verb,
            device.id,
            device.display_name(),
            device.mac
        ),
        OutputFormat::Json => println!("{}", device_json(device)),
    }
}

async fn list(cli: &Cli) -> Result<()> {
    let (_, store, _) = open_state()?;
    let devices = crate::sorted_devices(&store).await?;

    match cli.format {
        OutputFormat::Text => {
            if devices.is_empty() {
                println!("No devices yet. Run 'lancontrol scan' or 'lancontrol devices add' first.");
            } else {
                print_device_table(&devices);
            }
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!(devices.iter().map(device_json).collect::<Vec<_>>())
            );
        }
    }

    Ok(())
}

async fn show(cli: &Cli, target: &str, days: u32) -> Result<()> {
    let (settings, store, _) = open_state()?;
    let device = resolve_device(&store, target).await?;
    let monitor = crate::build_monitor(store.clone(), &settings)?;
    let uptime = monitor.uptime(device.id, days).await?;
    let findings = store.port_findings(device.id).await?;
    let device_type = findings.as_ref().map(|f| {
        let open: Vec<u16> = f.iter().map(|p| p.port).collect();
        ports::classify_device_type(&open)
    });

    match cli.format {
        OutputFormat::Text => {
            println!("Device {}: {}", device.id, device.display_name());
            println!("  MAC:       {}", device.mac);
            println!(
                "  IP:        {}",
                device.ip.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_string())
            );
            println!("  Hostname:  {}", device.hostname.as_deref().unwrap_or("-"));
            println!("  Vendor:    {}", device.vendor());
            println!("  Group:     {}", device.group.as_deref().unwrap_or("-"));
            println!(
                "  Flags:     {}{}{}",
                if device.is_favorite { "favorite " } else { "" },
                if device.is_manual { "manual " } else { "" },
                if device.is_local { "this-machine" } else { "" }
            );
            println!("  Status:    {}", device.status());
            match uptime {
                Some(pct) => println!("  Uptime:    {:.1}% over {} days", pct, days),
                None => println!("  Uptime:    no history in the last {} days", days),
            }
            match (&findings, device_type) {
                (Some(findings), Some(device_type)) => {
                    let open: Vec<String> = findings
                        .iter()
                        .map(|f| format!("{}/{}", f.port, f.service))
                        .collect();
                    println!("  Type:      {}", device_type);
                    println!(
                        "  Ports:     {}",
                        if open.is_empty() { "none open".to_string() } else { open.join(", ") }
                    );
                }
                _ => println!("  Ports:     not probed yet"),
            }
        }
        OutputFormat::Json => {
            let mut body = device_json(&device);
            if let Some(obj) = body.as_object_mut() {
                obj.insert("uptime_days".into(), serde_json::json!(days));
                obj.insert("uptime_percentage".into(), serde_json::json!(uptime));
                obj.insert("device_type".into(), serde_json::json!(device_type));
                obj.insert("open_ports".into(), serde_json::json!(findings));
            }
            println!("{}", body);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lancontrol_core::Settings;

    fn add_args(mac: &str) -> AddArgs {
        AddArgs {
            mac: mac.to_string(),
            ip: None,
            name: None,
            group: None,
            favorite: false,
        }
    }

    #[tokio::test]
    async fn added_devices_are_manual_and_carry_group_and_favorite() {
        let store = MemoryStore::new(Settings::default());
        let args = AddArgs {
            ip: Some(Ipv4Addr::new(192, 168, 1, 50)),
            name: Some("Office printer".into()),
            group: Some("office".into()),
            favorite: true,
            ..add_args("aa-bb-cc-dd-ee-01")
        };

        let device = add_device(&store, &args).unwrap();
        assert!(device.is_manual);
        assert!(device.is_favorite);
        assert_eq!(device.group.as_deref(), Some("office"));
        assert_eq!(device.nickname.as_deref(), Some("Office printer"));
        assert_eq!(device.mac.to_string(), "AA:BB:CC:DD:EE:01");

        assert!(add_device(&store, &add_args("AA:BB:CC:DD:EE:01")).is_err());
        assert!(add_device(&store, &add_args("not-a-mac")).is_err());
    }

    #[tokio::test]
    async fn targets_resolve_by_id_address_or_mac() {
        let store = MemoryStore::new(Settings::default());
        let device = add_device(
            &store,
            &AddArgs {
                ip: Some(Ipv4Addr::new(10, 0, 0, 8)),
                ..add_args("02:00:00:00:00:08")
            },
        )
        .unwrap();

        for target in [
            device.id.to_string(),
            "10.0.0.8".to_string(),
            "02-00-00-00-00-08".to_string(),
            "020000000008".to_string(),
        ] {
            assert_eq!(resolve_device(&store, &target).await.unwrap().id, device.id);
        }

        assert!(resolve_device(&store, "10.0.0.9").await.is_err());
        assert!(resolve_device(&store, "77").await.is_err());
        let err = resolve_device(&store, "printer").await.unwrap_err();
        assert!(err.to_string().contains("not a device id"));
    }

    #[test]
    fn edit_flags_map_to_field_changes() {
        let args = EditArgs {
            name: Some("NAS".into()),
            clear_group: true,
            unfavorite: true,
            ..EditArgs::default()
        };
        let edit = args.to_edit();
        assert_eq!(edit.nickname, Some(Some("NAS".to_string())));
        assert_eq!(edit.group, Some(None));
        assert_eq!(edit.is_favorite, Some(false));
        assert_eq!(edit.ip, None);

        assert!(EditArgs::default().to_edit().is_empty());
    }

    #[tokio::test]
    async fn favorites_set_from_the_command_line_reach_rule_filters() {
        use lancontrol_core::DeviceFilter;

        let store = MemoryStore::new(Settings::default());
        let device = add_device(&store, &add_args("02:00:00:00:00:0A")).unwrap();
        assert!(!DeviceFilter::Favorites.matches(&device));

        let args = EditArgs {
            favorite: true,
            group: Some("lab".into()),
            ..EditArgs::default()
        };
        let device = store.update_device(device.id, &args.to_edit()).unwrap();
        assert!(DeviceFilter::Favorites.matches(&device));
        assert!(DeviceFilter::Group("lab".into()).matches(&device));
    }
}
