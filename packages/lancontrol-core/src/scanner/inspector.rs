//! Neighbor table, route and interface lookups.
//!
//! Kernel tables are read directly on Linux. Other platforms, and Linux
//! systems where `/proc` is unavailable, fall back to the system tools.

use super::hidden_command;
use crate::mac::MacAddress;
use regex::Regex;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::LazyLock;

/// Hex pairs separated by `:` or `-`. BSD `arp` drops leading zeros, so a
/// group may be a single digit.
static MAC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([0-9a-f]{1,2})[:-]([0-9a-f]{1,2})[:-]([0-9a-f]{1,2})[:-]([0-9a-f]{1,2})[:-]([0-9a-f]{1,2})[:-]([0-9a-f]{1,2})\b")
        .expect("static MAC pattern")
});

/// The interface this machine uses for outbound traffic.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalInterface {
    pub name: Option<String>,
    pub ip: Ipv4Addr,
    pub mac: Option<MacAddress>,
}

/// Platform network tables. Calls may block; async callers go through
/// `spawn_blocking`.
pub trait NetworkInspector: Send + Sync {
    /// Hardware address the neighbor table holds for `ip`.
    fn neighbor_entry(&self, ip: Ipv4Addr) -> Option<MacAddress>;

    fn default_gateway(&self) -> Option<Ipv4Addr>;

    fn local_interface(&self) -> Option<LocalInterface>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNetworkInspector;

impl NetworkInspector for SystemNetworkInspector {
    fn neighbor_entry(&self, ip: Ipv4Addr) -> Option<MacAddress> {
        #[cfg(target_os = "linux")]
        if let Ok(table) = std::fs::read_to_string("/proc/net/arp") {
            if let Some(mac) = parse_proc_arp(&table, ip) {
                return Some(mac);
            }
        }

        neighbor_entry_from_tool(ip)
    }

    fn default_gateway(&self) -> Option<Ipv4Addr> {
        #[cfg(target_os = "linux")]
        {
            if let Some((_, gateway)) = std::fs::read_to_string("/proc/net/route")
                .ok()
                .and_then(|routes| parse_proc_route(&routes))
            {
                return Some(gateway);
            }

            let output = hidden_command("ip")
                .args(["route", "show", "default"])
                .output()
                .ok()?;
            let route_str = String::from_utf8_lossy(&output.stdout);
            route_str
                .split_whitespace()
                .skip_while(|&s| s != "via")
                .nth(1)
                .and_then(|s| s.parse().ok())
        }

        #[cfg(target_os = "macos")]
        {
            let output = hidden_command("route")
                .args(["-n", "get", "default"])
                .output()
                .ok()?;
            parse_route_get(&String::from_utf8_lossy(&output.stdout), "gateway")
                .and_then(|s| s.parse().ok())
        }

        #[cfg(target_os = "windows")]
        {
            let output = hidden_command("route")
                .args(["print", "-4", "0.0.0.0"])
                .output()
                .ok()?;
            parse_windows_route_print(&String::from_utf8_lossy(&output.stdout))
        }

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        {
            None
        }
    }

    fn local_interface(&self) -> Option<LocalInterface> {
        let ip = outbound_ip()?;
        let name = default_interface_name();
        let mac = name.as_deref().and_then(interface_mac);

        Some(LocalInterface { name, ip, mac })
    }
}

/// Address the kernel would pick for outbound traffic. Connecting a UDP
/// socket sends nothing; it only selects a route.
fn outbound_ip() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    match socket.local_addr().ok()?.ip() {
        std::net::IpAddr::V4(ip) if !ip.is_unspecified() && !ip.is_loopback() => Some(ip),
        _ => None,
    }
}

fn default_interface_name() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/net/route")
            .ok()
            .and_then(|routes| parse_proc_route(&routes))
            .map(|(iface, _)| iface)
    }

    #[cfg(target_os = "macos")]
    {
        let output = hidden_command("route")
            .args(["-n", "get", "default"])
            .output()
            .ok()?;
        parse_route_get(&String::from_utf8_lossy(&output.stdout), "interface")
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

fn interface_mac(name: &str) -> Option<MacAddress> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string(format!("/sys/class/net/{}/address", name))
            .ok()
            .and_then(|s| s.trim().parse::<MacAddress>().ok())
            .filter(|mac| !mac.is_placeholder())
    }

    #[cfg(target_os = "macos")]
    {
        let output = hidden_command("ifconfig").arg(name).output().ok()?;
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .find(|line| line.trim_start().starts_with("ether "))
            .and_then(extract_mac)
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        let _ = name;
        None
    }
}

fn neighbor_entry_from_tool(ip: Ipv4Addr) -> Option<MacAddress> {
    let ip_str = ip.to_string();

    #[cfg(target_os = "linux")]
    let attempts: [(&str, Vec<&str>); 2] = [
        ("ip", vec!["neigh", "show", &ip_str]),
        ("arp", vec!["-n", &ip_str]),
    ];

    #[cfg(target_os = "macos")]
    let attempts: [(&str, Vec<&str>); 1] = [("arp", vec!["-n", &ip_str])];

    #[cfg(target_os = "windows")]
    let attempts: [(&str, Vec<&str>); 1] = [("arp", vec!["-a", &ip_str])];

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    let attempts: [(&str, Vec<&str>); 0] = [];

    for (program, args) in attempts {
        let Ok(output) = hidden_command(program).args(&args).output() else {
            tracing::debug!("{} unavailable for neighbor lookup", program);
            continue;
        };
        let out = String::from_utf8_lossy(&output.stdout);
        let found = out
            .lines()
            .filter(|line| line_mentions_ip(line, &ip_str))
            .find_map(extract_mac);
        if found.is_some() {
            return found;
        }
    }

    None
}

fn line_mentions_ip(line: &str, ip: &str) -> bool {
    line.split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .any(|token| token == ip)
}

/// First hardware address in `text`, normalized. Placeholder entries for
/// incomplete neighbors are ignored.
pub fn extract_mac(text: &str) -> Option<MacAddress> {
    MAC_PATTERN.captures_iter(text).find_map(|caps| {
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(caps.get(i + 1)?.as_str(), 16).ok()?;
        }
        Some(MacAddress::new(octets)).filter(|mac| !mac.is_placeholder())
    })
}

/// Look up `ip` in `/proc/net/arp`. Entries without the complete flag (0x2)
/// are skipped.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_arp(table: &str, ip: Ipv4Addr) -> Option<MacAddress> {
    table.lines().skip(1).find_map(|line| {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 || parts[0].parse::<Ipv4Addr>().ok()? != ip {
            return None;
        }
        let flags = u32::from_str_radix(parts[2].trim_start_matches("0x"), 16).ok()?;
        if flags & 0x2 == 0 {
            return None;
        }
        parts[3]
            .parse::<MacAddress>()
            .ok()
            .filter(|mac| !mac.is_placeholder())
    })
}

/// Interface and gateway of the default route in `/proc/net/route`.
/// Addresses there are little-endian hex.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_proc_route(routes: &str) -> Option<(String, Ipv4Addr)> {
    routes.lines().skip(1).find_map(|line| {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || parts[1] != "00000000" {
            return None;
        }
        let raw = u32::from_str_radix(parts[2], 16).ok()?;
        let gateway = Ipv4Addr::from(raw.swap_bytes());
        (!gateway.is_unspecified()).then(|| (parts[0].to_string(), gateway))
    })
}

/// Value of a `key: value` line in `route -n get default` output.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn parse_route_get(output: &str, key: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.trim().split_once(':'))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Gateway column of the `0.0.0.0 0.0.0.0` row in `route print`.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn parse_windows_route_print(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["0.0.0.0", "0.0.0.0", gateway, ..] => gateway.parse().ok(),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_ARP: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         a4:91:b1:0c:22:10     *        wlan0
192.168.1.40     0x1         0x0         00:00:00:00:00:00     *        wlan0
192.168.1.52     0x1         0x2         b8:27:eb:12:34:56     *        wlan0
";

    #[test]
    fn proc_arp_lookup() {
        assert_eq!(
            parse_proc_arp(PROC_ARP, Ipv4Addr::new(192, 168, 1, 52)),
            Some("B8:27:EB:12:34:56".parse().unwrap())
        );
        assert_eq!(parse_proc_arp(PROC_ARP, Ipv4Addr::new(192, 168, 1, 40)), None);
        assert_eq!(parse_proc_arp(PROC_ARP, Ipv4Addr::new(192, 168, 1, 99)), None);
    }

    #[test]
    fn proc_route_default_gateway() {
        let routes = "\
Iface	Destination	Gateway 	Flags	RefCnt	Use	Metric	Mask		MTU	Window	IRTT
eth0	0001A8C0	00000000	0001	0	0	100	00FFFFFF	0	0	0
eth0	00000000	0101A8C0	0003	0	0	100	00000000	0	0	0
";
        assert_eq!(
            parse_proc_route(routes),
            Some(("eth0".to_string(), Ipv4Addr::new(192, 168, 1, 1)))
        );
        assert_eq!(parse_proc_route("Iface\tDestination\n"), None);
    }

    #[test]
    fn extracts_tool_output_formats() {
        let linux = "192.168.1.7 dev eth0 lladdr 3c:22:fb:01:02:03 REACHABLE";
        let macos = "? (192.168.1.7) at 3c:22:fb:1:2:3 on en0 ifscope [ethernet]";
        let windows = "  192.168.1.7           3c-22-fb-01-02-03     dynamic";
        for text in [linux, macos, windows] {
            assert_eq!(
                extract_mac(text),
                Some("3C:22:FB:01:02:03".parse().unwrap()),
                "{text}"
            );
        }
        assert_eq!(extract_mac("192.168.1.9 dev eth0 INCOMPLETE"), None);
        assert_eq!(extract_mac("? (192.168.1.9) at ff:ff:ff:ff:ff:ff"), None);
    }

    #[test]
    fn ip_must_match_whole_token() {
        assert!(line_mentions_ip("? (10.0.0.1) at aa:bb:cc:dd:ee:ff", "10.0.0.1"));
        assert!(!line_mentions_ip("10.0.0.10 dev eth0 lladdr aa:bb:cc:dd:ee:ff", "10.0.0.1"));
    }

    #[test]
    fn route_get_fields() {
        let output = "   route to: default\ndestination: default\n    gateway: 192.168.0.1\n  interface: en0\n";
        assert_eq!(parse_route_get(output, "gateway").as_deref(), Some("192.168.0.1"));
        assert_eq!(parse_route_get(output, "interface").as_deref(), Some("en0"));
        assert_eq!(parse_route_get(output, "flags"), None);
    }

    #[test]
    fn windows_route_print_gateway() {
        let output = "\
Network Destination        Netmask          Gateway       Interface  Metric
          0.0.0.0          0.0.0.0      192.168.1.1    192.168.1.23     25
";
        assert_eq!(
            parse_windows_route_print(output),
            Some(Ipv4Addr::new(192, 168, 1, 1))
        );
    }
}
