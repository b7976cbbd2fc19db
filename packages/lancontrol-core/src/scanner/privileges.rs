//! Capability detection for probing and waking.
//!
//! Different platforms have different requirements:
//! - Windows: ICMP ping works without admin
//! - Linux: system ping usually has setuid or CAP_NET_RAW
//! - macOS: ICMP ping works without root for most operations
//!
//! Broadcast UDP, used for wake packets, normally needs no privileges but can
//! be blocked by sandboxing or firewall policy.

use super::hidden_command;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, UdpSocket};

/// Information about what this process can do on the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCapabilities {
    pub can_ping: bool,
    pub can_broadcast: bool,
    pub is_elevated: bool,
    pub elevation_instructions: Option<String>,
}

/// Check if the current process is running with elevated privileges
pub fn is_elevated() -> bool {
    #[cfg(target_os = "windows")]
    {
        match hidden_command("whoami").args(["/groups"]).output() {
            Ok(output) => {
                let output_str = String::from_utf8_lossy(&output.stdout);
                output_str.contains("S-1-16-12288") || output_str.contains("High Mandatory Level")
            }
            Err(_) => false,
        }
    }

    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(any(target_os = "windows", unix)))]
    {
        false
    }
}

/// Test if ping functionality works against loopback
pub async fn test_ping_capability() -> bool {
    let result = tokio::task::spawn_blocking(|| {
        #[cfg(target_os = "windows")]
        let output = hidden_command("ping")
            .args(["-n", "1", "-w", "500", "127.0.0.1"])
            .output();

        #[cfg(not(target_os = "windows"))]
        let output = hidden_command("ping")
            .args(["-c", "1", "-W", "1", "127.0.0.1"])
            .output();

        output.map(|o| o.status.success()).unwrap_or(false)
    })
    .await;

    result.unwrap_or(false)
}

/// Whether a broadcast-enabled UDP socket can be opened
pub fn test_broadcast_capability() -> bool {
    match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).and_then(|s| s.set_broadcast(true)) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Broadcast UDP socket unavailable: {}", e);
            false
        }
    }
}

pub async fn detect_capabilities() -> ScanCapabilities {
    let can_ping = test_ping_capability().await;
    let elevation_instructions = (!can_ping).then(get_elevation_instructions);

    ScanCapabilities {
        can_ping,
        can_broadcast: test_broadcast_capability(),
        is_elevated: is_elevated(),
        elevation_instructions,
    }
}

/// Get platform-specific instructions for enabling ping
pub fn get_elevation_instructions() -> String {
    #[cfg(target_os = "windows")]
    {
        "Ping failed even against loopback. Check that ICMP is not blocked by\n\
         Windows Defender Firewall, or run lancontrol as administrator."
            .to_string()
    }

    #[cfg(target_os = "linux")]
    {
        "To let lancontrol probe hosts on Linux:\n\
         \n\
         Option 1 - Ensure the system ping has setuid or capabilities:\n\
         $ getcap /bin/ping   # expect cap_net_raw=ep\n\
         \n\
         Option 2 - Allow unprivileged ICMP sockets:\n\
         $ sudo sysctl -w net.ipv4.ping_group_range=\"0 2147483647\"\n\
         \n\
         Option 3 - Run as root (not recommended for regular use):\n\
         $ sudo lancontrol daemon"
            .to_string()
    }

    #[cfg(target_os = "macos")]
    {
        "Ping normally works without root on macOS.\n\
         If probing fails, check System Settings > Privacy & Security and any\n\
         installed firewall, or run with sudo."
            .to_string()
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        "Elevated privileges may be required to run the system ping.\n\
         Please consult your operating system documentation."
            .to_string()
    }
}

/// Format a user-friendly message about current capabilities
pub fn format_capabilities_message(caps: &ScanCapabilities) -> String {
    if caps.can_ping && caps.can_broadcast {
        return "Probing and wake-on-LAN available".to_string();
    }

    let mut msg = String::from("Running with limited capabilities:\n");
    if !caps.can_ping {
        msg.push_str("  - Ping unavailable (sweeps and polls will find nothing)\n");
    }
    if !caps.can_broadcast {
        msg.push_str("  - Broadcast UDP unavailable (wake-on-LAN will fail)\n");
    }
    if let Some(ref instructions) = caps.elevation_instructions {
        msg.push('\n');
        msg.push_str(instructions);
    }
    msg
}
