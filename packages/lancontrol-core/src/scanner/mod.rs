//! Network discovery.
//!
//! Provides cross-platform discovery using:
//! - System ping as the reachability probe
//! - Neighbor (ARP) table and route lookups behind [`NetworkInspector`]
//! - Reverse DNS, mDNS, SSDP and NetBIOS name resolution
//! - MAC OUI vendor lookup

pub mod identity;
pub mod inspector;
pub mod oui;
pub mod ping;
pub mod poll;
pub mod privileges;
pub mod resolvers;
pub mod state;
pub mod sweep;

pub use identity::{Identity, IdentityResolver};
pub use inspector::{LocalInterface, NetworkInspector, SystemNetworkInspector};
pub use ping::{ReachabilityProbe, SystemPing};
pub use poll::{LivenessPoller, PollOutcome};
pub use privileges::ScanCapabilities;
pub use state::{ScanGuard, ScanState, ScanStatus};
pub use sweep::{NetworkSweeper, ProgressCallback, ScanProgress};

use std::process::Command;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a Command that hides the console window on Windows.
#[cfg(target_os = "windows")]
pub(crate) fn hidden_command(program: &str) -> Command {
    use std::os::windows::process::CommandExt;
    let mut cmd = Command::new(program);
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[cfg(not(target_os = "windows"))]
pub(crate) fn hidden_command(program: &str) -> Command {
    Command::new(program)
}

/// Get the local machine's hostname
pub(crate) fn get_local_hostname() -> Option<String> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("COMPUTERNAME").ok()
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        hidden_command("hostname")
            .output()
            .ok()
            .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
            .filter(|s| !s.is_empty())
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}
