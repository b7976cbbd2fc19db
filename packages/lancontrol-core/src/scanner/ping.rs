//! Reachability probe using the system ping command

use super::hidden_command;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::time::Duration;

/// One bounded liveness check. Every failure mode reads as "not reachable".
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self, ip: Ipv4Addr, timeout: Duration) -> bool;
}

/// Probe backed by the platform `ping` binary.
///
/// A successful ping also refreshes the OS neighbor table, which is what
/// hardware-address resolution reads afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPing;

#[async_trait]
impl ReachabilityProbe for SystemPing {
    async fn probe(&self, ip: Ipv4Addr, timeout: Duration) -> bool {
        let task = tokio::task::spawn_blocking(move || ping_once(ip, timeout));

        // The child process gets its own deadline; this one only guards
        // against a ping binary that ignores it.
        match tokio::time::timeout(timeout + Duration::from_secs(1), task).await {
            Ok(Ok(reachable)) => reachable,
            Ok(Err(e)) => {
                tracing::debug!("Ping task for {} failed: {}", ip, e);
                false
            }
            Err(_) => {
                tracing::debug!("Ping to {} exceeded its deadline", ip);
                false
            }
        }
    }
}

fn ping_once(ip: Ipv4Addr, timeout: Duration) -> bool {
    let args = ping_args(ip, timeout);
    let output = match hidden_command("ping").args(&args).output() {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!("Failed to execute ping: {}", e);
            return false;
        }
    };

    #[cfg(target_os = "windows")]
    {
        // Windows exits 0 for "destination host unreachable" replies
        let output_lower = String::from_utf8_lossy(&output.stdout).to_lowercase();
        output.status.success()
            && output_lower.contains("reply from")
            && !output_lower.contains("destination host unreachable")
    }

    #[cfg(not(target_os = "windows"))]
    {
        output.status.success()
    }
}

/// Platform arguments for a single echo request with a bounded wait.
fn ping_args(ip: Ipv4Addr, timeout: Duration) -> Vec<String> {
    let ip = ip.to_string();

    #[cfg(target_os = "windows")]
    {
        let ms = timeout.as_millis().max(1).to_string();
        vec!["-n".into(), "1".into(), "-w".into(), ms, ip]
    }

    #[cfg(target_os = "macos")]
    {
        // -t is the overall timeout in seconds on BSD ping
        let secs = timeout.as_secs().max(1).to_string();
        vec!["-c".into(), "1".into(), "-t".into(), secs, ip]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let secs = timeout.as_secs().max(1).to_string();
        vec!["-c".into(), "1".into(), "-W".into(), secs, ip]
    }
}
