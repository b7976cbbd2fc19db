//! Full sweep of an address range.

use super::identity::IdentityResolver;
use super::ping::ReachabilityProbe;
use super::state::{ScanGuard, ScanState};
use crate::error::{Error, Result};
use crate::model::DiscoveredHost;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_SWEEP_CONCURRENCY: usize = 50;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Narrowest prefix accepted for a sweep (65 534 hosts).
const MIN_PREFIX: u8 = 16;

/// Reported after every finished probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub completed: usize,
    pub total: usize,
    pub devices_found: usize,
}

/// Callback type for sweep progress updates
pub type ProgressCallback = Box<dyn Fn(ScanProgress) + Send + Sync>;

#[derive(Clone)]
pub struct NetworkSweeper {
    probe: Arc<dyn ReachabilityProbe>,
    identity: IdentityResolver,
    state: Arc<ScanState>,
    concurrency: usize,
    probe_timeout: Duration,
}

impl NetworkSweeper {
    pub fn new(
        probe: Arc<dyn ReachabilityProbe>,
        identity: IdentityResolver,
        state: Arc<ScanState>,
    ) -> Self {
        Self {
            probe,
            identity,
            state,
            concurrency: DEFAULT_SWEEP_CONCURRENCY,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn state(&self) -> &Arc<ScanState> {
        &self.state
    }

    /// Sweep `range`, rejecting the call if another sweep is running.
    pub async fn sweep(
        &self,
        range: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<DiscoveredHost>> {
        let guard = self.state.try_begin()?;
        self.sweep_with_guard(guard, range, on_progress).await
    }

    /// Sweep under a guard the caller already holds. The result is only
    /// recorded in [`ScanState`] when the sweep finishes normally.
    pub async fn sweep_with_guard(
        &self,
        guard: ScanGuard,
        range: &str,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<DiscoveredHost>> {
        let addresses = expand_range(range)?;
        let total = addresses.len();
        let started = Instant::now();
        tracing::info!("Sweeping {} hosts in {}", total, range);

        let mut found = Vec::new();
        let mut completed = 0;
        let mut probes = stream::iter(addresses)
            .map(|ip| self.probe_host(ip))
            .buffer_unordered(self.concurrency);

        while let Some(result) = probes.next().await {
            completed += 1;
            if let Some(host) = result {
                found.push(host);
            }
            if let Some(ref callback) = on_progress {
                callback(ScanProgress {
                    completed,
                    total,
                    devices_found: found.len(),
                });
            }
        }

        let local = self.local_host().await;
        let hosts = merge_results(found, local);

        tracing::info!(
            "Sweep of {} complete: {} devices in {:.1}s",
            range,
            hosts.len(),
            started.elapsed().as_secs_f64()
        );
        guard.complete(hosts.len());
        Ok(hosts)
    }

    async fn probe_host(&self, ip: Ipv4Addr) -> Option<DiscoveredHost> {
        if !self.probe.probe(ip, self.probe_timeout).await {
            return None;
        }

        let Some(mac) = self.identity.hardware_address(ip).await else {
            tracing::debug!("{} answered but has no neighbor entry, dropping", ip);
            return None;
        };
        let hostname = self.identity.hostname(ip).await;

        Some(DiscoveredHost {
            ip,
            mac: Some(mac),
            hostname,
            seen_at: Utc::now(),
            is_local: false,
        })
    }

    async fn local_host(&self) -> Option<DiscoveredHost> {
        let inspector = Arc::clone(self.identity.inspector());
        let (interface, hostname) = tokio::task::spawn_blocking(move || {
            (inspector.local_interface(), super::get_local_hostname())
        })
        .await
        .ok()?;

        let interface = interface?;
        Some(DiscoveredHost {
            ip: interface.ip,
            mac: interface.mac,
            hostname,
            seen_at: Utc::now(),
            is_local: true,
        })
    }
}

/// Usable host addresses of an IPv4 CIDR range. Network and broadcast
/// addresses are skipped except on /31 and /32.
pub fn expand_range(range: &str) -> Result<Vec<Ipv4Addr>> {
    let network: Ipv4Network = range
        .trim()
        .parse()
        .map_err(|_| Error::InvalidRange(range.to_string()))?;

    let prefix = network.prefix();
    if prefix < MIN_PREFIX {
        return Err(Error::InvalidRange(format!(
            "{} (prefix shorter than /{})",
            range, MIN_PREFIX
        )));
    }

    let first = u32::from(network.network());
    let last = u32::from(network.broadcast());
    let hosts = if prefix >= 31 {
        (first..=last).map(Ipv4Addr::from).collect()
    } else {
        (first + 1..last).map(Ipv4Addr::from).collect()
    };
    Ok(hosts)
}

/// Fold the local entry into the swept hosts and drop duplicate hardware
/// addresses, keeping the lowest address for each. Hosts without a hardware
/// address never survive.
fn merge_results(
    mut hosts: Vec<DiscoveredHost>,
    local: Option<DiscoveredHost>,
) -> Vec<DiscoveredHost> {
    if let Some(local) = local {
        match hosts.iter_mut().find(|h| h.ip == local.ip) {
            Some(existing) => {
                existing.is_local = true;
                if existing.hostname.is_none() {
                    existing.hostname = local.hostname;
                }
            }
            None => hosts.push(local),
        }
    }

    hosts.sort_by_key(|h| h.ip);
    let mut seen = HashSet::new();
    hosts.retain(|h| h.mac.is_some_and(|mac| seen.insert(mac)));
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacAddress;

    fn host(ip: [u8; 4], mac: Option<u8>) -> DiscoveredHost {
        DiscoveredHost {
            ip: Ipv4Addr::from(ip),
            mac: mac.map(|last| MacAddress::new([2, 0, 0, 0, 0, last])),
            hostname: None,
            seen_at: Utc::now(),
            is_local: false,
        }
    }

    #[test]
    fn expands_usable_hosts() {
        let hosts = expand_range("192.168.1.0/24").unwrap();
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts[0], Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(hosts[253], Ipv4Addr::new(192, 168, 1, 254));

        assert_eq!(expand_range("10.0.0.8/30").unwrap().len(), 2);
        assert_eq!(expand_range("10.0.0.8/31").unwrap().len(), 2);
        assert_eq!(
            expand_range("10.0.0.9/32").unwrap(),
            vec![Ipv4Addr::new(10, 0, 0, 9)]
        );
    }

    #[test]
    fn rejects_bad_ranges() {
        assert!(matches!(expand_range("not-a-range"), Err(Error::InvalidRange(_))));
        assert!(matches!(expand_range("10.0.0.0/8"), Err(Error::InvalidRange(_))));
        assert!(expand_range("10.0.0.0/33").is_err());
        assert_eq!(expand_range("172.16.0.0/16").unwrap().len(), 65534);
    }

    #[test]
    fn local_entry_deduplicated_by_address() {
        let mut local = host([10, 0, 0, 5], Some(9));
        local.is_local = true;
        local.hostname = Some("workstation".into());

        let merged = merge_results(vec![host([10, 0, 0, 5], Some(5))], Some(local.clone()));
        assert_eq!(merged.len(), 1);
        assert!(merged[0].is_local);
        assert_eq!(merged[0].mac, Some(MacAddress::new([2, 0, 0, 0, 0, 5])));
        assert_eq!(merged[0].hostname.as_deref(), Some("workstation"));

        let merged = merge_results(vec![host([10, 0, 0, 1], Some(1))], Some(local));
        assert_eq!(merged.len(), 2);
        assert!(merged[1].is_local);
    }

    #[test]
    fn never_two_entries_per_hardware_address() {
        let merged = merge_results(
            vec![
                host([10, 0, 0, 7], Some(1)),
                host([10, 0, 0, 3], Some(1)),
                host([10, 0, 0, 4], None),
            ],
            None,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].ip, Ipv4Addr::new(10, 0, 0, 3));
    }
}
