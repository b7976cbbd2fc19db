//! Liveness re-checks for devices already in the store.

use super::ping::ReachabilityProbe;
use crate::model::{Device, DeviceId};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_POLL_CONCURRENCY: usize = 20;

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOutcome {
    pub online: bool,
    pub checked_at: DateTime<Utc>,
    /// Why the device was not probed, if it wasn't.
    pub message: Option<String>,
}

/// Probes known addresses only; no identity resolution.
#[derive(Clone)]
pub struct LivenessPoller {
    probe: Arc<dyn ReachabilityProbe>,
    concurrency: usize,
    timeout: Duration,
}

impl LivenessPoller {
    pub fn new(probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self {
            probe,
            concurrency: DEFAULT_POLL_CONCURRENCY,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probe one device. A device without an address is offline.
    pub async fn check(&self, device: &Device) -> PollOutcome {
        match device.ip {
            Some(ip) => PollOutcome {
                online: self.probe.probe(ip, self.timeout).await,
                checked_at: Utc::now(),
                message: None,
            },
            None => PollOutcome {
                online: false,
                checked_at: Utc::now(),
                message: Some("No IP address".to_string()),
            },
        }
    }

    pub async fn poll(&self, devices: &[Device]) -> HashMap<DeviceId, PollOutcome> {
        let checks = devices
            .iter()
            .map(|device| async move { (device.id, self.check(device).await) })
            .collect::<Vec<_>>();

        let results: HashMap<_, _> = stream::iter(checks)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let online = results.values().filter(|o| o.online).count();
        tracing::debug!("Polled {} devices, {} online", results.len(), online);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::MacAddress;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;

    struct EvenHostsUp;

    #[async_trait]
    impl ReachabilityProbe for EvenHostsUp {
        async fn probe(&self, ip: Ipv4Addr, _timeout: Duration) -> bool {
            ip.octets()[3] % 2 == 0
        }
    }

    fn device(id: DeviceId, ip: Option<[u8; 4]>) -> Device {
        Device {
            id,
            mac: MacAddress::new([2, 0, 0, 0, 0, id as u8]),
            ip: ip.map(Ipv4Addr::from),
            hostname: None,
            nickname: None,
            group: None,
            is_favorite: false,
            is_manual: false,
            is_local: false,
            last_seen: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn reports_every_device() {
        let poller = LivenessPoller::new(Arc::new(EvenHostsUp)).with_concurrency(2);
        let devices = [
            device(1, Some([10, 0, 0, 2])),
            device(2, Some([10, 0, 0, 3])),
            device(3, None),
        ];

        let results = poller.poll(&devices).await;
        assert_eq!(results.len(), 3);
        assert!(results[&1].online);
        assert!(!results[&2].online);
        assert_eq!(results[&2].message, None);
        assert!(!results[&3].online);
        assert_eq!(results[&3].message.as_deref(), Some("No IP address"));
    }

    #[tokio::test]
    async fn empty_input() {
        let poller = LivenessPoller::new(Arc::new(EvenHostsUp));
        assert!(poller.poll(&[]).await.is_empty());
    }
}
