//! Hardware address and hostname resolution for a reachable address.

use super::inspector::{NetworkInspector, SystemNetworkInspector};
use super::ping::{ReachabilityProbe, SystemPing};
use super::resolvers::{self, NameResolver};
use crate::mac::MacAddress;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

/// Probe timeout used to refresh the neighbor table before a lookup.
const REFRESH_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    pub mac: Option<MacAddress>,
    pub hostname: Option<String>,
}

#[derive(Clone)]
pub struct IdentityResolver {
    probe: Arc<dyn ReachabilityProbe>,
    inspector: Arc<dyn NetworkInspector>,
    resolvers: Vec<Arc<dyn NameResolver>>,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(
            Arc::new(SystemPing),
            Arc::new(SystemNetworkInspector),
            resolvers::default_chain(),
        )
    }
}

impl IdentityResolver {
    pub fn new(
        probe: Arc<dyn ReachabilityProbe>,
        inspector: Arc<dyn NetworkInspector>,
        resolvers: Vec<Arc<dyn NameResolver>>,
    ) -> Self {
        Self {
            probe,
            inspector,
            resolvers,
        }
    }

    pub fn inspector(&self) -> &Arc<dyn NetworkInspector> {
        &self.inspector
    }

    /// Probe once so the neighbor table is fresh, then resolve both parts.
    pub async fn resolve(&self, ip: Ipv4Addr) -> Identity {
        self.probe.probe(ip, REFRESH_PROBE_TIMEOUT).await;
        Identity {
            mac: self.hardware_address(ip).await,
            hostname: self.hostname(ip).await,
        }
    }

    /// Neighbor-table entry for `ip`. Assumes the caller probed recently.
    pub async fn hardware_address(&self, ip: Ipv4Addr) -> Option<MacAddress> {
        let inspector = Arc::clone(&self.inspector);
        tokio::task::spawn_blocking(move || inspector.neighbor_entry(ip))
            .await
            .ok()
            .flatten()
    }

    /// First name any resolver in the chain produces.
    pub async fn hostname(&self, ip: Ipv4Addr) -> Option<String> {
        for resolver in &self.resolvers {
            match tokio::time::timeout(resolver.timeout(), resolver.resolve(ip)).await {
                Ok(Some(name)) => {
                    tracing::debug!("{} -> {} via {}", ip, name, resolver.name());
                    return Some(name);
                }
                Ok(None) => {}
                Err(_) => tracing::debug!("{} lookup for {} timed out", resolver.name(), ip),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::inspector::LocalInterface;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Unreachable;

    #[async_trait]
    impl ReachabilityProbe for Unreachable {
        async fn probe(&self, _ip: Ipv4Addr, _timeout: Duration) -> bool {
            false
        }
    }

    struct OneNeighbor;

    impl NetworkInspector for OneNeighbor {
        fn neighbor_entry(&self, ip: Ipv4Addr) -> Option<MacAddress> {
            (ip == Ipv4Addr::new(10, 0, 0, 2)).then(|| MacAddress::new([2, 0, 0, 0, 0, 2]))
        }

        fn default_gateway(&self) -> Option<Ipv4Addr> {
            None
        }

        fn local_interface(&self) -> Option<LocalInterface> {
            None
        }
    }

    struct Fixed {
        label: &'static str,
        answer: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(label: &'static str, answer: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                label,
                answer,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl NameResolver for Fixed {
        fn name(&self) -> &'static str {
            self.label
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(100)
        }

        async fn resolve(&self, _ip: Ipv4Addr) -> Option<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.map(String::from)
        }
    }

    struct Hangs;

    #[async_trait]
    impl NameResolver for Hangs {
        fn name(&self) -> &'static str {
            "hangs"
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(20)
        }

        async fn resolve(&self, _ip: Ipv4Addr) -> Option<String> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn first_successful_resolver_wins() {
        let dns = Fixed::new("dns", None);
        let mdns = Fixed::new("mdns", Some("kitchen-speaker"));
        let netbios = Fixed::new("netbios", Some("KITCHEN"));
        let resolver = IdentityResolver::new(
            Arc::new(Unreachable),
            Arc::new(OneNeighbor),
            vec![dns.clone(), mdns.clone(), netbios.clone()],
        );

        let identity = resolver.resolve(Ipv4Addr::new(10, 0, 0, 2)).await;
        assert_eq!(identity.mac, Some(MacAddress::new([2, 0, 0, 0, 0, 2])));
        assert_eq!(identity.hostname.as_deref(), Some("kitchen-speaker"));
        assert_eq!(dns.calls.load(Ordering::SeqCst), 1);
        assert_eq!(netbios.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_resolver_falls_through() {
        let resolver = IdentityResolver::new(
            Arc::new(Unreachable),
            Arc::new(OneNeighbor),
            vec![Arc::new(Hangs), Fixed::new("netbios", Some("NAS01"))],
        );
        assert_eq!(
            resolver.hostname(Ipv4Addr::new(10, 0, 0, 9)).await.as_deref(),
            Some("NAS01")
        );
    }

    #[tokio::test]
    async fn unknown_neighbor_has_no_hardware_address() {
        let resolver =
            IdentityResolver::new(Arc::new(Unreachable), Arc::new(OneNeighbor), Vec::new());
        let identity = resolver.resolve(Ipv4Addr::new(10, 0, 0, 3)).await;
        assert_eq!(identity, Identity::default());
    }
}
