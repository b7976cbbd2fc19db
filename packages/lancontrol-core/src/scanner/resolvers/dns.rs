//! Reverse DNS through the system resolver.

use super::{NameResolver, clean_hostname};
use async_trait::async_trait;
use dns_lookup::lookup_addr;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReverseDns {
    timeout: Duration,
}

impl Default for ReverseDns {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
        }
    }
}

#[async_trait]
impl NameResolver for ReverseDns {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn resolve(&self, ip: Ipv4Addr) -> Option<String> {
        // getnameinfo blocks, so it runs on the blocking pool
        let lookup = tokio::task::spawn_blocking(move || lookup_addr(&IpAddr::V4(ip)));
        let hostname = match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(Ok(hostname))) => hostname,
            _ => return None,
        };

        // Resolvers echo the address back when there is no PTR record
        if hostname == ip.to_string() {
            return None;
        }
        clean_hostname(&hostname)
    }
}
