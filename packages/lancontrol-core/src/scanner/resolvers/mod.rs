//! Hostname resolution strategies, tried in priority order.

mod dns;
mod mdns;
mod netbios;
mod ssdp;

pub use dns::ReverseDns;
pub use mdns::Mdns;
pub use netbios::NetBios;
pub use ssdp::Ssdp;

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

/// One way of turning an address into a name. Failures of any kind are
/// `None` so the next strategy gets a turn.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// Budget for a single `resolve` call.
    fn timeout(&self) -> Duration;

    async fn resolve(&self, ip: Ipv4Addr) -> Option<String>;
}

/// Reverse DNS, then mDNS, then SSDP, then NetBIOS.
pub fn default_chain() -> Vec<Arc<dyn NameResolver>> {
    vec![
        Arc::new(ReverseDns::default()),
        Arc::new(Mdns::default()),
        Arc::new(Ssdp::default()),
        Arc::new(NetBios::default()),
    ]
}

/// Local-network suffixes dropped from resolved names.
const LOCAL_SUFFIXES: [&str; 4] = [".local", ".lan", ".home", ".localdomain"];

/// Trim whitespace, a trailing root dot and one local-domain suffix.
pub(crate) fn clean_hostname(raw: &str) -> Option<String> {
    let name = raw.trim().trim_end_matches('.');
    let lower = name.to_ascii_lowercase();
    let name = LOCAL_SUFFIXES
        .iter()
        .find(|suffix| lower.ends_with(*suffix) && lower.len() > suffix.len())
        .map(|suffix| &name[..name.len() - suffix.len()])
        .unwrap_or(name);

    (!name.is_empty()).then(|| name.to_string())
}
