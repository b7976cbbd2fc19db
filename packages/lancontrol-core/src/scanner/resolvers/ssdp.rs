//! UPnP/SSDP friendly-name lookup.
//!
//! Multicasts an M-SEARCH, keeps the first response coming from the target
//! address, then fetches the device description behind its `LOCATION` header
//! and pulls out `<friendlyName>`.

use super::NameResolver;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

const SSDP_ADDR: SocketAddr = SocketAddr::V4(std::net::SocketAddrV4::new(
    Ipv4Addr::new(239, 255, 255, 250),
    1900,
));

const M_SEARCH: &[u8] = b"M-SEARCH * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
MAN: \"ssdp:discover\"\r\n\
MX: 1\r\n\
ST: ssdp:all\r\n\r\n";

#[derive(Debug, Clone)]
pub struct Ssdp {
    timeout: Duration,
    client: reqwest::Client,
}

impl Default for Ssdp {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NameResolver for Ssdp {
    fn name(&self) -> &'static str {
        "ssdp"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn resolve(&self, ip: Ipv4Addr) -> Option<String> {
        tokio::time::timeout(self.timeout, self.lookup(ip))
            .await
            .ok()
            .flatten()
    }
}

impl Ssdp {
    async fn lookup(&self, ip: Ipv4Addr) -> Option<String> {
        let location = discover_location(ip).await?;
        tracing::debug!("SSDP: {} described at {}", ip, location);

        let body = self
            .client
            .get(&location)
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?
            .text()
            .await
            .ok()?;
        extract_friendly_name(&body)
    }
}

async fn discover_location(ip: Ipv4Addr) -> Option<String> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.ok()?;
    socket.send_to(M_SEARCH, SSDP_ADDR).await.ok()?;

    let mut buf = [0u8; 2048];
    loop {
        let (len, from) = socket.recv_from(&mut buf).await.ok()?;
        if from.ip() != ip {
            continue;
        }
        if let Some(location) = parse_location(&String::from_utf8_lossy(&buf[..len])) {
            return Some(location);
        }
    }
}

/// `LOCATION` header of an SSDP response, matched case-insensitively.
fn parse_location(response: &str) -> Option<String> {
    response
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("location"))
        .map(|(_, value)| value.trim().to_string())
        .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
}

/// Text of the first `<friendlyName>` element. Plain string search; the
/// description documents are too varied to be worth a real XML parser.
fn extract_friendly_name(xml: &str) -> Option<String> {
    const OPEN: &str = "<friendlyName>";
    const CLOSE: &str = "</friendlyName>";

    let start = xml.find(OPEN)? + OPEN.len();
    let end = start + xml[start..].find(CLOSE)?;
    let name = xml[start..end].trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_header_any_case() {
        let response = "HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age=1800\r\n\
Location: http://192.168.1.30:49152/description.xml\r\n\
ST: upnp:rootdevice\r\n\r\n";
        assert_eq!(
            parse_location(response).as_deref(),
            Some("http://192.168.1.30:49152/description.xml")
        );
        assert_eq!(parse_location("HTTP/1.1 200 OK\r\nST: ssdp:all\r\n"), None);
    }

    #[test]
    fn friendly_name_extraction() {
        let xml = r#"<?xml version="1.0"?>
<root><device><deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
<friendlyName> Living Room TV </friendlyName><manufacturer>Acme</manufacturer></device></root>"#;
        assert_eq!(extract_friendly_name(xml).as_deref(), Some("Living Room TV"));
        assert_eq!(extract_friendly_name("<root><friendlyName></friendlyName></root>"), None);
        assert_eq!(extract_friendly_name("<root/>"), None);
    }

    #[test]
    fn search_request_shape() {
        let text = std::str::from_utf8(M_SEARCH).unwrap();
        assert!(text.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(text.contains("MAN: \"ssdp:discover\""));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
