//! TCP port probing and device-type fingerprinting.

use crate::model::{PortFinding, PortState, Protocol};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub const DEFAULT_PORT_CONCURRENCY: usize = 50;

pub const BANNER_TIMEOUT: Duration = Duration::from_secs(2);

const BANNER_MAX_BYTES: usize = 1024;

/// Minimum fraction of a signature's ports that must be open.
const SIGNATURE_THRESHOLD: f64 = 0.5;

/// Well-known TCP services, ascending by port.
const SERVICE_TABLE: &[(u16, &str)] = &[
    (20, "FTP-Data"),
    (21, "FTP"),
    (22, "SSH"),
    (23, "Telnet"),
    (25, "SMTP"),
    (53, "DNS"),
    (80, "HTTP"),
    (110, "POP3"),
    (135, "MSRPC"),
    (139, "NetBIOS-SSN"),
    (143, "IMAP"),
    (443, "HTTPS"),
    (445, "SMB"),
    (548, "AFP"),
    (554, "RTSP"),
    (631, "IPP/CUPS"),
    (993, "IMAPS"),
    (995, "POP3S"),
    (1433, "MSSQL"),
    (1883, "MQTT"),
    (3306, "MySQL"),
    (3389, "RDP"),
    (5000, "UPnP/Flask"),
    (5432, "PostgreSQL"),
    (5900, "VNC"),
    (6379, "Redis"),
    (8000, "HTTP-Alt"),
    (8080, "HTTP-Alt"),
    (8096, "Jellyfin"),
    (8443, "HTTPS-Alt"),
    (8883, "MQTT-SSL"),
    (9000, "SonarQube"),
    (9100, "JetDirect"),
    (27017, "MongoDB"),
    (32400, "Plex"),
    (32469, "Plex-DLNA"),
];

const QUICK_PORTS: [u16; 16] = [
    21, 22, 23, 25, 80, 110, 143, 443, 445, 3306, 3389, 5432, 5900, 8080, 8443, 27017,
];

/// Service label for a port, "Unknown" when unlisted.
pub fn service_name(port: u16) -> &'static str {
    SERVICE_TABLE
        .binary_search_by_key(&port, |&(p, _)| p)
        .map(|idx| SERVICE_TABLE[idx].1)
        .unwrap_or("Unknown")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanPreset {
    #[default]
    Quick,
    Full,
}

impl ScanPreset {
    pub fn ports(&self) -> Vec<u16> {
        match self {
            ScanPreset::Quick => QUICK_PORTS.to_vec(),
            ScanPreset::Full => SERVICE_TABLE.iter().map(|&(port, _)| port).collect(),
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            ScanPreset::Quick => Duration::from_millis(500),
            ScanPreset::Full => Duration::from_secs(1),
        }
    }
}

/// Connect-probe `ports` on `ip`. Open ports come back ascending.
pub async fn probe_ports(
    ip: Ipv4Addr,
    ports: &[u16],
    timeout: Duration,
    concurrency: usize,
) -> Vec<PortFinding> {
    let unique: HashSet<u16> = ports.iter().copied().collect();

    let mut open: Vec<u16> = stream::iter(unique)
        .map(|port| async move {
            is_open(SocketAddr::from((ip, port)), timeout)
                .await
                .then_some(port)
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|port| async move { port })
        .collect()
        .await;
    open.sort_unstable();

    tracing::debug!("{}: {} of {} ports open", ip, open.len(), ports.len());

    open.into_iter()
        .map(|port| PortFinding {
            port,
            protocol: Protocol::Tcp,
            service: service_name(port).to_string(),
            state: PortState::Open,
        })
        .collect()
}

pub async fn probe_preset(ip: Ipv4Addr, preset: ScanPreset) -> Vec<PortFinding> {
    probe_ports(ip, &preset.ports(), preset.timeout(), DEFAULT_PORT_CONCURRENCY).await
}

async fn is_open(addr: SocketAddr, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Connect, send a CRLF and return whatever the service says first.
pub async fn grab_banner(ip: Ipv4Addr, port: u16, timeout: Duration) -> Option<String> {
    let exchange = async {
        let mut stream = TcpStream::connect(SocketAddr::from((ip, port))).await.ok()?;
        stream.write_all(b"\r\n").await.ok()?;
        let mut buf = vec![0u8; BANNER_MAX_BYTES];
        let len = stream.read(&mut buf).await.ok()?;
        let banner = String::from_utf8_lossy(&buf[..len]).trim().to_string();
        (!banner.is_empty()).then_some(banner)
    };

    tokio::time::timeout(timeout, exchange).await.ok().flatten()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Router,
    Nas,
    Printer,
    WebServer,
    Database,
    IotDevice,
    MediaServer,
    SshServer,
    WindowsPc,
    RaspberryPi,
    Camera,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Router => "router",
            DeviceType::Nas => "nas",
            DeviceType::Printer => "printer",
            DeviceType::WebServer => "web_server",
            DeviceType::Database => "database",
            DeviceType::IotDevice => "iot_device",
            DeviceType::MediaServer => "media_server",
            DeviceType::SshServer => "ssh_server",
            DeviceType::WindowsPc => "windows_pc",
            DeviceType::RaspberryPi => "raspberry_pi",
            DeviceType::Camera => "camera",
            DeviceType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluated in this order; earlier entries win ties.
const SIGNATURES: &[(DeviceType, &[u16])] = &[
    (DeviceType::Router, &[80, 443, 53]),
    (DeviceType::Nas, &[80, 443, 445, 548, 22]),
    (DeviceType::Printer, &[631, 9100, 80]),
    (DeviceType::WebServer, &[80, 443]),
    (DeviceType::Database, &[3306, 5432, 27017]),
    (DeviceType::IotDevice, &[1883, 8883, 80]),
    (DeviceType::MediaServer, &[32400, 8096, 32469]),
    (DeviceType::SshServer, &[22]),
    (DeviceType::WindowsPc, &[445, 3389, 135]),
    (DeviceType::RaspberryPi, &[22, 80]),
    (DeviceType::Camera, &[80, 554, 8000]),
];

/// Best-matching signature for a set of open ports.
pub fn classify_device_type(open_ports: &[u16]) -> DeviceType {
    let open: HashSet<u16> = open_ports.iter().copied().collect();

    let mut best: Option<(DeviceType, f64)> = None;
    for &(device_type, ports) in SIGNATURES {
        let matches = ports.iter().filter(|&p| open.contains(p)).count();
        if matches == 0 {
            continue;
        }
        let score = matches as f64 / ports.len() as f64;
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((device_type, score));
        }
    }

    match best {
        Some((device_type, score)) if score >= SIGNATURE_THRESHOLD => device_type,
        _ if open.contains(&22) && !open.contains(&80) => DeviceType::SshServer,
        _ if open.contains(&80) || open.contains(&443) => DeviceType::WebServer,
        _ if open.contains(&445) => DeviceType::WindowsPc,
        _ => DeviceType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn service_labels() {
        assert_eq!(service_name(22), "SSH");
        assert_eq!(service_name(631), "IPP/CUPS");
        assert_eq!(service_name(32469), "Plex-DLNA");
        assert_eq!(service_name(12345), "Unknown");
    }

    #[test]
    fn service_table_is_sorted() {
        assert!(SERVICE_TABLE.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn presets() {
        assert_eq!(ScanPreset::Quick.ports().len(), 16);
        assert!(ScanPreset::Quick.ports().iter().all(|&p| service_name(p) != "Unknown"));
        assert_eq!(ScanPreset::Full.ports().len(), SERVICE_TABLE.len());
        assert!(ScanPreset::Quick.timeout() < ScanPreset::Full.timeout());
    }

    #[test]
    fn signature_matches() {
        assert_eq!(classify_device_type(&[80, 443, 53]), DeviceType::Router);
        assert_eq!(classify_device_type(&[3306]), DeviceType::Unknown);
        assert_eq!(classify_device_type(&[3306, 5432]), DeviceType::Database);
        assert_eq!(classify_device_type(&[32400, 8096]), DeviceType::MediaServer);
        assert_eq!(classify_device_type(&[631, 9100]), DeviceType::Printer);
        assert_eq!(classify_device_type(&[554, 8000]), DeviceType::Camera);
    }

    #[test]
    fn ties_go_to_the_earlier_signature() {
        // web_server and raspberry_pi both score 0.5; web_server comes first
        assert_eq!(classify_device_type(&[80]), DeviceType::WebServer);
        assert_eq!(classify_device_type(&[80, 443]), DeviceType::WebServer);
        // ssh_server reaches 1.0 before raspberry_pi is considered
        assert_eq!(classify_device_type(&[22, 80]), DeviceType::SshServer);
    }

    #[test]
    fn single_port_fallbacks() {
        assert_eq!(classify_device_type(&[22]), DeviceType::SshServer);
        assert_eq!(classify_device_type(&[445]), DeviceType::WindowsPc);
        assert_eq!(classify_device_type(&[]), DeviceType::Unknown);
        assert_eq!(classify_device_type(&[25, 110]), DeviceType::Unknown);
    }

    #[test]
    fn classification_ignores_order_and_duplicates() {
        let a = classify_device_type(&[445, 3389, 22]);
        let b = classify_device_type(&[22, 3389, 445, 445]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn finds_listening_port() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = {
            let l = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
            l.local_addr().unwrap().port()
        };

        let findings = probe_ports(
            Ipv4Addr::LOCALHOST,
            &[closed, open, open],
            Duration::from_millis(500),
            4,
        )
        .await;

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].port, open);
        assert_eq!(findings[0].state, PortState::Open);
        assert_eq!(findings[0].protocol, Protocol::Tcp);
    }

    #[tokio::test]
    async fn reads_service_banner() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();
        });

        let banner = grab_banner(Ipv4Addr::LOCALHOST, port, BANNER_TIMEOUT).await;
        assert_eq!(banner.as_deref(), Some("SSH-2.0-OpenSSH_9.6"));
    }
}
