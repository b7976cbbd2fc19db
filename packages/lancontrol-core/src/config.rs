use crate::model::AlertRule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Default sweep range when nothing is configured
pub const DEFAULT_SCAN_RANGE: &str = "192.168.1.0/24";

/// Environment variable overriding the sweep range
const ENV_SCAN_RANGE: &str = "LANCONTROL_SCAN_RANGE";

/// Environment variable overriding the sweep interval (seconds)
const ENV_SCAN_INTERVAL: &str = "LANCONTROL_SCAN_INTERVAL";

/// Environment variable carrying the SMTP password, kept out of the config file
const ENV_SMTP_PASSWORD: &str = "LANCONTROL_SMTP_PASSWORD";

/// Runtime settings for the scanner, scheduler and notification channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// CIDR range swept by full scans (e.g., "192.168.1.0/24")
    pub scan_range: String,
    /// Run the periodic sweep and status poll
    pub auto_scan: bool,
    pub scan_interval_secs: u64,
    pub status_check_interval_secs: u64,
    /// Daemon traffic sampling period; 0 leaves sampling to the CLI
    pub traffic_interval_secs: u64,
    /// Status history and traffic samples older than this is deleted by the cleanup job
    pub history_retention_days: u32,
    pub sweep_concurrency: usize,
    pub poll_concurrency: usize,
    /// Newly opened ports that escalate a port-change alert to a warning
    pub sensitive_ports: Vec<u16>,
    /// Destination for wake-on-LAN packets
    pub wol_broadcast: Ipv4Addr,
    pub mail: MailSettings,
    pub alert_rules: Vec<AlertRule>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scan_range: DEFAULT_SCAN_RANGE.to_string(),
            auto_scan: true,
            scan_interval_secs: 300,
            status_check_interval_secs: 120,
            traffic_interval_secs: 0,
            history_retention_days: 30,
            sweep_concurrency: 50,
            poll_concurrency: 20,
            sensitive_ports: vec![21, 23, 3389],
            wol_broadcast: Ipv4Addr::BROADCAST,
            mail: MailSettings::default(),
            alert_rules: Vec::new(),
        }
    }
}

/// Outbound mail settings for e-mail alerts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub smtp_server: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    /// Sender address; falls back to the username
    pub smtp_from: Option<String>,
    /// Recipient of alert e-mails
    pub alert_email: Option<String>,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            smtp_server: None,
            smtp_port: 587,
            smtp_username: None,
            smtp_password: None,
            smtp_from: None,
            alert_email: None,
        }
    }
}

impl MailSettings {
    /// Server, credentials and recipient are all present and non-empty
    pub fn is_complete(&self) -> bool {
        [
            &self.smtp_server,
            &self.smtp_username,
            &self.smtp_password,
            &self.alert_email,
        ]
        .iter()
        .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }

    pub fn sender(&self) -> Option<&str> {
        self.smtp_from
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.smtp_username.as_deref())
    }
}

/// Where the configuration came from
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigSource {
    /// Using default hardcoded values
    Default,
    /// Loaded from config file
    ConfigFile,
    /// Config file or defaults, with environment overrides applied
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::ConfigFile => write!(f, "config file"),
            ConfigSource::Environment => write!(f, "environment variable"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: Settings,
    pub source: ConfigSource,
}

/// Get the path to the configuration file
pub fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("lancontrol").join("config.toml"))
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/lancontrol/config.toml".to_string())
}

/// Parse settings from TOML. Missing keys take their defaults.
pub fn parse_settings(content: &str) -> Result<Settings, toml::de::Error> {
    toml::from_str(content)
}

/// Load settings from a config file, if it exists and parses
fn load_config_file(path: &Path) -> Option<Settings> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match parse_settings(&content) {
            Ok(settings) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(settings)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Apply environment overrides. Returns true if any override was used.
fn apply_overrides(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) -> bool {
    let mut applied = false;

    if let Some(range) = var(ENV_SCAN_RANGE).map(|r| r.trim().to_string()) {
        if !range.is_empty() {
            tracing::info!("Using scan range from environment variable: {}", range);
            settings.scan_range = range;
            applied = true;
        }
    }

    if let Some(raw) = var(ENV_SCAN_INTERVAL) {
        match raw.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => {
                settings.scan_interval_secs = secs;
                applied = true;
            }
            _ => tracing::warn!("Ignoring invalid {}={:?}", ENV_SCAN_INTERVAL, raw),
        }
    }

    if let Some(password) = var(ENV_SMTP_PASSWORD).filter(|p| !p.is_empty()) {
        settings.mail.smtp_password = Some(password);
        applied = true;
    }

    applied
}

/// Load settings with priority:
/// 1. Environment variables (LANCONTROL_SCAN_RANGE, LANCONTROL_SCAN_INTERVAL, LANCONTROL_SMTP_PASSWORD)
/// 2. Config file (~/.config/lancontrol/config.toml)
/// 3. Default values
pub fn load_settings() -> LoadedSettings {
    load_settings_from(get_config_file_path().as_deref(), |key| std::env::var(key).ok())
}

fn load_settings_from(
    path: Option<&Path>,
    var: impl Fn(&str) -> Option<String>,
) -> LoadedSettings {
    let (mut settings, mut source) = match path.and_then(load_config_file) {
        Some(settings) => (settings, ConfigSource::ConfigFile),
        None => (Settings::default(), ConfigSource::Default),
    };

    if apply_overrides(&mut settings, var) {
        source = ConfigSource::Environment;
    }

    LoadedSettings { settings, source }
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# LANControl Configuration
# Place this file at: ~/.config/lancontrol/config.toml

scan_range = "192.168.1.0/24"
auto_scan = true
scan_interval_secs = 300
status_check_interval_secs = 120
# Sample the connection-tracking table every N seconds (0 = off, needs root)
traffic_interval_secs = 0
history_retention_days = 30
sweep_concurrency = 50
poll_concurrency = 20
# Newly opened ports that raise a warning instead of info
sensitive_ports = [21, 23, 3389]
wol_broadcast = "255.255.255.255"

[mail]
# smtp_server = "smtp.example.com"
# smtp_port = 587
# smtp_username = "alerts@example.com"
# smtp_password is best set via LANCONTROL_SMTP_PASSWORD
# alert_email = "you@example.com"

# [[alert_rules]]
# name = "Offline favorites"
# event = "device_offline"      # device_offline | device_online | new_device | port_change
# device_filter = "favorites"   # all | favorites | <group name>
# notify_email = true
# notify_webhook = true
# webhook_url = "https://hooks.example.com/lancontrol"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceFilter, RuleEvent};

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(parse_settings("").unwrap(), Settings::default());
    }

    #[test]
    fn example_config_parses() {
        let settings = parse_settings(&generate_example_config()).unwrap();
        assert_eq!(settings.sensitive_ports, vec![21, 23, 3389]);
        assert_eq!(settings.wol_broadcast, Ipv4Addr::BROADCAST);
        assert_eq!(settings.traffic_interval_secs, 0);
        assert!(settings.alert_rules.is_empty());
    }

    #[test]
    fn parses_rules_and_mail() {
        let settings = parse_settings(
            r#"
scan_range = "10.0.0.0/24"

[mail]
smtp_server = "smtp.example.com"
smtp_username = "bot@example.com"
smtp_password = "hunter2"
alert_email = "ops@example.com"

[[alert_rules]]
event = "port_change"
device_filter = "servers"
notify_webhook = true
webhook_url = "https://hooks.example.com/x"
"#,
        )
        .unwrap();

        assert_eq!(settings.scan_range, "10.0.0.0/24");
        assert_eq!(settings.mail.smtp_port, 587);
        assert!(settings.mail.is_complete());
        assert_eq!(settings.mail.sender(), Some("bot@example.com"));

        let rule = &settings.alert_rules[0];
        assert_eq!(rule.event, RuleEvent::PortChange);
        assert_eq!(rule.device_filter, DeviceFilter::Group("servers".into()));
        assert!(rule.enabled);
        assert!(!rule.notify_email);
    }

    #[test]
    fn incomplete_mail_settings() {
        let mut mail = MailSettings {
            smtp_server: Some("smtp.example.com".into()),
            smtp_username: Some("bot".into()),
            smtp_password: Some("pw".into()),
            ..MailSettings::default()
        };
        assert!(!mail.is_complete());
        mail.alert_email = Some("  ".into());
        assert!(!mail.is_complete());
        mail.alert_email = Some("ops@example.com".into());
        assert!(mail.is_complete());
    }

    #[test]
    fn environment_overrides_win() {
        let loaded = load_settings_from(None, |key| match key {
            ENV_SCAN_RANGE => Some("172.16.0.0/24".to_string()),
            ENV_SCAN_INTERVAL => Some("60".to_string()),
            _ => None,
        });
        assert_eq!(loaded.source, ConfigSource::Environment);
        assert_eq!(loaded.settings.scan_range, "172.16.0.0/24");
        assert_eq!(loaded.settings.scan_interval_secs, 60);
    }

    #[test]
    fn invalid_interval_override_is_ignored() {
        let loaded = load_settings_from(None, |key| {
            (key == ENV_SCAN_INTERVAL).then(|| "soon".to_string())
        });
        assert_eq!(loaded.source, ConfigSource::Default);
        assert_eq!(loaded.settings.scan_interval_secs, 300);
    }
}
