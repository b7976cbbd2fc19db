//! JSON webhook delivery for alerts.

use super::NotifyError;
use crate::model::{AlertEvent, Device, DeviceStatus};
use serde_json::{json, Value};
use std::time::Duration;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Status to report with the alert. A status-change alert carries the status
/// it was raised for; anything else falls back to the liveness window.
fn reported_status(alert: &AlertEvent, device: &Device) -> DeviceStatus {
    alert
        .metadata
        .as_ref()
        .and_then(|m| m.get("new_status"))
        .and_then(|s| serde_json::from_value(s.clone()).ok())
        .unwrap_or_else(|| device.status())
}

/// JSON body posted for an alert.
pub fn payload(alert: &AlertEvent, device: &Device) -> Value {
    let mut body = json!({
        "alert_id": alert.id,
        "alert_type": alert.kind.as_str(),
        "severity": alert.severity.as_str(),
        "message": alert.message,
        "timestamp": alert.created_at.to_rfc3339(),
        "device": {
            "id": device.id,
            "name": device.display_name(),
            "ip": device.ip.map(|ip| ip.to_string()),
            "mac": device.mac.to_string(),
            "vendor": device.vendor(),
            "status": reported_status(alert, device).to_string(),
        },
    });

    if let (Some(metadata), Some(obj)) = (&alert.metadata, body.as_object_mut()) {
        obj.insert("metadata".to_string(), metadata.clone());
    }
    body
}

/// Posts alert payloads. A single attempt; callers log failures.
#[derive(Debug, Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new() -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .user_agent(concat!("lancontrol/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub async fn send(&self, url: &str, alert: &AlertEvent, device: &Device) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url)
            .json(&payload(alert, device))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(NotifyError::HttpStatus(status.as_u16()));
        }

        tracing::debug!("Webhook {} accepted alert {} ({})", url, alert.id, status);
        Ok(())
    }
}
