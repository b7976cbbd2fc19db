//! Alert mail composition and SMTP delivery.

use super::NotifyError;
use crate::config::MailSettings;
use crate::model::{AlertEvent, Device, Severity};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Subject, plain-text body and HTML body of an alert mail.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#dc2626",
        Severity::Warning => "#f59e0b",
        Severity::Info => "#3b82f6",
    }
}

/// Escape text for an HTML body. Device names come off the network.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn compose(alert: &AlertEvent, device: &Device) -> AlertMail {
    let name = device.display_name();
    let ip = device
        .ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let title = alert.kind.title();
    let severity = alert.severity.as_str().to_uppercase();
    let time = alert.created_at.format("%Y-%m-%d %H:%M:%S");

    let text = format!(
        "LANControl Alert\n\n\
         Device: {name}\n\
         IP: {ip}\n\
         MAC: {mac}\n\
         Alert Type: {title}\n\
         Severity: {severity}\n\
         Time: {time}\n\n\
         Message: {message}\n\n\
         ---\n\
         This is an automated alert from LANControl",
        mac = device.mac,
        message = alert.message,
    );

    let html = format!(
        r#"<html>
<body style="font-family: Arial, sans-serif; padding: 20px;">
  <h2 style="color: {color};">LANControl Alert</h2>
  <table style="border-collapse: collapse; width: 100%; max-width: 600px;">
    <tr><td style="padding: 8px; font-weight: bold;">Device:</td><td style="padding: 8px;">{name}</td></tr>
    <tr><td style="padding: 8px; font-weight: bold;">IP:</td><td style="padding: 8px;">{ip}</td></tr>
    <tr><td style="padding: 8px; font-weight: bold;">MAC:</td><td style="padding: 8px;">{mac}</td></tr>
    <tr><td style="padding: 8px; font-weight: bold;">Alert Type:</td><td style="padding: 8px;">{title}</td></tr>
    <tr><td style="padding: 8px; font-weight: bold;">Severity:</td><td style="padding: 8px; color: {color};">{severity}</td></tr>
    <tr><td style="padding: 8px; font-weight: bold;">Time:</td><td style="padding: 8px;">{time}</td></tr>
  </table>
  <p style="margin-top: 20px; padding: 15px; background-color: #f3f4f6; border-left: 4px solid {color};">{message}</p>
  <hr style="margin-top: 30px;">
  <p style="color: #6b7280; font-size: 12px;">This is an automated alert from LANControl</p>
</body>
</html>"#,
        name = escape_html(&name),
        color = severity_color(alert.severity),
        mac = device.mac,
        message = escape_html(&alert.message),
    );

    AlertMail {
        subject: format!("LANControl Alert: {}", title),
        text,
        html,
    }
}

/// Send one alert mail over STARTTLS with the configured credentials.
pub async fn send_alert_email(
    mail: &MailSettings,
    alert: &AlertEvent,
    device: &Device,
) -> Result<(), NotifyError> {
    let (Some(server), Some(username), Some(password), Some(recipient), Some(sender)) = (
        mail.smtp_server.as_deref(),
        mail.smtp_username.as_deref(),
        mail.smtp_password.as_deref(),
        mail.alert_email.as_deref(),
        mail.sender(),
    ) else {
        return Err(NotifyError::Incomplete);
    };

    let content = compose(alert, device);
    let message = Message::builder()
        .from(sender.parse::<Mailbox>()?)
        .to(recipient.parse::<Mailbox>()?)
        .subject(content.subject)
        .multipart(MultiPart::alternative_plain_html(content.text, content.html))
        .map_err(|e| NotifyError::Build(e.to_string()))?;

    let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server)?
        .port(mail.smtp_port)
        .credentials(Credentials::new(username.to_string(), password.to_string()))
        .timeout(Some(SMTP_TIMEOUT))
        .build();

    mailer.send(message).await?;
    tracing::debug!("Alert mail for alert {} delivered to {}", alert.id, recipient);
    Ok(())
}
