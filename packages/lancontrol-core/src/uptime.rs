//! Availability derived from recorded status transitions.

use crate::model::{DeviceStatus, StatusEvent};
use chrono::{DateTime, Utc};

/// Default look-back for uptime figures.
pub const DEFAULT_UPTIME_DAYS: u32 = 7;

/// Share of the window `[since, now]` a device spent online, in percent.
///
/// Time before the first event inside the window counts as offline, since
/// nothing was recorded for it. The last event holds until `now`. Returns
/// `None` when the window holds no events.
pub fn uptime_percentage(
    events: &[StatusEvent],
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<f64> {
    let mut events: Vec<&StatusEvent> = events
        .iter()
        .filter(|e| e.timestamp >= since && e.timestamp <= now)
        .collect();
    if events.is_empty() {
        return None;
    }
    events.sort_by_key(|e| e.timestamp);

    let total = (now - since).num_milliseconds();
    if total <= 0 {
        return Some(0.0);
    }

    let online: i64 = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.status == DeviceStatus::Online)
        .map(|(i, e)| {
            let until = events.get(i + 1).map_or(now, |next| next.timestamp);
            (until - e.timestamp).num_milliseconds()
        })
        .sum();

    Some(online as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(status: DeviceStatus, at: DateTime<Utc>) -> StatusEvent {
        StatusEvent {
            device_id: 1,
            status,
            timestamp: at,
        }
    }

    #[test]
    fn no_events_is_unknown() {
        let now = Utc::now();
        assert_eq!(uptime_percentage(&[], now - Duration::days(7), now), None);
    }

    #[test]
    fn online_spans_are_summed() {
        let now = Utc::now();
        let since = now - Duration::hours(10);
        let events = [
            event(DeviceStatus::Offline, since + Duration::hours(6)),
            event(DeviceStatus::Online, since),
            event(DeviceStatus::Online, since + Duration::hours(8)),
        ];
        // 0h..6h online, 6h..8h offline, 8h..10h online
        let pct = uptime_percentage(&events, since, now).unwrap();
        assert!((pct - 80.0).abs() < 1e-9);
    }

    #[test]
    fn unrecorded_lead_in_counts_as_offline() {
        let now = Utc::now();
        let since = now - Duration::hours(4);
        let events = [
            event(DeviceStatus::Online, since - Duration::hours(1)),
            event(DeviceStatus::Online, since + Duration::hours(3)),
        ];
        let pct = uptime_percentage(&events, since, now).unwrap();
        assert!((pct - 25.0).abs() < 1e-9);
    }
}
