use chrono::serde::{ts_milliseconds, ts_milliseconds_option};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One normalized record from the inventory feed.
#[derive(Debug, Clone, PartialEq)]
pub struct PickupObservation {
    pub item_id: String,
    /// `None` when the feed carried no usable ready time.
    pub hang_timestamp: Option<DateTime<Utc>>,
    pub picked: bool,
}

/// Local tracking state for an item that is ready for collection.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PickupTrackItem {
    pub item_id: String,
    #[serde(with = "ts_milliseconds")]
    pub hang_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub picked: bool,
    #[serde(with = "ts_milliseconds")]
    pub first_seen_at: DateTime<Utc>,
    #[serde(default, with = "ts_milliseconds_option")]
    pub last_notified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notified_count: u32,
}

impl PickupTrackItem {
    /// Seeds tracking for an item seen for the first time.
    pub fn seed(observation: &PickupObservation, now: DateTime<Utc>) -> Self {
        Self {
            item_id: observation.item_id.clone(),
            hang_timestamp: observation.hang_timestamp.unwrap_or(now),
            picked: observation.picked,
            first_seen_at: now,
            last_notified_at: None,
            notified_count: 0,
        }
    }

    /// Folds a fresh observation into the record, keeping notification history.
    pub fn observe(&mut self, observation: &PickupObservation) {
        if let Some(hang) = observation.hang_timestamp {
            self.hang_timestamp = hang;
        }
        self.picked = observation.picked;
    }

    pub fn is_due(&self, now: DateTime<Utc>, threshold: Duration, repeat: Duration) -> bool {
        if self.picked || now - self.hang_timestamp < threshold {
            return false;
        }
        match self.last_notified_at {
            None => true,
            Some(last) => now - last >= repeat,
        }
    }

    pub fn record_notification(&mut self, now: DateTime<Utc>) {
        self.last_notified_at = Some(now);
        self.notified_count += 1;
    }

    pub fn waiting_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.hang_timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 2, 9, 0, 0).unwrap()
    }

    fn observation(hang: Option<DateTime<Utc>>, picked: bool) -> PickupObservation {
        PickupObservation {
            item_id: "R-1".to_string(),
            hang_timestamp: hang,
            picked,
        }
    }

    #[test]
    fn test_seed_falls_back_to_first_seen() {
        let item = PickupTrackItem::seed(&observation(None, false), now());
        assert_eq!(item.hang_timestamp, now());
        assert_eq!(item.first_seen_at, now());
        assert_eq!(item.notified_count, 0);
    }

    #[test]
    fn test_threshold_and_repeat_gate() {
        let threshold = Duration::minutes(10);
        let repeat = Duration::minutes(120);
        let hang = now() - Duration::minutes(9);
        let mut item = PickupTrackItem::seed(&observation(Some(hang), false), now());
        assert!(!item.is_due(now(), threshold, repeat));

        let first = now() + Duration::minutes(2);
        assert!(item.is_due(first, threshold, repeat));
        item.record_notification(first);

        assert!(!item.is_due(first + Duration::minutes(30), threshold, repeat));
        assert!(item.is_due(first + Duration::minutes(120), threshold, repeat));
    }

    #[test]
    fn test_observe_keeps_history() {
        let mut item = PickupTrackItem::seed(&observation(Some(now()), false), now());
        item.record_notification(now());
        item.observe(&observation(None, true));
        assert!(item.picked);
        assert_eq!(item.notified_count, 1);
        assert_eq!(item.hang_timestamp, now());
        assert!(!item.is_due(now() + Duration::days(1), Duration::zero(), Duration::zero()));
    }
}
