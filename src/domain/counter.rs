use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Attributes, LimitType, PeriodType, fingerprint::Fingerprint};

/// Half-open UTC interval `[start, end)` a periodic counter accumulates over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Fingerprint of one (limit, window) pair.
pub fn counter_hash(limit_id: i64, window_start: DateTime<Utc>, entities: &Attributes) -> String {
    Fingerprint::new()
        .part(&limit_id.to_string())
        .part(&window_start.to_rfc3339())
        .attributes(entities)
        .finish()
}

/// Counter descriptor, inserted if no counter with the same hash exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCounter {
    pub hash: String,
    pub limit_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    pub id: i64,
    pub hash: String,
    pub limit_id: i64,
    pub value: Decimal,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// A counter whose candidate value broke its limit during an increment or rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceededCounter {
    pub counter_id: i64,
    pub limit_id: i64,
    pub limit_type: LimitType,
    pub period: Option<PeriodType>,
    pub entities: Attributes,
    pub limit_value: Decimal,
    pub new_value: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_counter_hash_depends_on_limit_and_window() {
        let entities = Attributes::from_pairs([("merchant_id", "1")]);
        let start = Utc.with_ymd_and_hms(2023, 5, 12, 23, 0, 0).unwrap();
        let next = Utc.with_ymd_and_hms(2023, 5, 13, 23, 0, 0).unwrap();

        let hash = counter_hash(1, start, &entities);
        assert_eq!(hash, counter_hash(1, start, &entities));
        assert_ne!(hash, counter_hash(2, start, &entities));
        assert_ne!(hash, counter_hash(1, next, &entities));
    }

    #[test]
    fn test_window_is_half_open() {
        let start = Utc.with_ymd_and_hms(2023, 5, 12, 23, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2023, 5, 13, 23, 0, 0).unwrap();
        let window = Window { start, end };
        assert!(window.contains(start));
        assert!(!window.contains(end));
    }
}
