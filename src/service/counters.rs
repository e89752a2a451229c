use chrono::{DateTime, Utc};

use super::period::compute_window;
use crate::domain::{Limit, NewCounter, counter_hash};
use crate::error::Result;

/// One counter descriptor per dynamic limit, for the window containing `now`.
///
/// Two operations in the same window produce the same hash, so their
/// increments land on the same counter row.
pub fn generate_counters(limits: &[Limit], now: DateTime<Utc>) -> Result<Vec<NewCounter>> {
    limits
        .iter()
        .filter(|limit| limit.limit_type.is_dynamic())
        .map(|limit| {
            let window = compute_window(limit, now)?;
            Ok(NewCounter {
                hash: counter_hash(limit.id, window.start, &limit.entities),
                limit_id: limit.id,
                start_time: window.start,
                end_time: window.end,
            })
        })
        .collect()
}
