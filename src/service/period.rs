//! Calendar windows for periodic limits.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::validation::{DEFAULT_TIMEZONE, parse_timezone};
use crate::domain::{Limit, PeriodType, Window};
use crate::error::{LimitsError, Result};

/// Window of `limit` containing `now`, evaluated in the limit's timezone.
pub fn compute_window(limit: &Limit, now: DateTime<Utc>) -> Result<Window> {
    let period = limit
        .period
        .ok_or_else(|| LimitsError::internal(format!("limit {} has no period", limit.id)))?;
    let timezone = parse_timezone(limit.timezone.as_deref().unwrap_or(DEFAULT_TIMEZONE))?;
    window_for(period, timezone, now)
}

/// - day: local midnight plus 24 hours
/// - week: Monday 00:00 local plus 7 days
/// - month: first of the local month up to the first of the next one
pub fn window_for(period: PeriodType, timezone: Tz, now: DateTime<Utc>) -> Result<Window> {
    let today = now.with_timezone(&timezone).date_naive();

    match period {
        PeriodType::CalendarDay => {
            let start = local_midnight(timezone, today)?;
            Ok(Window {
                start,
                end: start + Duration::days(1),
            })
        }
        PeriodType::CalendarWeek => {
            let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
            let start = local_midnight(timezone, monday)?;
            Ok(Window {
                start,
                end: start + Duration::days(7),
            })
        }
        PeriodType::CalendarMonth => {
            let first = today - Duration::days(i64::from(today.day0()));
            let next = first
                .checked_add_months(Months::new(1))
                .ok_or_else(|| LimitsError::internal(format!("date {} is out of range", first)))?;
            Ok(Window {
                start: local_midnight(timezone, first)?,
                end: local_midnight(timezone, next)?,
            })
        }
    }
}

/// First instant of `date` in `timezone`, as UTC.
///
/// Where a DST transition skips midnight the day starts at the first local
/// time that exists.
fn local_midnight(timezone: Tz, date: NaiveDate) -> Result<DateTime<Utc>> {
    let midnight = date.and_time(NaiveTime::MIN);

    (0..=24 * 4)
        .map(|quarter| midnight + Duration::minutes(15 * quarter))
        .find_map(|local| timezone.from_local_datetime(&local).earliest())
        .map(|start| start.with_timezone(&Utc))
        .ok_or_else(|| {
            LimitsError::internal(format!("no local midnight for {} in {}", date, timezone))
        })
}
