use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Attributes, fingerprint::Fingerprint};
use crate::error::LimitsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LimitType {
    MinAmount,
    MaxAmount,
    TotalAmount,
    TotalCount,
}

impl LimitType {
    pub const ALL: [LimitType; 4] = [
        Self::MinAmount,
        Self::MaxAmount,
        Self::TotalAmount,
        Self::TotalCount,
    ];

    /// Name as written to the `limit_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MinAmount => "min_amount",
            Self::MaxAmount => "max_amount",
            Self::TotalAmount => "total_amount",
            Self::TotalCount => "total_count",
        }
    }

    /// Static limits bound a single operation amount.
    pub fn is_static(&self) -> bool {
        matches!(self, Self::MinAmount | Self::MaxAmount)
    }

    /// Dynamic limits accumulate over a period through counters.
    pub fn is_dynamic(&self) -> bool {
        !self.is_static()
    }
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MinAmount => "MIN_AMOUNT",
            Self::MaxAmount => "MAX_AMOUNT",
            Self::TotalAmount => "TOTAL_AMOUNT",
            Self::TotalCount => "TOTAL_COUNT",
        };
        f.write_str(name)
    }
}

impl FromStr for LimitType {
    type Err = LimitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "min_amount" => Ok(Self::MinAmount),
            "max_amount" => Ok(Self::MaxAmount),
            "total_amount" => Ok(Self::TotalAmount),
            "total_count" => Ok(Self::TotalCount),
            other => Err(LimitsError::invalid_request(format!(
                "unknown limit type \"{}\"",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodType {
    CalendarDay,
    CalendarWeek,
    CalendarMonth,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CalendarDay => "calendar_day",
            Self::CalendarWeek => "calendar_week",
            Self::CalendarMonth => "calendar_month",
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CalendarDay => "CALENDAR_DAY",
            Self::CalendarWeek => "CALENDAR_WEEK",
            Self::CalendarMonth => "CALENDAR_MONTH",
        };
        f.write_str(name)
    }
}

impl FromStr for PeriodType {
    type Err = LimitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "calendar_day" => Ok(Self::CalendarDay),
            "calendar_week" => Ok(Self::CalendarWeek),
            "calendar_month" => Ok(Self::CalendarMonth),
            other => Err(LimitsError::invalid_request(format!(
                "unknown period type \"{}\"",
                other
            ))),
        }
    }
}

/// Fingerprint of a limit's scope: type, currency, period and sorted entities.
///
/// Timezone and value are not part of it.
pub fn limit_hash(
    limit_type: LimitType,
    currency: &str,
    period: Option<PeriodType>,
    entities: &Attributes,
) -> String {
    let mut fingerprint = Fingerprint::new()
        .part(limit_type.as_str())
        .part(currency);
    if let Some(period) = period {
        fingerprint = fingerprint.part(period.as_str());
    }
    fingerprint.part("entities").attributes(entities).finish()
}

/// A stored limit definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    pub id: i64,
    pub hash: String,
    pub limit_type: LimitType,
    pub currency: String,
    pub value: Decimal,
    pub entities: Attributes,
    pub period: Option<PeriodType>,
    pub timezone: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A limit definition as submitted for creation or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLimit {
    pub limit_type: LimitType,
    pub currency: String,
    pub value: Decimal,
    pub entities: Attributes,
    #[serde(default)]
    pub period: Option<PeriodType>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl NewLimit {
    pub fn hash(&self) -> String {
        limit_hash(self.limit_type, &self.currency, self.period, &self.entities)
    }
}

impl Limit {
    pub fn is_static(&self) -> bool {
        self.limit_type.is_static()
    }
}

/// Listing filter; every set field narrows the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsFilter {
    /// Empty means every type.
    #[serde(default)]
    pub limit_types: Vec<LimitType>,
    #[serde(default)]
    pub currency: Option<String>,
    /// Limits whose entities contain all of these.
    #[serde(default)]
    pub entities: Attributes,
    #[serde(default)]
    pub period: Option<PeriodType>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

impl LimitsFilter {
    /// Whether a limit satisfies every predicate except paging.
    pub fn matches(&self, limit: &Limit) -> bool {
        (self.limit_types.is_empty() || self.limit_types.contains(&limit.limit_type))
            && self
                .currency
                .as_ref()
                .is_none_or(|currency| *currency == limit.currency)
            && self.entities.is_subset_of(&limit.entities)
            && self.period.is_none_or(|period| limit.period == Some(period))
            && self
                .timezone
                .as_ref()
                .is_none_or(|timezone| limit.timezone.as_ref() == Some(timezone))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsPage {
    pub limits: Vec<Limit>,
    /// Matches before paging.
    pub total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entities() -> Attributes {
        Attributes::from_pairs([("merchant_id", "1")])
    }

    #[test]
    fn test_limit_type_round_trips_through_storage_name() {
        for limit_type in LimitType::ALL {
            assert_eq!(limit_type.as_str().parse::<LimitType>().unwrap(), limit_type);
        }
        assert_eq!("TOTAL_COUNT".parse::<LimitType>().unwrap(), LimitType::TotalCount);
        assert!("weekly".parse::<LimitType>().is_err());
    }

    #[test]
    fn test_limit_type_display() {
        assert_eq!(LimitType::MaxAmount.to_string(), "MAX_AMOUNT");
        assert_eq!(PeriodType::CalendarWeek.to_string(), "CALENDAR_WEEK");
    }

    #[test]
    fn test_hash_ignores_entity_order() {
        let a = Attributes::from_pairs([("merchant_id", "1"), ("card_id", "2")]);
        let b = Attributes::from_pairs([("card_id", "2"), ("merchant_id", "1")]);
        assert_eq!(
            limit_hash(LimitType::TotalCount, "EUR", Some(PeriodType::CalendarDay), &a),
            limit_hash(LimitType::TotalCount, "EUR", Some(PeriodType::CalendarDay), &b)
        );
    }

    #[test]
    fn test_hash_distinguishes_scope() {
        let base = limit_hash(LimitType::TotalCount, "EUR", Some(PeriodType::CalendarDay), &entities());
        assert_ne!(
            base,
            limit_hash(LimitType::TotalAmount, "EUR", Some(PeriodType::CalendarDay), &entities())
        );
        assert_ne!(
            base,
            limit_hash(LimitType::TotalCount, "USD", Some(PeriodType::CalendarDay), &entities())
        );
        assert_ne!(
            base,
            limit_hash(LimitType::TotalCount, "EUR", Some(PeriodType::CalendarMonth), &entities())
        );
        assert_ne!(
            base,
            limit_hash(
                LimitType::TotalCount,
                "EUR",
                Some(PeriodType::CalendarDay),
                &Attributes::from_pairs([("merchant_id", "2")])
            )
        );
    }

    #[test]
    fn test_filter_matches() {
        let now = Utc::now();
        let limit = Limit {
            id: 1,
            hash: String::new(),
            limit_type: LimitType::TotalAmount,
            currency: "EUR".to_string(),
            value: Decimal::ONE_HUNDRED,
            entities: Attributes::from_pairs([("merchant_id", "1"), ("card_id", "2")]),
            period: Some(PeriodType::CalendarDay),
            timezone: Some("UTC".to_string()),
            created_at: now,
            updated_at: now,
        };

        assert!(LimitsFilter::default().matches(&limit));
        assert!(
            LimitsFilter {
                limit_types: vec![LimitType::TotalAmount],
                currency: Some("EUR".to_string()),
                entities: entities(),
                period: Some(PeriodType::CalendarDay),
                timezone: Some("UTC".to_string()),
                ..Default::default()
            }
            .matches(&limit)
        );
        assert!(
            !LimitsFilter {
                limit_types: vec![LimitType::MinAmount],
                ..Default::default()
            }
            .matches(&limit)
        );
        assert!(
            !LimitsFilter {
                entities: Attributes::from_pairs([("terminal_id", "1")]),
                ..Default::default()
            }
            .matches(&limit)
        );
        assert!(
            !LimitsFilter {
                timezone: Some("Europe/London".to_string()),
                ..Default::default()
            }
            .matches(&limit)
        );
    }
}
