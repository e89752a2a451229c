//! Input validation. Everything here runs before any persistence.

use chrono_tz::Tz;
use rust_decimal::Decimal;
use std::collections::HashSet;

use crate::domain::{Attributes, LimitType, NewLimit, OperationInfo};
use crate::error::{LimitsError, Result};

pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Rejects empty sets, empty or uppercase names, empty values and duplicate names.
pub fn validate_attributes(entities: &Attributes) -> Result<()> {
    if entities.is_empty() {
        return Err(LimitsError::invalid_request("entities is empty"));
    }

    let mut seen = HashSet::with_capacity(entities.len());
    for entity in entities {
        if entity.name.is_empty() {
            return Err(LimitsError::invalid_request("entity name is empty"));
        }
        if entity.name.chars().any(char::is_uppercase) {
            return Err(LimitsError::invalid_request(format!(
                "entity name \"{}\" has an upper case symbol",
                entity.name
            )));
        }
        if entity.value.is_empty() {
            return Err(LimitsError::invalid_request(format!(
                "entity value with name \"{}\" is empty",
                entity.name
            )));
        }
        if !seen.insert(entity.name.as_str()) {
            return Err(LimitsError::invalid_request(format!(
                "entity with name \"{}\" is duplicated",
                entity.name
            )));
        }
    }

    Ok(())
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| LimitsError::invalid_request(format!("invalid timezone \"{}\"", name)))
}

/// Validates a limit definition and returns it normalized: periodic limits
/// without a timezone get [`DEFAULT_TIMEZONE`].
pub fn validate_limit(mut limit: NewLimit) -> Result<NewLimit> {
    if limit.value <= Decimal::ZERO {
        return Err(LimitsError::invalid_request(
            "limit value must be greater than zero",
        ));
    }
    if limit.currency.trim().is_empty() {
        return Err(LimitsError::invalid_request("limit currency is empty"));
    }
    validate_attributes(&limit.entities)?;

    if limit
        .timezone
        .as_deref()
        .is_some_and(|timezone| timezone.trim().is_empty())
    {
        limit.timezone = None;
    }

    match limit.limit_type {
        LimitType::MinAmount | LimitType::MaxAmount => {
            if limit.period.is_some() {
                return Err(LimitsError::invalid_request(format!(
                    "limit with {} type has a period",
                    limit.limit_type
                )));
            }
            if limit.timezone.is_some() {
                return Err(LimitsError::invalid_request(format!(
                    "limit with {} type has a timezone",
                    limit.limit_type
                )));
            }
        }
        LimitType::TotalAmount | LimitType::TotalCount => {
            if limit.period.is_none() {
                return Err(LimitsError::invalid_request(format!(
                    "limit with {} type doesn't have a period",
                    limit.limit_type
                )));
            }
            if limit.limit_type == LimitType::TotalCount && !limit.value.fract().is_zero() {
                return Err(LimitsError::invalid_request(
                    "limit with TOTAL_COUNT type must have an integer value",
                ));
            }
            let timezone = limit
                .timezone
                .get_or_insert_with(|| DEFAULT_TIMEZONE.to_string());
            parse_timezone(timezone)?;
        }
    }

    Ok(limit)
}

pub fn validate_operation_info(info: &OperationInfo) -> Result<()> {
    if info.amount.value <= Decimal::ZERO {
        return Err(LimitsError::invalid_request(
            "operation amount must be greater than zero",
        ));
    }
    if info.amount.currency.trim().is_empty() {
        return Err(LimitsError::invalid_request("operation currency is empty"));
    }
    validate_attributes(&info.entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Amount, Attribute, PeriodType};
    use rust_decimal_macros::dec;

    fn merchant() -> Attributes {
        Attributes::from_pairs([("merchant_id", "1")])
    }

    fn limit(limit_type: LimitType, period: Option<PeriodType>, timezone: Option<&str>) -> NewLimit {
        NewLimit {
            limit_type,
            currency: "EUR".to_string(),
            value: dec!(100),
            entities: merchant(),
            period,
            timezone: timezone.map(str::to_string),
        }
    }

    fn message(err: LimitsError) -> String {
        match err {
            LimitsError::InvalidRequest(msg) => msg,
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn test_attributes_validation() {
        assert!(validate_attributes(&merchant()).is_ok());
        assert_eq!(
            message(validate_attributes(&Attributes::default()).unwrap_err()),
            "entities is empty"
        );
        assert_eq!(
            message(validate_attributes(&Attributes::from_pairs([("Merchant", "1")])).unwrap_err()),
            "entity name \"Merchant\" has an upper case symbol"
        );
        assert_eq!(
            message(validate_attributes(&Attributes::from_pairs([("merchant_id", "")])).unwrap_err()),
            "entity value with name \"merchant_id\" is empty"
        );
        assert_eq!(
            message(validate_attributes(&Attributes::from_pairs([("", "1")])).unwrap_err()),
            "entity name is empty"
        );
        let duplicated = Attributes::new(vec![
            Attribute::new("merchant_id", "1"),
            Attribute::new("merchant_id", "2"),
        ]);
        assert_eq!(
            message(validate_attributes(&duplicated).unwrap_err()),
            "entity with name \"merchant_id\" is duplicated"
        );
    }

    #[test]
    fn test_static_limits_reject_period_and_timezone() {
        for limit_type in [LimitType::MinAmount, LimitType::MaxAmount] {
            assert!(validate_limit(limit(limit_type, None, None)).is_ok());

            let err = validate_limit(limit(limit_type, Some(PeriodType::CalendarDay), None)).unwrap_err();
            assert_eq!(message(err), format!("limit with {} type has a period", limit_type));

            let err = validate_limit(limit(limit_type, None, Some("UTC"))).unwrap_err();
            assert_eq!(message(err), format!("limit with {} type has a timezone", limit_type));
        }
    }

    #[test]
    fn test_periodic_limits_require_period_and_default_timezone() {
        for limit_type in [LimitType::TotalAmount, LimitType::TotalCount] {
            let err = validate_limit(limit(limit_type, None, None)).unwrap_err();
            assert_eq!(
                message(err),
                format!("limit with {} type doesn't have a period", limit_type)
            );

            let validated =
                validate_limit(limit(limit_type, Some(PeriodType::CalendarWeek), None)).unwrap();
            assert_eq!(validated.timezone.as_deref(), Some("UTC"));

            let validated = validate_limit(limit(
                limit_type,
                Some(PeriodType::CalendarWeek),
                Some("Europe/London"),
            ))
            .unwrap();
            assert_eq!(validated.timezone.as_deref(), Some("Europe/London"));
        }
    }

    #[test]
    fn test_invalid_timezone() {
        let err = validate_limit(limit(
            LimitType::TotalAmount,
            Some(PeriodType::CalendarDay),
            Some("Mars/Olympus_Mons"),
        ))
        .unwrap_err();
        assert_eq!(message(err), "invalid timezone \"Mars/Olympus_Mons\"");
    }

    #[test]
    fn test_total_count_must_be_integral() {
        let mut fractional = limit(LimitType::TotalCount, Some(PeriodType::CalendarDay), None);
        fractional.value = dec!(2.5);
        assert!(validate_limit(fractional).is_err());

        let mut integral = limit(LimitType::TotalCount, Some(PeriodType::CalendarDay), None);
        integral.value = dec!(2.000);
        assert!(validate_limit(integral).is_ok());
    }

    #[test]
    fn test_value_and_currency() {
        let mut zero = limit(LimitType::MaxAmount, None, None);
        zero.value = Decimal::ZERO;
        assert!(validate_limit(zero).is_err());

        let mut no_currency = limit(LimitType::MaxAmount, None, None);
        no_currency.currency = " ".to_string();
        assert_eq!(
            message(validate_limit(no_currency).unwrap_err()),
            "limit currency is empty"
        );
    }

    #[test]
    fn test_operation_info_validation() {
        let valid = OperationInfo {
            amount: Amount::new(dec!(10), "EUR"),
            entities: merchant(),
        };
        assert!(validate_operation_info(&valid).is_ok());

        let negative = OperationInfo {
            amount: Amount::new(dec!(-1), "EUR"),
            ..valid.clone()
        };
        assert!(validate_operation_info(&negative).is_err());

        let no_currency = OperationInfo {
            amount: Amount::new(dec!(1), ""),
            ..valid.clone()
        };
        assert!(validate_operation_info(&no_currency).is_err());

        let no_entities = OperationInfo {
            entities: Attributes::default(),
            ..valid
        };
        assert_eq!(
            message(validate_operation_info(&no_entities).unwrap_err()),
            "entities is empty"
        );
    }
}
