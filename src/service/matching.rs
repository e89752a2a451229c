//! Operations on the set of limits matched for an operation.

use rust_decimal::Decimal;
use std::collections::HashSet;

use crate::domain::{Limit, LimitType};
use crate::error::{LimitsError, Result};

/// Partition into static (MIN/MAX_AMOUNT) and dynamic (TOTAL_*) limits.
pub fn split_limits(limits: Vec<Limit>) -> (Vec<Limit>, Vec<Limit>) {
    limits.into_iter().partition(Limit::is_static)
}

/// Fails on the first static limit the amount breaks.
pub fn check_static_limits(limits: &[Limit], amount: Decimal) -> Result<()> {
    for limit in limits {
        match limit.limit_type {
            LimitType::MinAmount if amount < limit.value => {
                return Err(LimitsError::internal(format!(
                    "operation amount {} is less than {} value {} of limit {}",
                    amount, limit.limit_type, limit.value, limit.id
                )));
            }
            LimitType::MaxAmount if amount > limit.value => {
                return Err(LimitsError::internal(format!(
                    "operation amount {} is greater than {} value {} of limit {}",
                    amount, limit.limit_type, limit.value, limit.id
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Limits in `current` that were not already in `previous`, compared by id.
pub fn added_limits(previous: &[Limit], current: Vec<Limit>) -> Vec<Limit> {
    let known: HashSet<i64> = previous.iter().map(|limit| limit.id).collect();
    current
        .into_iter()
        .filter(|limit| !known.contains(&limit.id))
        .collect()
}
