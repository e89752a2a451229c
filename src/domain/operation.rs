use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Attributes;
use crate::error::LimitsError;

/// Lifecycle of an operation: `New` until its counters are incremented,
/// `Pending` until finalized, then `Committed` or `Rollback` for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    New,
    Pending,
    Committed,
    Rollback,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::Rollback => "rollback",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Rollback)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = LimitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "pending" => Ok(Self::Pending),
            "committed" => Ok(Self::Committed),
            "rollback" => Ok(Self::Rollback),
            other => Err(LimitsError::invalid_request(format!(
                "invalid operation status \"{}\"",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: i64,
    pub context_id: i64,
    pub currency: String,
    pub value: Decimal,
    pub status: OperationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row inserted for every submit and every effective append. Starts as `New`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOperation {
    pub context_id: i64,
    pub currency: String,
    pub value: Decimal,
}

/// Accumulated attributes and operation history of one multi-step flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub id: i64,
    pub meta: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub currency: String,
    pub value: Decimal,
}

impl Amount {
    pub fn new(value: Decimal, currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
            value,
        }
    }
}

/// Input of a submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub amount: Amount,
    pub entities: Attributes,
}

/// Input of an append: extra attributes for an existing context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendOperationInfo {
    pub context_id: i64,
    pub entities: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeOperationsInfo {
    pub context_id: i64,
    pub status: OperationStatus,
}
