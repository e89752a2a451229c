//! Limits engine - quota and rate limiting over windowed counters
//!
//! Limits are keyed by a currency and a set of attributes. An operation
//! matches every live limit whose attributes it contains:
//!
//! - **Static limits** (`MIN_AMOUNT`, `MAX_AMOUNT`) bound the single operation amount.
//! - **Dynamic limits** (`TOTAL_AMOUNT`, `TOTAL_COUNT`) accumulate into one counter
//!   per calendar window (day, week or month in the limit's timezone).
//!
//! Counter increments are all or nothing and run in serializable
//! transactions that are retried on serialization failures. Operations stay
//! pending until their context is finalized as committed or rolled back.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use limits_engine::{LimitsConfig, LimitsService, OperationInfo, Amount};
//! use limits_engine::storage::InMemoryLimitsStore;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = LimitsConfig::builder().from_env().build()?;
//! limits_engine::init_tracing_with_config(&config.logging);
//!
//! let service = LimitsService::new(InMemoryLimitsStore::new(), &config);
//! let cancel = CancellationToken::new();
//! let context_id = service
//!     .send_operation(&cancel, OperationInfo { amount, entities })
//!     .await?;
//! ```

pub mod clock;
pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod domain;
mod error;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod utils;

pub use clock::{Clock, MockClock, SystemClock};
pub use config::{
    CleanupConfig, LimitsConfig, LimitsConfigBuilder, LoggingConfig, ServiceConfig,
    TransactionConfig,
};
pub use domain::{
    Amount, AppendOperationInfo, Attribute, Attributes, Context, Counter, FinalizeOperationsInfo,
    Limit, LimitType, LimitsFilter, LimitsPage, NewLimit, Operation, OperationInfo,
    OperationStatus, PeriodType,
};
pub use error::{ErrorKind, LimitsError, Result};
pub use scheduler::{CleanupReport, LimitsScheduler};
pub use service::LimitsService;
pub use storage::{CleanupStore, IsolationLevel, LimitsRepository, LimitsStore, LimitsTransaction};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing from a [`LoggingConfig`]
pub fn init_tracing_with_config(config: &LoggingConfig) {
    let env_filter = EnvFilter::new(&config.level);

    if config.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
