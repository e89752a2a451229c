//! The limits orchestrator.
//!
//! [`LimitsService`] manages limit definitions and drives operations through
//! submit, append and finalize. Every public method takes a
//! [`CancellationToken`]; once it fires the call returns
//! [`LimitsError::Cancelled`] and any open transaction is dropped uncommitted.
//!
//! ```rust,ignore
//! use limits_engine::{LimitsConfig, LimitsService, storage::InMemoryLimitsStore};
//!
//! let service = LimitsService::new(InMemoryLimitsStore::new(), &LimitsConfig::default());
//! let context_id = service.send_operation(&cancel, info).await?;
//! service.finalize_operations(&cancel, finalize).await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::{LimitsConfig, ServiceConfig, TransactionConfig};
use crate::error::{LimitsError, Result};
use crate::storage::LimitsStore;

pub mod counters;
mod limits;
pub mod matching;
mod operations;
pub mod period;
mod retry;
pub mod validation;

pub use counters::generate_counters;
pub use matching::{added_limits, check_static_limits, split_limits};
pub use period::{compute_window, window_for};
pub use validation::{validate_attributes, validate_limit, validate_operation_info};

pub struct LimitsService<S> {
    store: S,
    service: ServiceConfig,
    transaction: TransactionConfig,
    clock: Arc<dyn Clock>,
}

impl<S: LimitsStore> LimitsService<S> {
    pub fn new(store: S, config: &LimitsConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(store: S, config: &LimitsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            service: config.service.clone(),
            transaction: config.transaction.clone(),
            clock,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

/// Resolve `future`, or fail with `Cancelled` as soon as `cancel` fires.
async fn cancellable<T>(cancel: &CancellationToken, future: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LimitsError::Cancelled),
        result = future => result,
    }
}
