//! Persistence port consumed by the orchestrator and the cleanup scheduler.
//!
//! [`LimitsRepository`] is implemented both by stores (each call auto-commits)
//! and by their transactions, so the same orchestration code runs against
//! either. Two implementations ship with the crate:
//!
//! - [`SeaOrmLimitsStore`](sea_orm_store::SeaOrmLimitsStore) for PostgreSQL
//! - [`InMemoryLimitsStore`](memory::InMemoryLimitsStore) for tests and embedding

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    Attributes, Context, Counter, ExceededCounter, Limit, LimitsFilter, NewCounter, NewLimit,
    NewOperation, Operation,
};
use crate::error::Result;

pub mod memory;
#[cfg(feature = "database")]
pub mod sea_orm_store;

pub use memory::InMemoryLimitsStore;
#[cfg(feature = "database")]
pub use sea_orm_store::SeaOrmLimitsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadCommitted,
    Serializable,
}

/// Data operations on limits, contexts, operations and counters.
#[async_trait]
pub trait LimitsRepository: Send + Sync {
    // Limits

    /// Insert a limit. A live limit with the same hash is an InvalidRequest.
    async fn create_limit(&self, limit: &NewLimit, hash: &str) -> Result<Limit>;

    /// Fetch a live limit. NotFound when missing or soft-deleted.
    async fn get_limit_by_id(&self, id: i64) -> Result<Limit>;

    /// Overwrite the value of a live limit and return the updated row.
    async fn update_limit_value(&self, limit: &Limit) -> Result<Limit>;

    /// Soft-delete live limits, returning the ids actually deleted.
    async fn delete_limits(&self, ids: &[i64]) -> Result<Vec<i64>>;

    /// Soft-delete every counter belonging to the given limits.
    async fn delete_counters(&self, limit_ids: &[i64]) -> Result<()>;

    /// Live limits matching `filter`, paged by its `limit`/`offset`, plus the unpaged total.
    async fn get_limits(&self, filter: &LimitsFilter) -> Result<(Vec<Limit>, u64)>;

    /// Live limits of `currency` whose entities are a subset of `attributes`.
    async fn match_limits(&self, currency: &str, attributes: &Attributes) -> Result<Vec<Limit>>;

    // Contexts

    async fn create_context(&self, meta: &Attributes) -> Result<Context>;

    async fn get_context_by_id(&self, id: i64) -> Result<Context>;

    // Operations

    async fn create_operation(&self, operation: &NewOperation) -> Result<Operation>;

    /// Operations of a context ordered by id.
    async fn get_operations_by_context_id(&self, context_id: i64) -> Result<Vec<Operation>>;

    // Counters

    /// Insert missing counters by hash and return the ids of all of them.
    async fn create_counters_if_not_exists(&self, counters: &[NewCounter]) -> Result<Vec<i64>>;

    async fn link_counters_to_operation(&self, counter_ids: &[i64], operation_id: i64)
    -> Result<()>;

    /// Live counters of a limit ordered by window start.
    async fn get_counters_by_limit_id(&self, limit_id: i64) -> Result<Vec<Counter>>;

    /// Add the operation to each counter and promote it to pending, updating the
    /// context meta when given.
    ///
    /// Counters whose candidate value exceeds the limit are left untouched and
    /// returned; the caller must abort the transaction when any are returned.
    async fn increment_counters(
        &self,
        operation_id: i64,
        counter_ids: &[i64],
        context: Option<&Context>,
    ) -> Result<Vec<ExceededCounter>>;

    /// Mark operations committed.
    async fn commit_operations(&self, operation_ids: &[i64]) -> Result<()>;

    /// Subtract the operations from their counters and mark them rolled back.
    ///
    /// Counters that would go below zero are left untouched and returned.
    async fn rollback_operations(&self, operation_ids: &[i64]) -> Result<Vec<ExceededCounter>>;
}

/// Purges used by the cleanup scheduler. Each returns the number of rows deleted.
#[async_trait]
pub trait CleanupStore: Send + Sync {
    /// Delete soft-deleted limits.
    async fn cleanup_limits(&self) -> Result<u64>;

    /// Delete counters soft-deleted or whose window ended before `outdated_before`,
    /// `batch_size` rows per statement.
    async fn cleanup_counters(&self, outdated_before: DateTime<Utc>, batch_size: u64)
    -> Result<u64>;

    /// Delete contexts untouched since `outdated_before` with no linked counters,
    /// `batch_size` rows per statement.
    async fn cleanup_contexts(&self, outdated_before: DateTime<Utc>, batch_size: u64)
    -> Result<u64>;
}

/// A store that can open transactions.
#[async_trait]
pub trait LimitsStore: LimitsRepository + CleanupStore {
    type Transaction: LimitsTransaction;

    async fn begin(&self, isolation: IsolationLevel) -> Result<Self::Transaction>;
}

#[async_trait]
pub trait LimitsTransaction: LimitsRepository {
    async fn commit(self) -> Result<()>;

    async fn rollback(self) -> Result<()>;
}
