//! In-memory limits store.
//!
//! Transactions hold the store lock for their whole lifetime, so they run one
//! at a time and always see a consistent snapshot. Writes go to a private copy
//! that replaces the shared state on commit; rollback or drop discards it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

use super::{CleanupStore, IsolationLevel, LimitsRepository, LimitsStore, LimitsTransaction};
use crate::clock::{Clock, SystemClock};
use crate::domain::{
    Attributes, Context, Counter, ExceededCounter, Limit, LimitType, LimitsFilter, NewCounter,
    NewLimit, NewOperation, Operation, OperationStatus,
};
use crate::error::{LimitsError, Result};

#[derive(Clone)]
pub struct InMemoryLimitsStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: Arc<tokio::sync::Mutex<State>>,
    clock: Arc<dyn Clock>,
    failing_commits: AtomicU32,
}

#[derive(Debug, Clone, Default)]
struct State {
    last_limit_id: i64,
    last_context_id: i64,
    last_operation_id: i64,
    last_counter_id: i64,
    limits: BTreeMap<i64, LimitRecord>,
    contexts: BTreeMap<i64, Context>,
    operations: BTreeMap<i64, Operation>,
    counters: BTreeMap<i64, CounterRecord>,
    /// (operation_id, counter_id)
    links: BTreeSet<(i64, i64)>,
}

#[derive(Debug, Clone)]
struct LimitRecord {
    limit: Limit,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct CounterRecord {
    counter: Counter,
    deleted_at: Option<DateTime<Utc>>,
}

impl InMemoryLimitsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Arc::new(tokio::sync::Mutex::new(State::default())),
                clock,
                failing_commits: AtomicU32::new(0),
            }),
        }
    }

    /// Make the next `count` serializable commits fail with a serialization failure.
    pub fn fail_next_commits(&self, count: u32) {
        self.inner.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Number of injected commit failures not yet consumed.
    pub fn pending_commit_failures(&self) -> u32 {
        self.inner.failing_commits.load(Ordering::SeqCst)
    }

    /// Total stored limits, soft-deleted ones included (for testing).
    pub async fn stored_limit_count(&self) -> usize {
        self.inner.state.lock().await.limits.len()
    }

    /// Total stored counters, soft-deleted ones included (for testing).
    pub async fn stored_counter_count(&self) -> usize {
        self.inner.state.lock().await.counters.len()
    }

    /// Total stored contexts (for testing).
    pub async fn stored_context_count(&self) -> usize {
        self.inner.state.lock().await.contexts.len()
    }

    /// Counter ids linked to an operation (for testing).
    pub async fn linked_counter_ids(&self, operation_id: i64) -> Vec<i64> {
        self.inner
            .state
            .lock()
            .await
            .links
            .iter()
            .filter(|(op, _)| *op == operation_id)
            .map(|(_, counter)| *counter)
            .collect()
    }

    /// Every statement is applied to a copy so a failing call leaves no partial writes.
    async fn with_state<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut State, DateTime<Utc>) -> Result<T> + Send,
    {
        let now = self.inner.clock.now();
        let mut guard = self.inner.state.lock().await;
        let mut working = guard.clone();
        let result = f(&mut working, now)?;
        *guard = working;
        Ok(result)
    }
}

impl Default for InMemoryLimitsStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A transaction over [`InMemoryLimitsStore`].
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: Mutex<State>,
    isolation: IsolationLevel,
    store: Arc<Inner>,
}

impl InMemoryTransaction {
    async fn with_state<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut State, DateTime<Utc>) -> Result<T> + Send,
    {
        let now = self.store.clock.now();
        let mut working = self.working.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut working, now)
    }
}

#[async_trait]
impl LimitsStore for InMemoryLimitsStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self, isolation: IsolationLevel) -> Result<InMemoryTransaction> {
        let guard = self.inner.state.clone().lock_owned().await;
        let working = Mutex::new(guard.clone());
        Ok(InMemoryTransaction {
            guard,
            working,
            isolation,
            store: self.inner.clone(),
        })
    }
}

#[async_trait]
impl LimitsTransaction for InMemoryTransaction {
    async fn commit(self) -> Result<()> {
        if self.isolation == IsolationLevel::Serializable {
            let injected = self
                .store
                .failing_commits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(LimitsError::serialization_failure(
                    "could not serialize access due to concurrent update",
                ));
            }
        }

        let mut guard = self.guard;
        *guard = self
            .working
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

macro_rules! impl_limits_repository {
    ($target:ty) => {
        #[async_trait]
        impl LimitsRepository for $target {
            async fn create_limit(&self, limit: &NewLimit, hash: &str) -> Result<Limit> {
                self.with_state(|state, now| state.create_limit(limit, hash, now))
                    .await
            }

            async fn get_limit_by_id(&self, id: i64) -> Result<Limit> {
                self.with_state(|state, _| state.live_limit(id).cloned()).await
            }

            async fn update_limit_value(&self, limit: &Limit) -> Result<Limit> {
                self.with_state(|state, now| state.update_limit_value(limit, now))
                    .await
            }

            async fn delete_limits(&self, ids: &[i64]) -> Result<Vec<i64>> {
                self.with_state(|state, now| Ok(state.delete_limits(ids, now)))
                    .await
            }

            async fn delete_counters(&self, limit_ids: &[i64]) -> Result<()> {
                self.with_state(|state, now| {
                    state.delete_counters(limit_ids, now);
                    Ok(())
                })
                .await
            }

            async fn get_limits(&self, filter: &LimitsFilter) -> Result<(Vec<Limit>, u64)> {
                self.with_state(|state, _| Ok(state.get_limits(filter))).await
            }

            async fn match_limits(
                &self,
                currency: &str,
                attributes: &Attributes,
            ) -> Result<Vec<Limit>> {
                self.with_state(|state, _| Ok(state.match_limits(currency, attributes)))
                    .await
            }

            async fn create_context(&self, meta: &Attributes) -> Result<Context> {
                self.with_state(|state, now| Ok(state.create_context(meta, now)))
                    .await
            }

            async fn get_context_by_id(&self, id: i64) -> Result<Context> {
                self.with_state(|state, _| {
                    state
                        .contexts
                        .get(&id)
                        .cloned()
                        .ok_or_else(|| LimitsError::not_found(format!("context {} not found", id)))
                })
                .await
            }

            async fn create_operation(&self, operation: &NewOperation) -> Result<Operation> {
                self.with_state(|state, now| state.create_operation(operation, now))
                    .await
            }

            async fn get_operations_by_context_id(
                &self,
                context_id: i64,
            ) -> Result<Vec<Operation>> {
                self.with_state(|state, _| {
                    Ok(state
                        .operations
                        .values()
                        .filter(|operation| operation.context_id == context_id)
                        .cloned()
                        .collect())
                })
                .await
            }

            async fn create_counters_if_not_exists(
                &self,
                counters: &[NewCounter],
            ) -> Result<Vec<i64>> {
                self.with_state(|state, _| state.create_counters_if_not_exists(counters))
                    .await
            }

            async fn link_counters_to_operation(
                &self,
                counter_ids: &[i64],
                operation_id: i64,
            ) -> Result<()> {
                self.with_state(|state, _| state.link_counters(counter_ids, operation_id))
                    .await
            }

            async fn get_counters_by_limit_id(&self, limit_id: i64) -> Result<Vec<Counter>> {
                self.with_state(|state, _| Ok(state.counters_by_limit(limit_id)))
                    .await
            }

            async fn increment_counters(
                &self,
                operation_id: i64,
                counter_ids: &[i64],
                context: Option<&Context>,
            ) -> Result<Vec<ExceededCounter>> {
                self.with_state(|state, now| {
                    state.increment_counters(operation_id, counter_ids, context, now)
                })
                .await
            }

            async fn commit_operations(&self, operation_ids: &[i64]) -> Result<()> {
                self.with_state(|state, now| {
                    state.set_status(operation_ids, OperationStatus::Committed, now);
                    Ok(())
                })
                .await
            }

            async fn rollback_operations(
                &self,
                operation_ids: &[i64],
            ) -> Result<Vec<ExceededCounter>> {
                self.with_state(|state, now| Ok(state.rollback_operations(operation_ids, now)))
                    .await
            }
        }
    };
}

impl_limits_repository!(InMemoryLimitsStore);
impl_limits_repository!(InMemoryTransaction);

#[async_trait]
impl CleanupStore for InMemoryLimitsStore {
    async fn cleanup_limits(&self) -> Result<u64> {
        self.with_state(|state, _| Ok(state.cleanup_limits())).await
    }

    async fn cleanup_counters(&self, outdated_before: DateTime<Utc>, batch_size: u64) -> Result<u64> {
        self.with_state(|state, _| Ok(state.cleanup_counters(outdated_before, batch_size)))
            .await
    }

    async fn cleanup_contexts(&self, outdated_before: DateTime<Utc>, batch_size: u64) -> Result<u64> {
        self.with_state(|state, _| Ok(state.cleanup_contexts(outdated_before, batch_size)))
            .await
    }
}

// =============================================================================
// State operations
// =============================================================================

impl State {
    fn live_limit(&self, id: i64) -> Result<&Limit> {
        self.limits
            .get(&id)
            .filter(|record| record.deleted_at.is_none())
            .map(|record| &record.limit)
            .ok_or_else(|| LimitsError::not_found(format!("limit {} not found", id)))
    }

    fn live_limits(&self) -> impl Iterator<Item = &Limit> {
        self.limits
            .values()
            .filter(|record| record.deleted_at.is_none())
            .map(|record| &record.limit)
    }

    fn live_counter(&self, id: i64) -> Option<&Counter> {
        self.counters
            .get(&id)
            .filter(|record| record.deleted_at.is_none())
            .map(|record| &record.counter)
    }

    fn create_limit(&mut self, limit: &NewLimit, hash: &str, now: DateTime<Utc>) -> Result<Limit> {
        if self.live_limits().any(|existing| existing.hash == hash) {
            return Err(LimitsError::invalid_request(format!(
                "limit with hash \"{}\" already exists",
                hash
            )));
        }

        self.last_limit_id += 1;
        let stored = Limit {
            id: self.last_limit_id,
            hash: hash.to_string(),
            limit_type: limit.limit_type,
            currency: limit.currency.clone(),
            value: limit.value,
            entities: limit.entities.clone(),
            period: limit.period,
            timezone: limit.timezone.clone(),
            created_at: now,
            updated_at: now,
        };
        self.limits.insert(
            stored.id,
            LimitRecord {
                limit: stored.clone(),
                deleted_at: None,
            },
        );
        Ok(stored)
    }

    fn update_limit_value(&mut self, limit: &Limit, now: DateTime<Utc>) -> Result<Limit> {
        let record = self
            .limits
            .get_mut(&limit.id)
            .filter(|record| record.deleted_at.is_none())
            .ok_or_else(|| LimitsError::not_found(format!("limit {} not found", limit.id)))?;
        record.limit.value = limit.value;
        record.limit.updated_at = now;
        Ok(record.limit.clone())
    }

    fn delete_limits(&mut self, ids: &[i64], now: DateTime<Utc>) -> Vec<i64> {
        let mut deleted = Vec::new();
        for id in ids {
            if let Some(record) = self.limits.get_mut(id) {
                if record.deleted_at.is_none() {
                    record.deleted_at = Some(now);
                    deleted.push(*id);
                }
            }
        }
        deleted
    }

    fn delete_counters(&mut self, limit_ids: &[i64], now: DateTime<Utc>) {
        for record in self.counters.values_mut() {
            if record.deleted_at.is_none() && limit_ids.contains(&record.counter.limit_id) {
                record.deleted_at = Some(now);
            }
        }
    }

    fn get_limits(&self, filter: &LimitsFilter) -> (Vec<Limit>, u64) {
        let matching: Vec<&Limit> = self.live_limits().filter(|l| filter.matches(l)).collect();
        let total = matching.len() as u64;
        let offset = filter.offset.unwrap_or(0) as usize;
        let page = filter.limit.map_or(usize::MAX, |limit| limit as usize);
        let limits = matching
            .into_iter()
            .skip(offset)
            .take(page)
            .cloned()
            .collect();
        (limits, total)
    }

    fn match_limits(&self, currency: &str, attributes: &Attributes) -> Vec<Limit> {
        self.live_limits()
            .filter(|limit| limit.currency == currency && limit.entities.is_subset_of(attributes))
            .cloned()
            .collect()
    }

    fn create_context(&mut self, meta: &Attributes, now: DateTime<Utc>) -> Context {
        self.last_context_id += 1;
        let context = Context {
            id: self.last_context_id,
            meta: meta.clone(),
            created_at: now,
            updated_at: now,
        };
        self.contexts.insert(context.id, context.clone());
        context
    }

    fn create_operation(&mut self, operation: &NewOperation, now: DateTime<Utc>) -> Result<Operation> {
        if !self.contexts.contains_key(&operation.context_id) {
            return Err(LimitsError::database(format!(
                "operation references missing context {}",
                operation.context_id
            )));
        }

        self.last_operation_id += 1;
        let stored = Operation {
            id: self.last_operation_id,
            context_id: operation.context_id,
            currency: operation.currency.clone(),
            value: operation.value,
            status: OperationStatus::New,
            created_at: now,
            updated_at: now,
        };
        self.operations.insert(stored.id, stored.clone());
        Ok(stored)
    }

    fn create_counters_if_not_exists(&mut self, counters: &[NewCounter]) -> Result<Vec<i64>> {
        for counter in counters {
            if self.counters.values().any(|record| record.counter.hash == counter.hash) {
                continue;
            }
            if !self.limits.contains_key(&counter.limit_id) {
                return Err(LimitsError::database(format!(
                    "counter references missing limit {}",
                    counter.limit_id
                )));
            }

            self.last_counter_id += 1;
            self.counters.insert(
                self.last_counter_id,
                CounterRecord {
                    counter: Counter {
                        id: self.last_counter_id,
                        hash: counter.hash.clone(),
                        limit_id: counter.limit_id,
                        value: Decimal::ZERO,
                        start_time: counter.start_time,
                        end_time: counter.end_time,
                    },
                    deleted_at: None,
                },
            );
        }

        let hashes: BTreeSet<&str> = counters.iter().map(|c| c.hash.as_str()).collect();
        Ok(self
            .counters
            .values()
            .filter(|record| {
                record.deleted_at.is_none() && hashes.contains(record.counter.hash.as_str())
            })
            .map(|record| record.counter.id)
            .collect())
    }

    fn link_counters(&mut self, counter_ids: &[i64], operation_id: i64) -> Result<()> {
        if !self.operations.contains_key(&operation_id) {
            return Err(LimitsError::database(format!(
                "link references missing operation {}",
                operation_id
            )));
        }
        for counter_id in counter_ids {
            if !self.counters.contains_key(counter_id) {
                return Err(LimitsError::database(format!(
                    "link references missing counter {}",
                    counter_id
                )));
            }
            self.links.insert((operation_id, *counter_id));
        }
        Ok(())
    }

    fn counters_by_limit(&self, limit_id: i64) -> Vec<Counter> {
        let mut counters: Vec<Counter> = self
            .counters
            .values()
            .filter(|record| record.deleted_at.is_none() && record.counter.limit_id == limit_id)
            .map(|record| record.counter.clone())
            .collect();
        counters.sort_by_key(|counter| counter.start_time);
        counters
    }

    fn exceeded(counter: &Counter, limit: &Limit, new_value: Decimal) -> ExceededCounter {
        ExceededCounter {
            counter_id: counter.id,
            limit_id: limit.id,
            limit_type: limit.limit_type,
            period: limit.period,
            entities: limit.entities.clone(),
            limit_value: limit.value,
            new_value,
        }
    }

    fn increment_counters(
        &mut self,
        operation_id: i64,
        counter_ids: &[i64],
        context: Option<&Context>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExceededCounter>> {
        let amount = self
            .operations
            .get(&operation_id)
            .map(|operation| operation.value)
            .ok_or_else(|| LimitsError::not_found(format!("operation {} not found", operation_id)))?;

        let mut updates = Vec::new();
        let mut exceeded = Vec::new();
        for counter_id in counter_ids.iter().collect::<BTreeSet<_>>() {
            let Some(counter) = self.live_counter(*counter_id) else {
                continue;
            };
            let Some(limit) = self.limits.get(&counter.limit_id).map(|r| &r.limit) else {
                continue;
            };
            let new_value = match limit.limit_type {
                LimitType::TotalCount => counter.value + Decimal::ONE,
                _ => counter.value + amount,
            };
            if new_value <= limit.value {
                updates.push((counter.id, new_value));
            } else {
                exceeded.push(Self::exceeded(counter, limit, new_value));
            }
        }

        for (counter_id, new_value) in updates {
            if let Some(record) = self.counters.get_mut(&counter_id) {
                record.counter.value = new_value;
            }
        }
        self.set_status(&[operation_id], OperationStatus::Pending, now);
        if let Some(context) = context {
            if let Some(stored) = self.contexts.get_mut(&context.id) {
                stored.meta = context.meta.clone();
                stored.updated_at = now;
            }
        }

        Ok(exceeded)
    }

    fn set_status(&mut self, operation_ids: &[i64], status: OperationStatus, now: DateTime<Utc>) {
        for id in operation_ids {
            if let Some(operation) = self.operations.get_mut(id) {
                operation.status = status;
                operation.updated_at = now;
            }
        }
    }

    fn rollback_operations(&mut self, operation_ids: &[i64], now: DateTime<Utc>) -> Vec<ExceededCounter> {
        let mut decrements: BTreeMap<i64, Decimal> = BTreeMap::new();
        for (operation_id, counter_id) in &self.links {
            if !operation_ids.contains(operation_id) {
                continue;
            }
            let (Some(operation), Some(counter)) =
                (self.operations.get(operation_id), self.live_counter(*counter_id))
            else {
                continue;
            };
            let Some(limit) = self.limits.get(&counter.limit_id).map(|r| &r.limit) else {
                continue;
            };
            let step = match limit.limit_type {
                LimitType::TotalCount => Decimal::ONE,
                _ => operation.value,
            };
            *decrements.entry(*counter_id).or_insert(Decimal::ZERO) += step;
        }

        let mut updates = Vec::new();
        let mut exceeded = Vec::new();
        for (counter_id, decrement) in decrements {
            let Some(counter) = self.live_counter(counter_id) else {
                continue;
            };
            let Some(limit) = self.limits.get(&counter.limit_id).map(|r| &r.limit) else {
                continue;
            };
            let new_value = counter.value - decrement;
            if new_value >= Decimal::ZERO {
                updates.push((counter_id, new_value));
            } else {
                exceeded.push(Self::exceeded(counter, limit, new_value));
            }
        }

        for (counter_id, new_value) in updates {
            if let Some(record) = self.counters.get_mut(&counter_id) {
                record.counter.value = new_value;
            }
        }
        self.set_status(operation_ids, OperationStatus::Rollback, now);

        exceeded
    }

    fn remove_counters(&mut self, ids: &BTreeSet<i64>) {
        for id in ids {
            self.counters.remove(id);
        }
        self.links.retain(|(_, counter_id)| !ids.contains(counter_id));
    }

    fn cleanup_limits(&mut self) -> u64 {
        let deleted: BTreeSet<i64> = self
            .limits
            .values()
            .filter(|record| record.deleted_at.is_some())
            .map(|record| record.limit.id)
            .collect();
        for id in &deleted {
            self.limits.remove(id);
        }

        let orphaned: BTreeSet<i64> = self
            .counters
            .values()
            .filter(|record| deleted.contains(&record.counter.limit_id))
            .map(|record| record.counter.id)
            .collect();
        self.remove_counters(&orphaned);

        deleted.len() as u64
    }

    fn cleanup_counters(&mut self, outdated_before: DateTime<Utc>, batch_size: u64) -> u64 {
        let mut total = 0;
        loop {
            let batch: BTreeSet<i64> = self
                .counters
                .values()
                .filter(|record| {
                    record.deleted_at.is_some() || record.counter.end_time < outdated_before
                })
                .take(batch_size as usize)
                .map(|record| record.counter.id)
                .collect();
            if batch.is_empty() {
                return total;
            }
            total += batch.len() as u64;
            self.remove_counters(&batch);
        }
    }

    fn cleanup_contexts(&mut self, outdated_before: DateTime<Utc>, batch_size: u64) -> u64 {
        let linked_operations: BTreeSet<i64> = self.links.iter().map(|(op, _)| *op).collect();
        let mut contexts_in_use: HashMap<i64, bool> = HashMap::new();
        for operation in self.operations.values() {
            let linked = linked_operations.contains(&operation.id);
            *contexts_in_use.entry(operation.context_id).or_insert(false) |= linked;
        }

        let mut total = 0;
        loop {
            let batch: BTreeSet<i64> = self
                .contexts
                .values()
                .filter(|context| {
                    context.updated_at < outdated_before
                        && !contexts_in_use.get(&context.id).copied().unwrap_or(false)
                })
                .take(batch_size as usize)
                .map(|context| context.id)
                .collect();
            if batch.is_empty() {
                return total;
            }
            total += batch.len() as u64;
            for id in &batch {
                self.contexts.remove(id);
            }
            self.operations
                .retain(|_, operation| !batch.contains(&operation.context_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::domain::PeriodType;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn clock() -> MockClock {
        MockClock::new(Utc.with_ymd_and_hms(2023, 5, 13, 12, 0, 0).unwrap())
    }

    fn new_limit(value: Decimal) -> NewLimit {
        NewLimit {
            limit_type: LimitType::TotalAmount,
            currency: "EUR".to_string(),
            value,
            entities: Attributes::from_pairs([("merchant_id", "1")]),
            period: Some(PeriodType::CalendarDay),
            timezone: Some("UTC".to_string()),
        }
    }

    async fn seed_counter(store: &InMemoryLimitsStore, limit: &Limit, hash: &str, end: DateTime<Utc>) -> i64 {
        let ids = store
            .create_counters_if_not_exists(&[NewCounter {
                hash: hash.to_string(),
                limit_id: limit.id,
                start_time: end - Duration::days(1),
                end_time: end,
            }])
            .await
            .unwrap();
        ids[0]
    }

    #[tokio::test]
    async fn test_duplicate_live_hash_is_rejected() {
        let store = InMemoryLimitsStore::new();
        store.create_limit(&new_limit(dec!(10)), "h").await.unwrap();
        let err = store.create_limit(&new_limit(dec!(20)), "h").await.unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn test_soft_deleted_hash_can_be_reused() {
        let store = InMemoryLimitsStore::new();
        let limit = store.create_limit(&new_limit(dec!(10)), "h").await.unwrap();
        assert_eq!(store.delete_limits(&[limit.id]).await.unwrap(), vec![limit.id]);
        assert!(store.get_limit_by_id(limit.id).await.is_err());
        let again = store.create_limit(&new_limit(dec!(10)), "h").await.unwrap();
        assert_ne!(again.id, limit.id);
    }

    #[tokio::test]
    async fn test_counters_are_created_once_per_hash() {
        let store = InMemoryLimitsStore::new();
        let limit = store.create_limit(&new_limit(dec!(10)), "h").await.unwrap();
        let end = Utc::now();
        let first = seed_counter(&store, &limit, "c", end).await;
        let second = seed_counter(&store, &limit, "c", end).await;
        assert_eq!(first, second);
        assert_eq!(store.stored_counter_count().await, 1);
    }

    #[tokio::test]
    async fn test_increment_skips_exceeding_counters_and_reports_them() {
        let store = InMemoryLimitsStore::new();
        let small = store.create_limit(&new_limit(dec!(5)), "small").await.unwrap();
        let large = store.create_limit(&new_limit(dec!(50)), "large").await.unwrap();
        let end = Utc::now();
        let small_counter = seed_counter(&store, &small, "c-small", end).await;
        let large_counter = seed_counter(&store, &large, "c-large", end).await;

        let context = store.create_context(&Attributes::default()).await.unwrap();
        let operation = store
            .create_operation(&NewOperation {
                context_id: context.id,
                currency: "EUR".to_string(),
                value: dec!(10),
            })
            .await
            .unwrap();

        let exceeded = store
            .increment_counters(operation.id, &[small_counter, large_counter], None)
            .await
            .unwrap();
        assert_eq!(exceeded.len(), 1);
        assert_eq!(exceeded[0].counter_id, small_counter);
        assert_eq!(exceeded[0].new_value, dec!(10));
        assert_eq!(exceeded[0].limit_value, dec!(5));
    }

    #[tokio::test]
    async fn test_transaction_rollback_discards_writes() {
        let store = InMemoryLimitsStore::new();
        let tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        tx.create_context(&Attributes::default()).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.stored_context_count().await, 0);

        let tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        tx.create_context(&Attributes::default()).await.unwrap();
        drop(tx);
        assert_eq!(store.stored_context_count().await, 0);

        let tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        tx.create_context(&Attributes::default()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.stored_context_count().await, 1);
    }

    #[tokio::test]
    async fn test_injected_failures_only_hit_serializable_commits() {
        let store = InMemoryLimitsStore::new();
        store.fail_next_commits(1);

        let tx = store.begin(IsolationLevel::ReadCommitted).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.pending_commit_failures(), 1);

        let tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        tx.create_context(&Attributes::default()).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.stored_context_count().await, 0);
        assert_eq!(store.pending_commit_failures(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_counters_in_batches() {
        let clock = clock();
        let store = InMemoryLimitsStore::with_clock(Arc::new(clock.clone()));
        let limit = store.create_limit(&new_limit(dec!(10)), "h").await.unwrap();
        let ended = clock.now() - Duration::days(3);
        for i in 0..5 {
            seed_counter(&store, &limit, &format!("old-{}", i), ended).await;
        }
        seed_counter(&store, &limit, "current", clock.now() + Duration::hours(1)).await;

        let cutoff = clock.now() - Duration::days(1);
        assert_eq!(store.cleanup_counters(cutoff, 2).await.unwrap(), 5);
        assert_eq!(store.stored_counter_count().await, 1);
        assert_eq!(store.cleanup_counters(cutoff, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_contexts_keeps_contexts_with_linked_counters() {
        let clock = clock();
        let store = InMemoryLimitsStore::with_clock(Arc::new(clock.clone()));
        let limit = store.create_limit(&new_limit(dec!(10)), "h").await.unwrap();
        let counter = seed_counter(&store, &limit, "c", clock.now() + Duration::days(1)).await;

        let linked = store.create_context(&Attributes::default()).await.unwrap();
        let unlinked_op = store
            .create_operation(&NewOperation {
                context_id: linked.id,
                currency: "EUR".to_string(),
                value: dec!(1),
            })
            .await
            .unwrap();
        let linked_op = store
            .create_operation(&NewOperation {
                context_id: linked.id,
                currency: "EUR".to_string(),
                value: dec!(1),
            })
            .await
            .unwrap();
        store.link_counters_to_operation(&[counter], linked_op.id).await.unwrap();
        assert_ne!(unlinked_op.id, linked_op.id);

        store.create_context(&Attributes::default()).await.unwrap();

        clock.advance(Duration::days(3));
        let cutoff = clock.now() - Duration::days(1);
        assert_eq!(store.cleanup_contexts(cutoff, 10).await.unwrap(), 1);
        assert_eq!(store.stored_context_count().await, 1);
        assert!(store.get_context_by_id(linked.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_limits_cascades_to_counters() {
        let store = InMemoryLimitsStore::new();
        let limit = store.create_limit(&new_limit(dec!(10)), "h").await.unwrap();
        seed_counter(&store, &limit, "c", Utc::now() + Duration::days(1)).await;

        store.delete_limits(&[limit.id]).await.unwrap();
        assert_eq!(store.cleanup_limits().await.unwrap(), 1);
        assert_eq!(store.stored_limit_count().await, 0);
        assert_eq!(store.stored_counter_count().await, 0);
        assert_eq!(store.cleanup_limits().await.unwrap(), 0);
    }
}
