//! Submit, append and finalize.
//!
//! Submit and append prepare their rows in a read-committed transaction, then
//! increment counters in a separate serializable one. A failed increment
//! leaves the operation `new`, so it never becomes pending and is ignored by
//! finalize.

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::counters::generate_counters;
use super::matching::{added_limits, check_static_limits, split_limits};
use super::retry::{finish, retry_serializable};
use super::validation::{validate_attributes, validate_operation_info};
use super::{LimitsService, cancellable};
use crate::domain::{
    AppendOperationInfo, Context, Counter, ExceededCounter, FinalizeOperationsInfo, Limit,
    NewOperation, Operation, OperationInfo, OperationStatus,
};
use crate::error::{LimitsError, Result};
use crate::storage::{IsolationLevel, LimitsRepository, LimitsStore};

/// Rows written by the preparation transaction, awaiting their increment.
struct PreparedOperation {
    context_id: i64,
    operation_id: i64,
    counter_ids: Vec<i64>,
}

impl<S: LimitsStore> LimitsService<S> {
    /// Submit an operation, returning the id of the context created for it.
    pub async fn send_operation(
        &self,
        cancel: &CancellationToken,
        info: OperationInfo,
    ) -> Result<i64> {
        cancellable(cancel, async {
            validate_operation_info(&info)?;
            let now = self.clock.now();

            let tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
            let result = Self::create_operation_entities(&tx, &info, now).await;
            let prepared = finish(tx, result).await?;

            self.increment(cancel, prepared.operation_id, &prepared.counter_ids, None)
                .await?;

            tracing::info!(
                context_id = prepared.context_id,
                operation_id = prepared.operation_id,
                counters = prepared.counter_ids.len(),
                "Operation submitted"
            );
            Ok(prepared.context_id)
        })
        .await
    }

    async fn create_operation_entities(
        tx: &S::Transaction,
        info: &OperationInfo,
        now: DateTime<Utc>,
    ) -> Result<PreparedOperation> {
        let context = tx.create_context(&info.entities).await?;

        let limits = tx.match_limits(&info.amount.currency, &info.entities).await?;
        let (static_limits, dynamic_limits) = split_limits(limits);
        check_static_limits(&static_limits, info.amount.value)?;

        let operation = tx
            .create_operation(&NewOperation {
                context_id: context.id,
                currency: info.amount.currency.clone(),
                value: info.amount.value,
            })
            .await?;
        let counter_ids = Self::attach_counters(tx, &dynamic_limits, operation.id, now).await?;

        Ok(PreparedOperation {
            context_id: context.id,
            operation_id: operation.id,
            counter_ids,
        })
    }

    /// Add attributes to an existing context and enforce the limits they newly match.
    ///
    /// Appending attributes the context already has is a no-op. The merged
    /// attributes are stored only once the new counters were incremented.
    pub async fn append_operation(
        &self,
        cancel: &CancellationToken,
        info: AppendOperationInfo,
    ) -> Result<i64> {
        cancellable(cancel, async {
            validate_attributes(&info.entities)?;
            let now = self.clock.now();

            let tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
            let result = Self::update_operation_entities(&tx, &info, now).await;
            let Some((prepared, context)) = finish(tx, result).await? else {
                tracing::debug!(context_id = info.context_id, "Append changes nothing");
                return Ok(info.context_id);
            };

            self.increment(cancel, prepared.operation_id, &prepared.counter_ids, Some(context))
                .await?;

            tracing::info!(
                context_id = prepared.context_id,
                operation_id = prepared.operation_id,
                counters = prepared.counter_ids.len(),
                "Operation appended"
            );
            Ok(prepared.context_id)
        })
        .await
    }

    async fn update_operation_entities(
        tx: &S::Transaction,
        info: &AppendOperationInfo,
        now: DateTime<Utc>,
    ) -> Result<Option<(PreparedOperation, Context)>> {
        let context = tx.get_context_by_id(info.context_id).await?;
        let merged = context.meta.merge(&info.entities)?;
        if merged == context.meta {
            return Ok(None);
        }

        let operations = tx.get_operations_by_context_id(context.id).await?;
        let original = pending_operation(&operations, context.id)?;

        let previous = tx.match_limits(&original.currency, &context.meta).await?;
        let current = tx.match_limits(&original.currency, &merged).await?;
        let (static_limits, dynamic_limits) = split_limits(added_limits(&previous, current));
        check_static_limits(&static_limits, original.value)?;

        let operation = tx
            .create_operation(&NewOperation {
                context_id: context.id,
                currency: original.currency.clone(),
                value: original.value,
            })
            .await?;
        let counter_ids = Self::attach_counters(tx, &dynamic_limits, operation.id, now).await?;

        let prepared = PreparedOperation {
            context_id: context.id,
            operation_id: operation.id,
            counter_ids,
        };
        Ok(Some((prepared, Context { meta: merged, ..context })))
    }

    /// Commit or roll back every pending operation of a context.
    ///
    /// Fails if any operation of the context is already committed or rolled
    /// back. Rolling back subtracts the operations from their counters.
    pub async fn finalize_operations(
        &self,
        cancel: &CancellationToken,
        info: FinalizeOperationsInfo,
    ) -> Result<()> {
        cancellable(cancel, async {
            if !info.status.is_terminal() {
                return Err(LimitsError::invalid_request(format!(
                    "invalid operation status \"{}\"",
                    info.status
                )));
            }

            let FinalizeOperationsInfo { context_id, status } = info;
            let finalized = retry_serializable(&self.store, &self.transaction, cancel, move |tx| {
                Box::pin(async move {
                    tx.get_context_by_id(context_id).await?;
                    let operations = tx.get_operations_by_context_id(context_id).await?;
                    let ids = pending_operation_ids(&operations, context_id)?;

                    if status == OperationStatus::Committed {
                        tx.commit_operations(&ids).await?;
                    } else {
                        let underflow = tx.rollback_operations(&ids).await?;
                        if let Some(counter) = underflow.first() {
                            return Err(rollback_error(counter));
                        }
                    }
                    Ok(ids)
                })
            })
            .await?;

            tracing::info!(context_id, status = %status, operations = finalized.len(), "Operations finalized");
            Ok(())
        })
        .await
    }

    pub async fn get_context(&self, cancel: &CancellationToken, id: i64) -> Result<Context> {
        cancellable(cancel, self.store.get_context_by_id(id)).await
    }

    pub async fn get_operations(
        &self,
        cancel: &CancellationToken,
        context_id: i64,
    ) -> Result<Vec<Operation>> {
        cancellable(cancel, self.store.get_operations_by_context_id(context_id)).await
    }

    /// Live counters of a limit, one per window it has been used in.
    pub async fn get_counters(&self, cancel: &CancellationToken, limit_id: i64) -> Result<Vec<Counter>> {
        cancellable(cancel, self.store.get_counters_by_limit_id(limit_id)).await
    }

    async fn attach_counters(
        tx: &S::Transaction,
        dynamic_limits: &[Limit],
        operation_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>> {
        if dynamic_limits.is_empty() {
            return Ok(Vec::new());
        }

        let counters = generate_counters(dynamic_limits, now)?;
        let counter_ids = tx.create_counters_if_not_exists(&counters).await?;
        tx.link_counters_to_operation(&counter_ids, operation_id).await?;
        Ok(counter_ids)
    }

    /// Increment the operation's counters and promote it to pending, all or nothing.
    async fn increment(
        &self,
        cancel: &CancellationToken,
        operation_id: i64,
        counter_ids: &[i64],
        context: Option<Context>,
    ) -> Result<()> {
        let counter_ids = counter_ids.to_vec();
        retry_serializable(&self.store, &self.transaction, cancel, move |tx| {
            let counter_ids = counter_ids.clone();
            let context = context.clone();
            Box::pin(async move {
                let exceeded = tx
                    .increment_counters(operation_id, &counter_ids, context.as_ref())
                    .await?;
                match exceeded.first() {
                    Some(counter) => {
                        tracing::info!(
                            operation_id,
                            counter_id = counter.counter_id,
                            limit_id = counter.limit_id,
                            "Counter limit exceeded"
                        );
                        Err(exceeded_error(counter))
                    }
                    None => Ok(()),
                }
            })
        })
        .await
    }
}

/// The pending operation an append builds on.
fn pending_operation(operations: &[Operation], context_id: i64) -> Result<&Operation> {
    ensure_not_finalized(operations, context_id)?;
    operations
        .iter()
        .find(|operation| operation.status == OperationStatus::Pending)
        .ok_or_else(|| {
            LimitsError::invalid_request(format!(
                "context {} has no pending operations",
                context_id
            ))
        })
}

fn pending_operation_ids(operations: &[Operation], context_id: i64) -> Result<Vec<i64>> {
    ensure_not_finalized(operations, context_id)?;
    Ok(operations
        .iter()
        .filter(|operation| operation.status == OperationStatus::Pending)
        .map(|operation| operation.id)
        .collect())
}

fn ensure_not_finalized(operations: &[Operation], context_id: i64) -> Result<()> {
    match operations.iter().find(|operation| operation.status.is_terminal()) {
        Some(operation) => Err(LimitsError::invalid_request(format!(
            "operation {} of context {} is already {}",
            operation.id, context_id, operation.status
        ))),
        None => Ok(()),
    }
}

fn exceeded_error(counter: &ExceededCounter) -> LimitsError {
    LimitsError::internal(format!(
        "new counter value {} is greater than {} value {} limit_id {}",
        counter.new_value, counter.limit_type, counter.limit_value, counter.limit_id
    ))
}

fn rollback_error(counter: &ExceededCounter) -> LimitsError {
    LimitsError::internal(format!(
        "rollback counter {} with id {} failed",
        counter.limit_type, counter.counter_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn operation(id: i64, status: OperationStatus) -> Operation {
        let now = Utc::now();
        Operation {
            id,
            context_id: 1,
            currency: "EUR".to_string(),
            value: dec!(10),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_pending_operation_ids_skip_new_operations() {
        let operations = vec![
            operation(1, OperationStatus::Pending),
            operation(2, OperationStatus::New),
            operation(3, OperationStatus::Pending),
        ];
        assert_eq!(pending_operation_ids(&operations, 1).unwrap(), vec![1, 3]);
    }

    #[test]
    fn test_finalized_context_is_rejected() {
        let operations = vec![
            operation(1, OperationStatus::Pending),
            operation(2, OperationStatus::Committed),
        ];
        let err = pending_operation_ids(&operations, 1).unwrap_err();
        assert_eq!(
            err,
            LimitsError::invalid_request("operation 2 of context 1 is already committed")
        );
        assert!(pending_operation(&operations, 1).is_err());
    }

    #[test]
    fn test_append_requires_a_pending_operation() {
        let operations = vec![operation(1, OperationStatus::New)];
        let err = pending_operation(&operations, 1).unwrap_err();
        assert_eq!(
            err,
            LimitsError::invalid_request("context 1 has no pending operations")
        );
    }

    #[test]
    fn test_error_messages_identify_counter() {
        let counter = ExceededCounter {
            counter_id: 9,
            limit_id: 4,
            limit_type: crate::domain::LimitType::TotalCount,
            period: Some(crate::domain::PeriodType::CalendarDay),
            entities: crate::domain::Attributes::from_pairs([("merchant_id", "1")]),
            limit_value: dec!(2),
            new_value: dec!(3),
        };
        assert_eq!(
            exceeded_error(&counter),
            LimitsError::internal("new counter value 3 is greater than TOTAL_COUNT value 2 limit_id 4")
        );
        assert_eq!(
            rollback_error(&counter),
            LimitsError::internal("rollback counter TOTAL_COUNT with id 9 failed")
        );
    }
}
