use tokio_util::sync::CancellationToken;

use super::retry::finish;
use super::validation::validate_limit;
use super::{LimitsService, cancellable};
use crate::domain::{Limit, LimitsFilter, LimitsPage, NewLimit};
use crate::error::{LimitsError, Result};
use crate::storage::{IsolationLevel, LimitsRepository, LimitsStore};

impl<S: LimitsStore> LimitsService<S> {
    /// Validate and store a new limit. A live limit with the same scope is an InvalidRequest.
    pub async fn create_limit(&self, cancel: &CancellationToken, limit: NewLimit) -> Result<Limit> {
        cancellable(cancel, async {
            let limit = validate_limit(limit)?;
            let hash = limit.hash();
            let created = self.store.create_limit(&limit, &hash).await?;

            tracing::info!(
                limit_id = created.id,
                limit_type = %created.limit_type,
                currency = %created.currency,
                "Limit created"
            );
            Ok(created)
        })
        .await
    }

    /// Replace the definition of limit `id`.
    ///
    /// A value-only change keeps the id. Any change of scope or timezone
    /// soft-deletes the old limit with its counters and returns a new limit.
    pub async fn update_limit(
        &self,
        cancel: &CancellationToken,
        id: i64,
        limit: NewLimit,
    ) -> Result<Limit> {
        cancellable(cancel, async {
            let limit = validate_limit(limit)?;
            let hash = limit.hash();

            let tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
            let result = Self::replace_limit(&tx, id, &limit, &hash).await;
            let updated = finish(tx, result).await?;

            tracing::info!(limit_id = id, new_limit_id = updated.id, "Limit updated");
            Ok(updated)
        })
        .await
    }

    async fn replace_limit(
        tx: &S::Transaction,
        id: i64,
        limit: &NewLimit,
        hash: &str,
    ) -> Result<Limit> {
        let stored = tx.get_limit_by_id(id).await?;

        if stored.hash == hash && stored.timezone == limit.timezone {
            return tx
                .update_limit_value(&Limit {
                    value: limit.value,
                    ..stored
                })
                .await;
        }

        let deleted = tx.delete_limits(&[stored.id]).await?;
        tx.delete_counters(&deleted).await?;
        tx.create_limit(limit, hash).await
    }

    /// Soft-delete limits and their counters. NotFound when none of the ids is live.
    pub async fn delete_limits(&self, cancel: &CancellationToken, ids: &[i64]) -> Result<()> {
        cancellable(cancel, async {
            if ids.is_empty() {
                return Err(LimitsError::invalid_request("limit ids are empty"));
            }

            let tx = self.store.begin(IsolationLevel::ReadCommitted).await?;
            let result = async {
                let deleted = tx.delete_limits(ids).await?;
                if deleted.is_empty() {
                    return Err(LimitsError::not_found(format!("limits {:?} not found", ids)));
                }
                tx.delete_counters(&deleted).await?;
                Ok(deleted)
            }
            .await;
            let deleted = finish(tx, result).await?;

            tracing::info!(limit_ids = ?deleted, "Limits deleted");
            Ok(())
        })
        .await
    }

    pub async fn get_limit_by_id(&self, cancel: &CancellationToken, id: i64) -> Result<Limit> {
        cancellable(cancel, self.store.get_limit_by_id(id)).await
    }

    /// List live limits. The page size is capped at `service.max_limit`.
    pub async fn list_limits(
        &self,
        cancel: &CancellationToken,
        mut filter: LimitsFilter,
    ) -> Result<LimitsPage> {
        cancellable(cancel, async {
            let max_limit = self.service.max_limit;
            filter.limit = Some(
                filter
                    .limit
                    .filter(|limit| *limit > 0)
                    .map_or(max_limit, |limit| limit.min(max_limit)),
            );

            let (limits, total) = self.store.get_limits(&filter).await?;
            tracing::debug!(returned = limits.len(), total, "Limits listed");
            Ok(LimitsPage { limits, total })
        })
        .await
    }
}
