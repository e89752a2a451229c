//! Transaction helpers shared by the orchestrator.

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::config::TransactionConfig;
use crate::error::{LimitsError, Result};
use crate::storage::{IsolationLevel, LimitsStore, LimitsTransaction};

/// Commit on success, roll back on failure.
pub(crate) async fn finish<Tx, T>(tx: Tx, result: Result<T>) -> Result<T>
where
    Tx: LimitsTransaction,
{
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "Failed to roll back transaction");
            }
            Err(err)
        }
    }
}

/// Run `f` in a serializable transaction, retrying on serialization failures.
///
/// Up to `retry_amount` retries follow the first attempt, `retry_delay` apart.
/// Any other error is returned at once. Cancellation is checked before every
/// attempt and interrupts the delay.
pub(crate) async fn retry_serializable<S, T, F>(
    store: &S,
    config: &TransactionConfig,
    cancel: &CancellationToken,
    f: F,
) -> Result<T>
where
    S: LimitsStore,
    T: Send,
    F: for<'t> Fn(&'t S::Transaction) -> BoxFuture<'t, Result<T>> + Send + Sync,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(LimitsError::Cancelled);
        }

        let result = match store.begin(IsolationLevel::Serializable).await {
            Ok(tx) => {
                let result = f(&tx).await;
                finish(tx, result).await
            }
            Err(err) => Err(err),
        };

        match result {
            Err(err) if err.is_retryable() && attempt < config.retry_amount => {
                attempt += 1;
                tracing::warn!(
                    attempt,
                    retry_amount = config.retry_amount,
                    error = %err,
                    "Serialization failure, retrying transaction"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(LimitsError::Cancelled),
                    _ = tokio::time::sleep(config.retry_delay()) => {}
                }
            }
            Err(err) if err.is_retryable() => {
                tracing::error!(
                    attempts = attempt + 1,
                    error = %err,
                    "Serialization failure, retries exhausted"
                );
                return Err(err);
            }
            result => return result,
        }
    }
}
