//! Periodic purge of soft-deleted and outdated rows.
//!
//! Each pass runs three purges in order: soft-deleted limits, counters that
//! are soft-deleted or whose window ended before the outdate horizon, and
//! contexts untouched since the horizon with no linked counters. A failing
//! purge is logged and does not stop the others.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::CleanupConfig;
use crate::error::{LimitsError, Result};
use crate::storage::CleanupStore;

/// Outcome of one cleanup pass, one entry per purge.
#[derive(Debug)]
pub struct CleanupReport {
    pub limits: Result<u64>,
    pub counters: Result<u64>,
    pub contexts: Result<u64>,
}

impl CleanupReport {
    pub fn is_success(&self) -> bool {
        self.limits.is_ok() && self.counters.is_ok() && self.contexts.is_ok()
    }
}

pub struct LimitsScheduler<S> {
    store: S,
    config: CleanupConfig,
    clock: Arc<dyn Clock>,
}

impl<S: CleanupStore> LimitsScheduler<S> {
    pub fn new(store: S, config: CleanupConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(store: S, config: CleanupConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Run a pass now and then once per `run_interval` until `cancel` fires.
    ///
    /// A pass in progress is finished before the cancellation is observed.
    /// Always returns [`LimitsError::Cancelled`].
    pub async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let period = self.config.run_interval();
        tracing::info!(
            run_interval_seconds = self.config.run_interval_seconds,
            outdate_interval_seconds = self.config.outdate_interval_seconds,
            "Cleanup scheduler started"
        );

        self.run_once().await;

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Cleanup scheduler stopped");
                    return Err(LimitsError::Cancelled);
                }
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }
    }

    /// One cleanup pass.
    pub async fn run_once(&self) -> CleanupReport {
        let report = match self.outdated_before() {
            Ok(outdated_before) => CleanupReport {
                limits: self.store.cleanup_limits().await,
                counters: self
                    .store
                    .cleanup_counters(outdated_before, self.config.batch_size)
                    .await,
                contexts: self
                    .store
                    .cleanup_contexts(outdated_before, self.config.batch_size)
                    .await,
            },
            Err(err) => CleanupReport {
                limits: self.store.cleanup_limits().await,
                counters: Err(err.clone()),
                contexts: Err(err),
            },
        };

        log_purge("limits", &report.limits);
        log_purge("counters", &report.counters);
        log_purge("contexts", &report.contexts);
        report
    }

    fn outdated_before(&self) -> Result<DateTime<Utc>> {
        chrono::Duration::from_std(self.config.outdate_interval())
            .ok()
            .and_then(|outdate| self.clock.now().checked_sub_signed(outdate))
            .ok_or_else(|| {
                LimitsError::internal(format!(
                    "outdate interval of {} seconds is out of range",
                    self.config.outdate_interval_seconds
                ))
            })
    }
}

fn log_purge(table: &str, result: &Result<u64>) {
    match result {
        Ok(rows) => tracing::info!(table, rows, "Cleanup purge finished"),
        Err(err) => tracing::error!(table, error = %err, "Cleanup purge failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingStore {
        passes: AtomicU32,
        fail_counters: bool,
        horizons: Mutex<Vec<(DateTime<Utc>, u64)>>,
    }

    #[async_trait]
    impl CleanupStore for Arc<RecordingStore> {
        async fn cleanup_limits(&self) -> Result<u64> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }

        async fn cleanup_counters(&self, outdated_before: DateTime<Utc>, batch_size: u64) -> Result<u64> {
            self.horizons.lock().unwrap().push((outdated_before, batch_size));
            if self.fail_counters {
                return Err(LimitsError::database("connection reset"));
            }
            Ok(2)
        }

        async fn cleanup_contexts(&self, _outdated_before: DateTime<Utc>, _batch_size: u64) -> Result<u64> {
            Ok(3)
        }
    }

    fn config(run_interval_seconds: u64) -> CleanupConfig {
        CleanupConfig {
            run_interval_seconds,
            outdate_interval_seconds: 3600,
            batch_size: 100,
        }
    }

    #[tokio::test]
    async fn test_run_once_uses_outdate_horizon() {
        let now = Utc.with_ymd_and_hms(2023, 5, 13, 12, 0, 0).unwrap();
        let store = Arc::new(RecordingStore::default());
        let scheduler =
            LimitsScheduler::with_clock(store.clone(), config(10), Arc::new(MockClock::new(now)));

        let report = scheduler.run_once().await;
        assert!(report.is_success());
        assert_eq!(report.contexts.unwrap(), 3);

        let horizons = store.horizons.lock().unwrap();
        assert_eq!(
            horizons.as_slice(),
            &[(Utc.with_ymd_and_hms(2023, 5, 13, 11, 0, 0).unwrap(), 100)]
        );
    }

    #[tokio::test]
    async fn test_failed_purge_does_not_stop_the_others() {
        let store = Arc::new(RecordingStore {
            fail_counters: true,
            ..Default::default()
        });
        let scheduler = LimitsScheduler::new(store.clone(), config(10));

        let report = scheduler.run_once().await;
        assert!(!report.is_success());
        assert_eq!(report.limits.unwrap(), 1);
        assert_eq!(report.counters.unwrap_err(), LimitsError::database("connection reset"));
        assert_eq!(report.contexts.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_out_of_range_outdate_interval_skips_windowed_purges() {
        let store = Arc::new(RecordingStore::default());
        let scheduler = LimitsScheduler::new(
            store.clone(),
            CleanupConfig {
                outdate_interval_seconds: u64::MAX,
                ..config(10)
            },
        );

        let report = scheduler.run_once().await;
        assert_eq!(report.limits.unwrap(), 1);
        assert_eq!(report.counters.unwrap_err().kind(), crate::ErrorKind::Internal);
        assert_eq!(report.contexts.unwrap_err().kind(), crate::ErrorKind::Internal);
        assert!(store.horizons.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_cancelled() {
        let store = Arc::new(RecordingStore::default());
        let scheduler = LimitsScheduler::new(store.clone(), config(10));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            canceller.cancel();
        });

        let err = scheduler.run(&cancel).await.unwrap_err();
        assert_eq!(err, LimitsError::Cancelled);
        // Immediately, then at 10s and 20s.
        assert_eq!(store.passes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_keeps_ticking_after_failures() {
        let store = Arc::new(RecordingStore {
            fail_counters: true,
            ..Default::default()
        });
        let scheduler = LimitsScheduler::new(store.clone(), config(5));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            canceller.cancel();
        });

        assert!(scheduler.run(&cancel).await.is_err());
        assert_eq!(store.passes.load(Ordering::SeqCst), 3);
    }
}
