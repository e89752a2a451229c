//! Cleanup scheduler over the in-memory store

use chrono::{Duration, TimeZone, Utc};
use limits_engine::storage::InMemoryLimitsStore;
use limits_engine::{
    Amount, Attributes, CleanupReport, LimitType, LimitsConfig, LimitsScheduler, LimitsService,
    MockClock, NewLimit, OperationInfo, PeriodType,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Harness {
    service: LimitsService<InMemoryLimitsStore>,
    scheduler: LimitsScheduler<InMemoryLimitsStore>,
    clock: MockClock,
}

fn harness() -> Harness {
    let clock = MockClock::new(Utc.with_ymd_and_hms(2023, 5, 13, 15, 39, 0).unwrap());
    let store = InMemoryLimitsStore::with_clock(Arc::new(clock.clone()));
    let config = LimitsConfig::builder()
        .with_cleanup_outdate_interval(std::time::Duration::from_secs(86_400))
        .with_cleanup_batch_size(2)
        .build()
        .unwrap();

    let scheduler =
        LimitsScheduler::with_clock(store.clone(), config.cleanup.clone(), Arc::new(clock.clone()));
    let service = LimitsService::with_clock(store, &config, Arc::new(clock.clone()));
    Harness {
        service,
        scheduler,
        clock,
    }
}

fn daily_count(merchant: &str) -> NewLimit {
    NewLimit {
        limit_type: LimitType::TotalCount,
        currency: "EUR".to_string(),
        value: dec!(100),
        entities: Attributes::from_pairs([("merchant_id", merchant)]),
        period: Some(PeriodType::CalendarDay),
        timezone: None,
    }
}

fn operation(merchant: &str) -> OperationInfo {
    OperationInfo {
        amount: Amount::new(dec!(10), "EUR"),
        entities: Attributes::from_pairs([("merchant_id", merchant)]),
    }
}

fn rows(report: CleanupReport) -> (u64, u64, u64) {
    (
        report.limits.unwrap(),
        report.counters.unwrap(),
        report.contexts.unwrap(),
    )
}

#[tokio::test]
async fn test_deleted_limits_are_purged_once() {
    let h = harness();
    let cancel = CancellationToken::new();
    let limit = h.service.create_limit(&cancel, daily_count("1")).await.unwrap();
    h.service.send_operation(&cancel, operation("1")).await.unwrap();
    h.service.delete_limits(&cancel, &[limit.id]).await.unwrap();

    // The counter goes with its limit; the context is still fresh.
    assert_eq!(rows(h.scheduler.run_once().await), (1, 0, 0));
    assert_eq!(h.service.store().stored_limit_count().await, 0);
    assert_eq!(h.service.store().stored_counter_count().await, 0);

    assert_eq!(rows(h.scheduler.run_once().await), (0, 0, 0));
}

#[tokio::test]
async fn test_outdated_counters_and_contexts_are_purged() {
    let h = harness();
    let cancel = CancellationToken::new();
    let limit = h.service.create_limit(&cancel, daily_count("1")).await.unwrap();
    for _ in 0..3 {
        h.service.send_operation(&cancel, operation("1")).await.unwrap();
    }
    h.service.send_operation(&cancel, operation("2")).await.unwrap();

    // Window ends 2023-05-14T00:00Z; cleanup keeps a day beyond that.
    h.clock.advance(Duration::days(1));
    assert_eq!(rows(h.scheduler.run_once().await), (0, 0, 0));

    h.clock.advance(Duration::days(2));
    let context_ids = 1..=4;
    assert_eq!(rows(h.scheduler.run_once().await), (0, 1, 4));
    assert!(h.service.get_counters(&cancel, limit.id).await.unwrap().is_empty());
    for context_id in context_ids {
        assert!(h.service.get_context(&cancel, context_id).await.is_err());
    }

    // Limits themselves are only purged once deleted.
    assert!(h.service.get_limit_by_id(&cancel, limit.id).await.is_ok());
    assert_eq!(rows(h.scheduler.run_once().await), (0, 0, 0));
}

#[tokio::test]
async fn test_contexts_with_live_counters_are_kept() {
    let h = harness();
    let cancel = CancellationToken::new();
    h.service
        .create_limit(
            &cancel,
            NewLimit {
                period: Some(PeriodType::CalendarMonth),
                ..daily_count("1")
            },
        )
        .await
        .unwrap();

    let linked = h.service.send_operation(&cancel, operation("1")).await.unwrap();
    let unlinked = h.service.send_operation(&cancel, operation("3")).await.unwrap();

    // Still inside the May window, but both contexts are two days old.
    h.clock.advance(Duration::days(2));
    assert_eq!(rows(h.scheduler.run_once().await), (0, 0, 1));
    assert!(h.service.get_context(&cancel, linked).await.is_ok());
    assert!(h.service.get_context(&cancel, unlinked).await.is_err());
}
