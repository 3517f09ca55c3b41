//! Unit tests for the cost circuit breaker

use std::sync::Arc;

use cost_governor::{CostBreaker, CostBreakerConfig, CostLedger, CostLedgerConfig};
use services_common::KernelError;

fn ledger_with_budgets(daily: f64, monthly: f64) -> Arc<CostLedger> {
    Arc::new(
        CostLedger::new(
            None,
            CostLedgerConfig {
                daily_budget: daily,
                monthly_budget: monthly,
            },
        )
        .unwrap(),
    )
}

fn breaker_over(ledger: Arc<CostLedger>, daily_limit: f64, monthly_limit: f64) -> CostBreaker {
    CostBreaker::new(
        ledger,
        None,
        CostBreakerConfig {
            per_request_limit: 0.10,
            daily_limit,
            monthly_limit,
        },
    )
    .unwrap()
}

#[test]
fn non_positive_limits_are_rejected() {
    let ledger = ledger_with_budgets(50.0, 1500.0);
    for config in [
        CostBreakerConfig {
            per_request_limit: 0.0,
            ..CostBreakerConfig::default()
        },
        CostBreakerConfig {
            daily_limit: -1.0,
            ..CostBreakerConfig::default()
        },
        CostBreakerConfig {
            monthly_limit: 0.0,
            ..CostBreakerConfig::default()
        },
    ] {
        assert!(matches!(
            CostBreaker::new(Arc::clone(&ledger), None, config),
            Err(KernelError::BadInput(_))
        ));
    }
}

#[tokio::test]
async fn fresh_breaker_allows_calls() {
    let breaker = breaker_over(ledger_with_budgets(50.0, 1500.0), 50.0, 1500.0);
    assert!(breaker.check(None, false).await);
    assert!(!breaker.is_open());
    assert_eq!(breaker.statistics().total_checks, 1);
}

#[tokio::test]
async fn per_request_cap_blocks_expensive_calls() {
    let breaker = breaker_over(ledger_with_budgets(50.0, 1500.0), 50.0, 1500.0);
    assert!(!breaker.check(Some(0.5), false).await);
    assert!(breaker.check(Some(0.05), false).await);
    assert_eq!(breaker.statistics().blocked_requests, 1);
    // The per-request cap applies to critical calls as well
    assert!(!breaker.check(Some(0.5), true).await);
}

#[tokio::test]
async fn breach_sequence_blocks_non_critical_but_never_critical() {
    // Daily budget 50; calls of 0.075 each (75k tokens at 1.0/M).
    let ledger = ledger_with_budgets(50.0, 1500.0);
    let breaker = breaker_over(Arc::clone(&ledger), 50.0, 1500.0);

    let mut cumulative = 0.0;
    for _ in 0..1000 {
        cumulative += ledger
            .track("soldier", "qwen-next-80b", 50_000, 25_000)
            .await
            .unwrap();
        if cumulative > 50.0 {
            break;
        }
    }
    assert!(cumulative > 50.0, "cap must be breached by the loop");

    let blocked_before = breaker.statistics().blocked_requests;
    assert!(!breaker.check(Some(0.05), false).await, "non-critical blocked");
    assert!(breaker.is_open(), "breach opened the breaker");
    assert!(breaker.check(Some(0.05), true).await, "critical always allowed");

    let stats = breaker.statistics();
    assert_eq!(
        stats.blocked_requests,
        blocked_before + 1,
        "only the non-critical call increments blocked_requests"
    );
}

#[tokio::test]
async fn reopening_is_idempotent() {
    let ledger = ledger_with_budgets(1.0, 1500.0);
    let breaker = breaker_over(Arc::clone(&ledger), 1.0, 1500.0);
    ledger.track("svc", "qwen-next-80b", 2_000_000, 0).await.unwrap();

    // Repeated breached checks must not double-count the open transition
    breaker.check(None, false).await;
    breaker.check(None, false).await;
    breaker.check(None, false).await;
    assert_eq!(breaker.statistics().open_count, 1);
}

#[tokio::test]
async fn pause_and_resume_are_idempotent() {
    let breaker = breaker_over(ledger_with_budgets(50.0, 1500.0), 50.0, 1500.0);

    breaker.pause_non_critical_calls().await;
    breaker.pause_non_critical_calls().await;
    assert!(breaker.is_open());
    assert_eq!(breaker.statistics().open_count, 1);
    assert!(!breaker.check(None, false).await);
    assert!(breaker.check(None, true).await);

    breaker.resume_calls().await;
    breaker.resume_calls().await;
    assert!(!breaker.is_open());
    assert!(breaker.check(None, false).await);
}

#[tokio::test]
async fn auto_reset_closes_only_under_ninety_percent() {
    // Ledger holds 1.0 of spend; breaker daily limit 1.0 → open.
    let ledger = ledger_with_budgets(100.0, 1500.0);
    ledger.track("svc", "qwen-next-80b", 1_000_000, 0).await.unwrap();

    let tight = breaker_over(Arc::clone(&ledger), 1.0, 1500.0);
    tight.check(None, false).await;
    assert!(tight.is_open());
    // 1.0 is not under 90% of 1.0
    assert!(!tight.auto_reset_if_possible().await);
    assert!(tight.is_open());

    // A breaker with a much higher cap can reset after a manual pause
    let loose = breaker_over(Arc::clone(&ledger), 100.0, 1500.0);
    loose.pause_non_critical_calls().await;
    assert!(loose.auto_reset_if_possible().await);
    assert!(!loose.is_open());
}

#[tokio::test]
async fn auto_reset_on_closed_breaker_reports_false() {
    let breaker = breaker_over(ledger_with_budgets(50.0, 1500.0), 50.0, 1500.0);
    assert!(!breaker.auto_reset_if_possible().await);
}

#[tokio::test]
async fn statistics_track_block_rate() {
    let breaker = breaker_over(ledger_with_budgets(50.0, 1500.0), 50.0, 1500.0);
    breaker.check(None, false).await;
    breaker.check(Some(1.0), false).await;

    let stats = breaker.statistics();
    assert_eq!(stats.total_checks, 2);
    assert_eq!(stats.blocked_requests, 1);
    assert!((stats.block_rate - 0.5).abs() < 1e-12);

    breaker.reset_statistics();
    let stats = breaker.statistics();
    assert_eq!(stats.total_checks, 0);
    assert_eq!(stats.blocked_requests, 0);
    assert_eq!(stats.open_count, 0);
}

#[tokio::test]
async fn status_reports_caps_and_actuals() {
    let ledger = ledger_with_budgets(50.0, 1500.0);
    ledger.track("svc", "qwen-next-80b", 1_000_000, 0).await.unwrap();
    let breaker = breaker_over(Arc::clone(&ledger), 50.0, 1500.0);

    let status = breaker.status().await;
    assert!(!status.is_open);
    assert_eq!(status.daily_limit, 50.0);
    assert!((status.current_daily_cost - 1.0).abs() < 1e-9);
}
