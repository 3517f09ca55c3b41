//! Unit tests for the metrics collector

use std::sync::Arc;
use std::time::Duration;

use monitoring::{KernelMetrics, MetricsCollector, MetricsConfig};
use services_common::constants::keys;
use services_common::{KernelError, KvStore, MemoryKv};

fn metrics() -> Arc<KernelMetrics> {
    Arc::new(KernelMetrics::new().unwrap())
}

fn collector(kv: Option<Arc<dyn KvStore>>) -> Arc<MetricsCollector> {
    Arc::new(MetricsCollector::new(metrics(), kv, MetricsConfig::default()).unwrap())
}

#[test]
fn port_zero_is_rejected() {
    let config = MetricsConfig {
        port: 0,
        ..MetricsConfig::default()
    };
    assert!(matches!(
        MetricsCollector::new(metrics(), None, config),
        Err(KernelError::BadInput(_))
    ));
}

#[test]
fn sub_second_interval_is_rejected() {
    let config = MetricsConfig {
        collection_interval: Duration::from_millis(200),
        ..MetricsConfig::default()
    };
    assert!(matches!(
        MetricsCollector::new(metrics(), None, config),
        Err(KernelError::BadInput(_))
    ));
}

#[tokio::test]
async fn every_cycle_updates_gauges_or_records_errors() {
    let collector = collector(None);

    for _ in 0..3 {
        let result = collector.collect_all().await;
        assert!(
            result.metrics_updated > 0 || result.errors > 0,
            "a cycle must observe something or fail loudly"
        );
    }
}

#[tokio::test]
async fn collection_counter_is_monotonic() {
    let collector = collector(None);

    let mut last = collector.status().collection_count;
    assert_eq!(last, 0);
    for _ in 0..3 {
        collector.collect_all().await;
        let current = collector.status().collection_count;
        assert!(current > last);
        last = current;
    }
    assert!(collector.status().last_collection.is_some());
}

#[tokio::test]
async fn business_metrics_come_from_kv() {
    let kv = Arc::new(MemoryKv::new());
    kv.set(keys::TOTAL_VALUE, "123456.5").await.unwrap();
    kv.set(keys::POSITIONS_COUNT, "4").await.unwrap();
    kv.set(keys::SOLDIER_MODE, "cloud").await.unwrap();

    let collector = collector(Some(kv as Arc<dyn KvStore>));
    collector.collect_all().await;

    let metrics = collector.metrics();
    assert_eq!(metrics.portfolio_value.get(), 123456.5);
    assert_eq!(metrics.portfolio_positions.get(), 4);
    assert_eq!(metrics.soldier_mode.get(), 1);
}

#[tokio::test]
async fn local_soldier_mode_exports_zero() {
    let kv = Arc::new(MemoryKv::new());
    kv.set(keys::SOLDIER_MODE, "local").await.unwrap();

    let collector = collector(Some(kv as Arc<dyn KvStore>));
    collector.collect_all().await;
    assert_eq!(collector.metrics().soldier_mode.get(), 0);
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let collector = collector(None);
    collector.start().unwrap();
    assert!(matches!(
        collector.start(),
        Err(KernelError::AlreadyRunning(_))
    ));
    collector.stop();
}

#[test]
fn record_helpers_touch_their_metrics() {
    let metrics = metrics();

    metrics.record_trade("momentum", "buy", "filled", 0.03, 1500.0);
    metrics.record_decision("local", "hold", 0.08);
    metrics.record_kv_operation("get", 0.002, true);
    metrics.record_kv_operation("set", 0.5, false);
    metrics.record_arena_battle("a_share", 12);

    assert_eq!(
        metrics
            .trades_total
            .with_label_values(&["momentum", "buy", "filled"])
            .get(),
        1
    );
    assert_eq!(metrics.redis_failures_total.get(), 1);
    assert_eq!(
        metrics.arena_survivors.with_label_values(&["a_share"]).get(),
        12
    );

    let text = metrics.gather_text();
    assert!(text.contains("mia_trades_total"));
    assert!(text.contains("mia_redis_latency_seconds"));
}

#[test]
fn exposition_contains_health_and_cost_surfaces() {
    let metrics = metrics();
    metrics.system_health_status.set(2);
    metrics.cost_daily_total.set(12.5);
    metrics
        .cost_budget_exceeded
        .with_label_values(&["daily"])
        .set(1);

    let text = metrics.gather_text();
    assert!(text.contains("mia_system_health_status 2"));
    assert!(text.contains("mia_cost_daily_total 12.5"));
    assert!(text.contains("mia_cost_budget_exceeded{budget_type=\"daily\"} 1"));
}
