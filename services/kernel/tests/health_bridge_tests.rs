//! Integration tests for the health → alerts bridge

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use health_monitor::{
    ComponentHealth, ComponentStatus, HealthCheckResult, HealthChecker, HealthCheckerConfig,
    HealthObserver, OverallStatus, KV_COMPONENT,
};
use kernel::HealthAlertBridge;
use monitoring::KernelMetrics;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use services_common::{
    CrossBus, CrossEvent, CrossEventKind, EventBus, EventHandler, EventPriority, KernelError,
    KernelResult, KvStore,
};

/// KV stub whose pings always fail, so recovery never succeeds
struct DeadKv;

#[async_trait]
impl KvStore for DeadKv {
    async fn ping(&self) -> KernelResult<()> {
        Err(KernelError::Kv("connection refused".to_string()))
    }

    async fn get(&self, _key: &str) -> KernelResult<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str) -> KernelResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> KernelResult<()> {
        Ok(())
    }

    async fn incr_by_float(&self, _key: &str, _delta: f64) -> KernelResult<f64> {
        Ok(0.0)
    }

    async fn lpush_trim(&self, _key: &str, _value: &str, _keep: usize) -> KernelResult<()> {
        Ok(())
    }

    async fn publish(&self, _channel: &str, _payload: &str) -> KernelResult<usize> {
        Ok(0)
    }
}

struct Capture {
    events: Arc<Mutex<Vec<CrossEvent>>>,
}

#[async_trait]
impl EventHandler<CrossEvent> for Capture {
    async fn handle(&self, event: CrossEvent) -> anyhow::Result<()> {
        self.events.lock().push(event);
        Ok(())
    }

    fn id(&self) -> &str {
        "capture"
    }
}

struct Fixture {
    bridge: HealthAlertBridge,
    bus: Arc<CrossBus>,
    events: Arc<Mutex<Vec<CrossEvent>>>,
    metrics: Arc<KernelMetrics>,
}

fn fixture() -> Fixture {
    let base = EventBus::new();
    base.start();
    let bus = Arc::new(CrossBus::new(base));
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        CrossEventKind::HealthCheckFailed,
        CrossEventKind::HealthCheckRecovered,
        CrossEventKind::PerformanceDegradation,
    ] {
        bus.subscribe(
            kind,
            Capture {
                events: Arc::clone(&events),
            },
        );
    }

    let checker = Arc::new(
        HealthChecker::new(Arc::new(DeadKv), HealthCheckerConfig::default()).unwrap(),
    );
    let metrics = Arc::new(KernelMetrics::new().unwrap());
    let bridge = HealthAlertBridge::new(checker, Arc::clone(&metrics), Arc::clone(&bus));

    Fixture {
        bridge,
        bus,
        events,
        metrics,
    }
}

fn sample(status: ComponentStatus) -> ComponentHealth {
    ComponentHealth {
        status,
        message: "probe".to_string(),
        metrics: FxHashMap::default(),
    }
}

fn result_with(components: Vec<(&str, ComponentStatus)>, overall: OverallStatus) -> HealthCheckResult {
    let mut map = BTreeMap::new();
    for (name, status) in components {
        map.insert(name.to_string(), sample(status));
    }
    HealthCheckResult {
        overall_status: overall,
        components: map,
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn healthy_pass_updates_gauges_and_publishes_nothing() {
    let f = fixture();
    let result = result_with(
        vec![
            (KV_COMPONENT, ComponentStatus::Healthy),
            ("gpu", ComponentStatus::Healthy),
        ],
        OverallStatus::Healthy,
    );

    f.bridge.on_health_result(&result).await;
    f.bus.base().quiesce().await;

    assert!(f.events.lock().is_empty());
    assert_eq!(f.metrics.system_health_status.get(), 0);
    assert_eq!(f.metrics.health_checks_total.get(), 1);
    assert_eq!(f.bridge.stats().health_checks_performed, 1);
}

#[tokio::test]
async fn degraded_pass_publishes_performance_degradation() {
    let f = fixture();
    let result = result_with(
        vec![
            (KV_COMPONENT, ComponentStatus::Healthy),
            ("gpu", ComponentStatus::Degraded),
        ],
        OverallStatus::Degraded,
    );

    f.bridge.on_health_result(&result).await;
    f.bus.base().quiesce().await;

    let events = f.events.lock().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, CrossEventKind::PerformanceDegradation);
    assert_eq!(events[0].priority, EventPriority::Normal);
    let degraded = events[0].data.get("degraded_components").unwrap();
    assert_eq!(degraded.as_array().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_kv_runs_recovery_then_publishes_failure() {
    let f = fixture();
    let result = result_with(
        vec![
            (KV_COMPONENT, ComponentStatus::Unhealthy),
            ("gpu", ComponentStatus::Healthy),
        ],
        OverallStatus::Critical,
    );

    f.bridge.on_health_result(&result).await;
    f.bus.base().quiesce().await;

    let events = f.events.lock().clone();

    // Recovery against the dead KV fails after the 1-2-4 backoff
    let recovery_failure = events
        .iter()
        .find(|event| {
            event.kind == CrossEventKind::HealthCheckFailed
                && event.data.get("recovery_attempted").is_some()
        })
        .expect("recovery failure event");
    assert_eq!(recovery_failure.priority, EventPriority::High);
    assert_eq!(
        recovery_failure.data.get("recovery_success").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        recovery_failure.data.get("component").and_then(|v| v.as_str()),
        Some(KV_COMPONENT)
    );

    // The critical overall state publishes its own failure event
    let overall_failure = events
        .iter()
        .find(|event| {
            event.kind == CrossEventKind::HealthCheckFailed
                && event.data.get("failed_components").is_some()
        })
        .expect("overall failure event");
    assert_eq!(overall_failure.priority, EventPriority::Critical);

    let stats = f.bridge.stats();
    assert_eq!(stats.recoveries_attempted, 1);
    assert_eq!(stats.recoveries_succeeded, 0);
    assert_eq!(f.metrics.redis_recovery_attempts_total.get(), 1);
    assert_eq!(f.metrics.redis_recovery_success_total.get(), 0);
}

#[tokio::test]
async fn component_gauges_follow_the_latest_pass() {
    let f = fixture();
    let result = result_with(
        vec![
            (KV_COMPONENT, ComponentStatus::Healthy),
            ("gpu", ComponentStatus::Degraded),
            ("port_8501", ComponentStatus::Unhealthy),
        ],
        OverallStatus::Critical,
    );

    f.bridge.on_health_result(&result).await;

    assert_eq!(
        f.metrics
            .component_health_status
            .with_label_values(&[KV_COMPONENT])
            .get(),
        0
    );
    assert_eq!(
        f.metrics
            .component_health_status
            .with_label_values(&["gpu"])
            .get(),
        1
    );
    assert_eq!(
        f.metrics
            .component_health_status
            .with_label_values(&["port_8501"])
            .get(),
        2
    );
    assert_eq!(f.metrics.system_health_status.get(), 3);
}

#[tokio::test]
async fn health_ratios_feed_the_risk_side() {
    let f = fixture();
    assert!(f.bridge.component_health_ratios().is_none());

    let result = result_with(
        vec![
            (KV_COMPONENT, ComponentStatus::Healthy),
            ("gpu", ComponentStatus::Degraded),
            ("port_8501", ComponentStatus::Unhealthy),
            ("port_8502", ComponentStatus::Healthy),
        ],
        OverallStatus::Critical,
    );
    f.bridge.on_health_result(&result).await;

    let (kv, gpu, network) = f.bridge.component_health_ratios().unwrap();
    assert_eq!(kv, 1.0);
    assert_eq!(gpu, 0.5);
    assert_eq!(network, 0.0, "worst port wins");
}
