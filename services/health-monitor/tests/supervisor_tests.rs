//! Unit tests for the two-loop supervisor

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use health_monitor::{
    FundProbe, HealthCheckResult, HealthObserver, HealthProbe, OverallStatus, Supervisor,
    SupervisorConfig,
};
use services_common::KernelError;

struct CountingProbe {
    runs: AtomicU32,
}

#[async_trait]
impl HealthProbe for CountingProbe {
    async fn run_health_check(&self) -> HealthCheckResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        HealthCheckResult {
            overall_status: OverallStatus::Healthy,
            components: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }
}

struct NullObserver;

#[async_trait]
impl HealthObserver for NullObserver {
    async fn on_health_result(&self, _result: &HealthCheckResult) {}
}

struct CountingFund {
    ticks: AtomicU32,
}

#[async_trait]
impl FundProbe for CountingFund {
    async fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }
}

fn build(
    health_interval: Duration,
    fund_interval: Duration,
) -> (Arc<Supervisor>, Arc<CountingProbe>, Arc<CountingFund>) {
    let probe = Arc::new(CountingProbe {
        runs: AtomicU32::new(0),
    });
    let fund = Arc::new(CountingFund {
        ticks: AtomicU32::new(0),
    });
    let config = SupervisorConfig {
        health_interval,
        fund_interval,
        join_timeout: Duration::from_secs(5),
    };
    let supervisor = Supervisor::new(
        Arc::clone(&probe) as Arc<dyn HealthProbe>,
        Arc::new(NullObserver),
        Arc::clone(&fund) as Arc<dyn FundProbe>,
        config,
    )
    .unwrap();
    (Arc::new(supervisor), probe, fund)
}

#[test]
fn zero_intervals_are_rejected() {
    let probe = Arc::new(CountingProbe {
        runs: AtomicU32::new(0),
    });
    let fund = Arc::new(CountingFund {
        ticks: AtomicU32::new(0),
    });
    let config = SupervisorConfig {
        health_interval: Duration::ZERO,
        ..SupervisorConfig::default()
    };
    let result = Supervisor::new(probe, Arc::new(NullObserver), fund, config);
    assert!(matches!(result, Err(KernelError::BadInput(_))));
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let (supervisor, _, _) = build(Duration::from_secs(30), Duration::from_secs(60));
    supervisor.start().unwrap();
    assert!(matches!(
        supervisor.start(),
        Err(KernelError::AlreadyRunning(_))
    ));
    supervisor.graceful_shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn health_loop_ticks_on_its_interval() {
    // Observation window of 60s with a 30s interval: ticks at 0, 30, 60.
    let (supervisor, probe, _) = build(Duration::from_secs(30), Duration::from_secs(3600));
    supervisor.start().unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    let runs = probe.runs.load(Ordering::SeqCst);
    supervisor.graceful_shutdown().await;

    assert!(
        (2..=3).contains(&runs),
        "expected 2-3 probe passes in a 60s window, got {runs}"
    );
}

#[tokio::test(start_paused = true)]
async fn fund_loop_is_independent_of_health_loop() {
    let (supervisor, probe, fund) = build(Duration::from_secs(30), Duration::from_secs(60));
    supervisor.start().unwrap();

    tokio::time::sleep(Duration::from_secs(121)).await;
    let runs = probe.runs.load(Ordering::SeqCst);
    let ticks = fund.ticks.load(Ordering::SeqCst);
    supervisor.graceful_shutdown().await;

    assert!((4..=6).contains(&runs), "health runs: {runs}");
    assert!((2..=3).contains(&ticks), "fund ticks: {ticks}");
}

#[tokio::test]
async fn shutdown_stops_both_loops() {
    let (supervisor, probe, _) = build(Duration::from_millis(10), Duration::from_millis(10));
    supervisor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(35)).await;
    supervisor.graceful_shutdown().await;
    assert!(!supervisor.is_running());

    let after = probe.runs.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        probe.runs.load(Ordering::SeqCst),
        after,
        "no probes after shutdown"
    );
}

#[tokio::test]
async fn shutdown_without_start_is_a_warning_not_a_panic() {
    let (supervisor, _, _) = build(Duration::from_secs(30), Duration::from_secs(60));
    supervisor.graceful_shutdown().await;
    assert!(!supervisor.is_running());
}
