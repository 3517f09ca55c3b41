//! Supervisor for the two periodic probe loops
//!
//! Runs the health probe loop (default every 30s) and the fund/risk probe
//! loop (default every 60s) as independent tasks. Each tick executes the
//! full pass, hands the result to the observer, then sleeps until the next
//! tick; ticks never overlap. Shutdown is cooperative: the running flag
//! flips, each loop observes it and exits, and the controller joins every
//! loop with a bounded timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use services_common::{KernelError, KernelResult};

use crate::{HealthCheckResult, HealthChecker, OverallStatus};

/// Source of probe passes; the production implementation is [`HealthChecker`]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn run_health_check(&self) -> HealthCheckResult;
}

#[async_trait]
impl HealthProbe for HealthChecker {
    async fn run_health_check(&self) -> HealthCheckResult {
        Self::run_health_check(self).await
    }
}

/// Receives every probe result; KV recovery is the observer's call so a
/// recovery in flight is visible to the alerting side
#[async_trait]
pub trait HealthObserver: Send + Sync {
    async fn on_health_result(&self, result: &HealthCheckResult);
}

/// One tick of the fund/risk loop
#[async_trait]
pub trait FundProbe: Send + Sync {
    async fn tick(&self);
}

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub health_interval: Duration,
    pub fund_interval: Duration,
    /// Per-loop join timeout during shutdown
    pub join_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(30),
            fund_interval: Duration::from_secs(60),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Manages the two probe loops for unattended operation
pub struct Supervisor {
    probe: Arc<dyn HealthProbe>,
    observer: Arc<dyn HealthObserver>,
    fund_probe: Arc<dyn FundProbe>,
    config: SupervisorConfig,
    running_tx: watch::Sender<bool>,
    started: AtomicBool,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Supervisor {
    pub fn new(
        probe: Arc<dyn HealthProbe>,
        observer: Arc<dyn HealthObserver>,
        fund_probe: Arc<dyn FundProbe>,
        config: SupervisorConfig,
    ) -> KernelResult<Self> {
        if config.health_interval.is_zero() {
            return Err(KernelError::BadInput(
                "health interval must be positive".to_string(),
            ));
        }
        if config.fund_interval.is_zero() {
            return Err(KernelError::BadInput(
                "fund interval must be positive".to_string(),
            ));
        }

        let (running_tx, _) = watch::channel(false);

        info!(
            health_interval_s = config.health_interval.as_secs(),
            fund_interval_s = config.fund_interval.as_secs(),
            "supervisor initialized"
        );

        Ok(Self {
            probe,
            observer,
            fund_probe,
            config,
            running_tx,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn both loops; rejects when already running
    pub fn start(&self) -> KernelResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(KernelError::AlreadyRunning("supervisor"));
        }

        self.running_tx.send_replace(true);

        let health = self.spawn_health_loop();
        let fund = self.spawn_fund_loop();

        let mut tasks = self.tasks.lock();
        tasks.push(("health", health));
        tasks.push(("fund", fund));

        info!("supervisor loops started");
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn spawn_health_loop(&self) -> JoinHandle<()> {
        let probe = Arc::clone(&self.probe);
        let observer = Arc::clone(&self.observer);
        let interval = self.config.health_interval;
        let mut running = self.running_tx.subscribe();

        tokio::spawn(async move {
            info!(interval_s = interval.as_secs(), "health loop started");

            loop {
                let result = probe.run_health_check().await;

                match result.overall_status {
                    OverallStatus::Critical => {
                        error!(status = result.overall_status.as_str(), "system status critical");
                    }
                    OverallStatus::Unhealthy | OverallStatus::Degraded => {
                        warn!(status = result.overall_status.as_str(), "system status degraded");
                    }
                    OverallStatus::Healthy => {
                        info!(status = result.overall_status.as_str(), "system status ok");
                    }
                }

                observer.on_health_result(&result).await;

                if !*running.borrow() {
                    break;
                }
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    changed = running.changed() => {
                        if changed.is_err() || !*running.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("health loop stopped");
        })
    }

    fn spawn_fund_loop(&self) -> JoinHandle<()> {
        let fund_probe = Arc::clone(&self.fund_probe);
        let interval = self.config.fund_interval;
        let mut running = self.running_tx.subscribe();

        tokio::spawn(async move {
            info!(interval_s = interval.as_secs(), "fund loop started");

            loop {
                fund_probe.tick().await;

                if !*running.borrow() {
                    break;
                }
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    changed = running.changed() => {
                        if changed.is_err() || !*running.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("fund loop stopped");
        })
    }

    /// Flip the running flag and join each loop with the configured timeout
    ///
    /// A loop that misses the timeout is logged and abandoned; shutdown
    /// still proceeds.
    pub async fn graceful_shutdown(&self) {
        if !self.started.load(Ordering::Acquire) {
            warn!("supervisor not running, nothing to shut down");
            return;
        }

        info!("supervisor shutting down");
        self.running_tx.send_replace(false);

        let tasks: Vec<(&'static str, JoinHandle<()>)> = self.tasks.lock().drain(..).collect();
        for (name, handle) in tasks {
            match timeout(self.config.join_timeout, handle).await {
                Ok(_) => info!(task = name, "loop stopped"),
                Err(_) => warn!(
                    task = name,
                    timeout_s = self.config.join_timeout.as_secs(),
                    "loop did not stop within join timeout"
                ),
            }
        }

        self.started.store(false, Ordering::Release);
        info!("supervisor shutdown complete");
    }
}
