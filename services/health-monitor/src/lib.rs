//! Health Monitor
//!
//! Periodic multi-component probing for the safety kernel:
//! - KV liveness (PING with bounded timeout)
//! - TCP port reachability
//! - Disk, memory, and CPU via the system API
//! - GPU via a bounded `rocm-smi` subprocess call
//!
//! A probe failure never aborts the pass; it becomes an `unhealthy` sample
//! with the cause in the message. When the KV probe fails, recovery retries
//! on the fixed 1s, 2s, 4s backoff schedule.

pub mod supervisor;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sysinfo::{Disks, System};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info, warn};

use services_common::{KernelError, KernelResult, KvStore};

pub use supervisor::{FundProbe, HealthObserver, HealthProbe, Supervisor, SupervisorConfig};

/// Status of a single monitored component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Numeric value exported as a gauge (0=healthy, 1=degraded, 2=unhealthy)
    #[must_use]
    pub fn as_value(self) -> i64 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Unhealthy => 2,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Aggregated status of one probe pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl OverallStatus {
    /// Numeric value exported as a gauge (0..=3)
    #[must_use]
    pub fn as_value(self) -> i64 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Unhealthy => 2,
            Self::Critical => 3,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Critical => "critical",
        }
    }
}

/// Per-component result of a single probe
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub message: String,
    pub metrics: FxHashMap<String, f64>,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            metrics: FxHashMap::default(),
        }
    }

    fn with_metrics(
        status: ComponentStatus,
        message: impl Into<String>,
        metrics: FxHashMap<String, f64>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            metrics,
        }
    }
}

/// Snapshot aggregation of one probe pass
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub overall_status: OverallStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    pub timestamp: DateTime<Utc>,
}

/// Name of the KV component in probe results
pub const KV_COMPONENT: &str = "kv";

/// Health checker configuration
#[derive(Debug, Clone)]
pub struct HealthCheckerConfig {
    /// KV PING timeout
    pub kv_timeout: Duration,
    /// GPU subprocess timeout
    pub gpu_timeout: Duration,
    /// Per-port TCP connect timeout
    pub port_timeout: Duration,
    /// TCP ports probed each pass (dashboards, sidecars)
    pub probe_ports: Vec<u16>,
    /// Interval between probe passes
    pub check_interval: Duration,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            kv_timeout: Duration::from_secs(5),
            gpu_timeout: Duration::from_secs(5),
            port_timeout: Duration::from_secs(2),
            probe_ports: vec![8501, 8502],
            check_interval: Duration::from_secs(30),
        }
    }
}

/// Multi-component health checker
pub struct HealthChecker {
    kv: Arc<dyn KvStore>,
    config: HealthCheckerConfig,
    sys: Mutex<System>,
}

impl HealthChecker {
    pub fn new(kv: Arc<dyn KvStore>, config: HealthCheckerConfig) -> KernelResult<Self> {
        if config.kv_timeout.is_zero() {
            return Err(KernelError::BadInput(
                "kv timeout must be positive".to_string(),
            ));
        }
        if config.check_interval.is_zero() {
            return Err(KernelError::BadInput(
                "check interval must be positive".to_string(),
            ));
        }

        info!(
            kv_timeout_s = config.kv_timeout.as_secs(),
            interval_s = config.check_interval.as_secs(),
            ports = ?config.probe_ports,
            "health checker initialized"
        );

        Ok(Self {
            kv,
            config,
            sys: Mutex::new(System::new()),
        })
    }

    #[must_use]
    pub fn check_interval(&self) -> Duration {
        self.config.check_interval
    }

    /// Execute a full probe pass
    ///
    /// Component probes are sequenced, never interleaved, so metric labels
    /// stay stable across passes.
    pub async fn run_health_check(&self) -> HealthCheckResult {
        let mut components = BTreeMap::new();

        components.insert(KV_COMPONENT.to_string(), self.check_kv().await);
        for port in self.config.probe_ports.clone() {
            components.insert(format!("port_{port}"), self.check_port(port).await);
        }
        components.insert("disk".to_string(), self.check_disk());
        components.insert("memory".to_string(), self.check_memory());
        components.insert("cpu".to_string(), self.check_cpu().await);
        components.insert("gpu".to_string(), self.check_gpu().await);

        let overall_status = Self::overall_status(&components);

        HealthCheckResult {
            overall_status,
            components,
            timestamp: Utc::now(),
        }
    }

    /// PING the KV with a bounded timeout
    pub async fn check_kv(&self) -> ComponentHealth {
        let start = Instant::now();
        match timeout(self.config.kv_timeout, self.kv.ping()).await {
            Ok(Ok(())) => {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                let mut metrics = FxHashMap::default();
                metrics.insert("latency_ms".to_string(), latency_ms);
                ComponentHealth::with_metrics(
                    ComponentStatus::Healthy,
                    format!("kv reachable, latency {latency_ms:.2}ms"),
                    metrics,
                )
            }
            Ok(Err(e)) => {
                warn!(error = %e, "kv ping failed");
                ComponentHealth::new(ComponentStatus::Unhealthy, format!("kv ping failed: {e}"))
            }
            Err(_) => {
                warn!(timeout_s = self.config.kv_timeout.as_secs(), "kv ping timed out");
                ComponentHealth::new(
                    ComponentStatus::Unhealthy,
                    format!(
                        "kv ping timed out after {}s",
                        self.config.kv_timeout.as_secs()
                    ),
                )
            }
        }
    }

    async fn check_port(&self, port: u16) -> ComponentHealth {
        let mut metrics = FxHashMap::default();
        metrics.insert("port".to_string(), f64::from(port));

        match timeout(self.config.port_timeout, TcpStream::connect(("127.0.0.1", port))).await {
            Ok(Ok(_)) => {
                metrics.insert("accessible".to_string(), 1.0);
                ComponentHealth::with_metrics(
                    ComponentStatus::Healthy,
                    format!("port {port} accessible"),
                    metrics,
                )
            }
            Ok(Err(e)) => {
                metrics.insert("accessible".to_string(), 0.0);
                ComponentHealth::with_metrics(
                    ComponentStatus::Unhealthy,
                    format!("port {port} not accessible: {e}"),
                    metrics,
                )
            }
            Err(_) => {
                metrics.insert("accessible".to_string(), 0.0);
                ComponentHealth::with_metrics(
                    ComponentStatus::Unhealthy,
                    format!("port {port} connect timed out"),
                    metrics,
                )
            }
        }
    }

    fn check_disk(&self) -> ComponentHealth {
        const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

        let disks = Disks::new_with_refreshed_list();
        let total: u64 = disks.list().iter().map(sysinfo::Disk::total_space).sum();
        let available: u64 = disks.list().iter().map(sysinfo::Disk::available_space).sum();

        if total == 0 {
            return ComponentHealth::new(ComponentStatus::Unhealthy, "no disks visible");
        }

        let free_pct = (available as f64 / total as f64) * 100.0;
        let used_pct = 100.0 - free_pct;

        let (status, message) = if free_pct > 20.0 {
            (ComponentStatus::Healthy, format!("disk space ok: {free_pct:.1}% free"))
        } else if free_pct > 10.0 {
            (ComponentStatus::Degraded, format!("disk space low: {free_pct:.1}% free"))
        } else {
            (ComponentStatus::Unhealthy, format!("disk space critical: {free_pct:.1}% free"))
        };

        let mut metrics = FxHashMap::default();
        metrics.insert("total_gb".to_string(), total as f64 / GIB);
        metrics.insert("free_gb".to_string(), available as f64 / GIB);
        metrics.insert("used_pct".to_string(), used_pct);
        metrics.insert("free_pct".to_string(), free_pct);

        ComponentHealth::with_metrics(status, message, metrics)
    }

    fn check_memory(&self) -> ComponentHealth {
        const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

        let mut sys = self.sys.lock();
        sys.refresh_memory();
        let total = sys.total_memory();
        let available = sys.available_memory();
        drop(sys);

        if total == 0 {
            return ComponentHealth::new(ComponentStatus::Unhealthy, "memory stats unavailable");
        }

        let used_pct = ((total - available.min(total)) as f64 / total as f64) * 100.0;

        let (status, message) = if used_pct < 80.0 {
            (ComponentStatus::Healthy, format!("memory use ok: {used_pct:.1}%"))
        } else if used_pct < 90.0 {
            (ComponentStatus::Degraded, format!("memory use high: {used_pct:.1}%"))
        } else {
            (ComponentStatus::Unhealthy, format!("memory use critical: {used_pct:.1}%"))
        };

        let mut metrics = FxHashMap::default();
        metrics.insert("total_gb".to_string(), total as f64 / GIB);
        metrics.insert("available_gb".to_string(), available as f64 / GIB);
        metrics.insert("used_pct".to_string(), used_pct);

        ComponentHealth::with_metrics(status, message, metrics)
    }

    async fn check_cpu(&self) -> ComponentHealth {
        // Two refreshes separated by the minimum interval give a usable
        // usage sample; the lock is dropped across the sleep.
        {
            let mut sys = self.sys.lock();
            sys.refresh_cpu_usage();
        }
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        let cpu_pct = {
            let mut sys = self.sys.lock();
            sys.refresh_cpu_usage();
            f64::from(sys.global_cpu_info().cpu_usage())
        };

        let (status, message) = if cpu_pct < 80.0 {
            (ComponentStatus::Healthy, format!("cpu use ok: {cpu_pct:.1}%"))
        } else if cpu_pct < 95.0 {
            (ComponentStatus::Degraded, format!("cpu use high: {cpu_pct:.1}%"))
        } else {
            (ComponentStatus::Unhealthy, format!("cpu use critical: {cpu_pct:.1}%"))
        };

        let mut metrics = FxHashMap::default();
        metrics.insert("cpu_percent".to_string(), cpu_pct);

        ComponentHealth::with_metrics(status, message, metrics)
    }

    /// Probe the GPU through `rocm-smi` with a bounded timeout
    pub async fn check_gpu(&self) -> ComponentHealth {
        let mut metrics = FxHashMap::default();

        let output = timeout(
            self.config.gpu_timeout,
            Command::new("rocm-smi")
                .arg("--showmeminfo")
                .arg("vram")
                .output(),
        )
        .await;

        match output {
            Err(_) => {
                warn!(timeout_s = self.config.gpu_timeout.as_secs(), "gpu probe timed out");
                metrics.insert("available".to_string(), 0.0);
                ComponentHealth::with_metrics(ComponentStatus::Unhealthy, "gpu probe timed out", metrics)
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                metrics.insert("available".to_string(), 0.0);
                ComponentHealth::with_metrics(
                    ComponentStatus::Degraded,
                    "rocm-smi not installed, gpu state unknown",
                    metrics,
                )
            }
            Ok(Err(e)) => {
                error!(error = %e, "gpu probe failed to spawn");
                metrics.insert("available".to_string(), 0.0);
                ComponentHealth::with_metrics(
                    ComponentStatus::Unhealthy,
                    format!("gpu probe failed: {e}"),
                    metrics,
                )
            }
            Ok(Ok(out)) => {
                if out.status.success() {
                    if out.stdout.is_empty() {
                        metrics.insert("available".to_string(), 0.5);
                        ComponentHealth::with_metrics(
                            ComponentStatus::Degraded,
                            "gpu reported no data",
                            metrics,
                        )
                    } else {
                        metrics.insert("available".to_string(), 1.0);
                        ComponentHealth::with_metrics(ComponentStatus::Healthy, "gpu ok", metrics)
                    }
                } else {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    metrics.insert("available".to_string(), 0.0);
                    ComponentHealth::with_metrics(
                        ComponentStatus::Unhealthy,
                        format!("rocm-smi failed: {}", stderr.trim()),
                        metrics,
                    )
                }
            }
        }
    }

    /// Retry the KV on the fixed backoff schedule
    ///
    /// Sleeps 1s, 2s, 4s before the respective attempts, returning on the
    /// first healthy probe. Three failures take 7s of sleep in total.
    pub async fn attempt_kv_recovery(&self) -> bool {
        const BACKOFF_SECS: [u64; 3] = [1, 2, 4];

        info!("starting kv recovery (backoff 1s, 2s, 4s)");

        for (i, delay) in BACKOFF_SECS.iter().enumerate() {
            let attempt = i + 1;
            info!(attempt, delay_s = delay, "kv recovery attempt");
            tokio::time::sleep(Duration::from_secs(*delay)).await;

            let health = self.check_kv().await;
            if health.status == ComponentStatus::Healthy {
                info!(attempt, "kv recovery succeeded");
                return true;
            }
            warn!(attempt, message = %health.message, "kv recovery attempt failed");
        }

        error!("kv recovery failed after 3 attempts");
        false
    }

    /// Critical iff any component is unhealthy; degraded iff at least one
    /// is degraded and none unhealthy; healthy otherwise.
    fn overall_status(components: &BTreeMap<String, ComponentHealth>) -> OverallStatus {
        let has_unhealthy = components
            .values()
            .any(|c| c.status == ComponentStatus::Unhealthy);
        let has_degraded = components
            .values()
            .any(|c| c.status == ComponentStatus::Degraded);

        if has_unhealthy {
            OverallStatus::Critical
        } else if has_degraded {
            OverallStatus::Degraded
        } else {
            OverallStatus::Healthy
        }
    }
}
