//! Monitoring service
//!
//! Owns the exported metric registry and the periodic collection loop:
//! system metrics through the system API, GPU metrics through a bounded
//! `rocm-smi` call, business metrics from the KV portfolio keys. The text
//! exposition is served over HTTP by [`exporter`].

pub mod exporter;
pub mod metrics;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sysinfo::{Disks, System};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use services_common::constants::keys;
use services_common::{KernelError, KernelResult, KvStore};

pub use exporter::{router, serve};
pub use metrics::KernelMetrics;

/// Collector configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Exposition port
    pub port: u16,
    /// Interval between collection cycles
    pub collection_interval: Duration,
    /// GPU subprocess timeout
    pub gpu_timeout: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            collection_interval: Duration::from_secs(10),
            gpu_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of one collection cycle
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CollectionResult {
    /// Gauges updated this cycle
    pub metrics_updated: usize,
    /// Collection groups that failed
    pub errors: usize,
    pub duration_ms: u64,
}

/// Collector status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CollectorStatus {
    pub running: bool,
    pub port: u16,
    pub collection_interval_s: u64,
    pub collection_count: u64,
    pub error_count: u64,
    pub last_collection: Option<DateTime<Utc>>,
}

/// Periodic metrics collector
pub struct MetricsCollector {
    metrics: Arc<KernelMetrics>,
    kv: Option<Arc<dyn KvStore>>,
    config: MetricsConfig,
    sys: Mutex<System>,
    running_tx: watch::Sender<bool>,
    running: AtomicBool,
    collection_count: AtomicU64,
    error_count: AtomicU64,
    last_collection: RwLock<Option<DateTime<Utc>>>,
}

impl MetricsCollector {
    pub fn new(
        metrics: Arc<KernelMetrics>,
        kv: Option<Arc<dyn KvStore>>,
        config: MetricsConfig,
    ) -> KernelResult<Self> {
        if config.port == 0 {
            return Err(KernelError::BadInput(
                "metrics port must be in 1..=65535".to_string(),
            ));
        }
        if config.collection_interval < Duration::from_secs(1) {
            return Err(KernelError::BadInput(format!(
                "collection interval must be >= 1s: {:?}",
                config.collection_interval
            )));
        }

        info!(
            port = config.port,
            interval_s = config.collection_interval.as_secs(),
            "metrics collector initialized"
        );

        let (running_tx, _) = watch::channel(false);

        Ok(Self {
            metrics,
            kv,
            config,
            sys: Mutex::new(System::new()),
            running_tx,
            running: AtomicBool::new(false),
            collection_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            last_collection: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<KernelMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Spawn the periodic collection loop; rejects when already running
    pub fn start(self: &Arc<Self>) -> KernelResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(KernelError::AlreadyRunning("metrics collector"));
        }
        self.running_tx.send_replace(true);

        let collector = Arc::clone(self);
        let mut running = self.running_tx.subscribe();
        tokio::spawn(async move {
            info!(
                interval_s = collector.config.collection_interval.as_secs(),
                "collection loop started"
            );
            loop {
                let result = collector.collect_all().await;
                debug!(
                    updated = result.metrics_updated,
                    errors = result.errors,
                    duration_ms = result.duration_ms,
                    "collection cycle complete"
                );

                if !*running.borrow() {
                    break;
                }
                tokio::select! {
                    () = tokio::time::sleep(collector.config.collection_interval) => {}
                    changed = running.changed() => {
                        if changed.is_err() || !*running.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("collection loop stopped");
        });

        Ok(())
    }

    /// Stop the collection loop after the current cycle
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.running_tx.send_replace(false);
            info!("metrics collector stopping");
        }
    }

    /// Run one collection cycle over all groups
    ///
    /// Every cycle either updates at least one gauge or records an error;
    /// the cycle counter increases either way.
    pub async fn collect_all(&self) -> CollectionResult {
        let started = std::time::Instant::now();
        let mut updated = 0;
        let mut errors = 0;

        match self.collect_system().await {
            Ok(count) => updated += count,
            Err(e) => {
                warn!(error = %e, "system metrics collection failed");
                errors += 1;
            }
        }

        match self.collect_gpu().await {
            Ok(count) => updated += count,
            Err(e) => {
                debug!(error = %e, "gpu metrics unavailable");
                errors += 1;
            }
        }

        match self.collect_business().await {
            Ok(count) => updated += count,
            Err(e) => {
                warn!(error = %e, "business metrics collection failed");
                errors += 1;
            }
        }

        self.collection_count.fetch_add(1, Ordering::Relaxed);
        self.error_count.fetch_add(errors as u64, Ordering::Relaxed);
        *self.last_collection.write() = Some(Utc::now());

        CollectionResult {
            metrics_updated: updated,
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// CPU, memory, and per-drive disk gauges
    async fn collect_system(&self) -> KernelResult<usize> {
        const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
        let mut updated = 0;

        {
            let mut sys = self.sys.lock();
            sys.refresh_cpu_usage();
        }
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        {
            let mut sys = self.sys.lock();
            sys.refresh_cpu_usage();
            sys.refresh_memory();

            self.metrics
                .system_cpu_percent
                .set(f64::from(sys.global_cpu_info().cpu_usage()));
            updated += 1;

            let total = sys.total_memory();
            if total > 0 {
                let available = sys.available_memory();
                let used_pct = ((total - available.min(total)) as f64 / total as f64) * 100.0;
                self.metrics.system_memory_percent.set(used_pct);
                self.metrics
                    .system_memory_available_gb
                    .set(available as f64 / GIB);
                updated += 2;
            }
        }

        let disks = Disks::new_with_refreshed_list();
        for disk in disks.list() {
            let total = disk.total_space();
            if total == 0 {
                continue;
            }
            let available = disk.available_space();
            let used_pct = ((total - available.min(total)) as f64 / total as f64) * 100.0;
            let drive = disk.mount_point().to_string_lossy().to_string();

            self.metrics
                .system_disk_percent
                .with_label_values(&[&drive])
                .set(used_pct);
            self.metrics
                .system_disk_free_gb
                .with_label_values(&[&drive])
                .set(available as f64 / GIB);
            updated += 2;
        }

        Ok(updated)
    }

    /// GPU gauges parsed out of `rocm-smi`; parse misses skip the gauge
    async fn collect_gpu(&self) -> KernelResult<usize> {
        let output = timeout(
            self.config.gpu_timeout,
            Command::new("rocm-smi")
                .arg("--showmeminfo")
                .arg("vram")
                .arg("--showuse")
                .arg("--showtemp")
                .output(),
        )
        .await
        .map_err(|_| KernelError::Probe("rocm-smi timed out".to_string()))?
        .map_err(|e| KernelError::Probe(format!("rocm-smi spawn failed: {e}")))?;

        if !output.status.success() {
            return Err(KernelError::Probe(format!(
                "rocm-smi exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut updated = 0;

        let used = parse_metric_line(&stdout, "vram total used memory");
        let total = parse_metric_line(&stdout, "vram total memory");
        if let Some(used) = used {
            self.metrics.gpu_memory_used_bytes.set(used as i64);
            updated += 1;
        }
        if let Some(total) = total {
            self.metrics.gpu_memory_total_bytes.set(total as i64);
            updated += 1;
        }
        if let (Some(used), Some(total)) = (used, total) {
            if total > 0.0 {
                self.metrics
                    .gpu_fragmentation_ratio
                    .set(1.0 - (used / total));
                updated += 1;
            }
        }
        if let Some(use_pct) = parse_metric_line(&stdout, "gpu use (%)") {
            self.metrics.gpu_utilization_percent.set(use_pct);
            updated += 1;
        }
        if let Some(temp) = parse_metric_line(&stdout, "temperature") {
            self.metrics.gpu_temperature_celsius.set(temp);
            updated += 1;
        }

        Ok(updated)
    }

    /// Portfolio and mode gauges from the KV
    async fn collect_business(&self) -> KernelResult<usize> {
        let Some(kv) = &self.kv else {
            return Ok(0);
        };
        let mut updated = 0;

        if let Some(value) = kv.get_f64(keys::TOTAL_VALUE).await? {
            self.metrics.portfolio_value.set(value);
            updated += 1;
        }
        if let Some(cash) = kv.get_f64(keys::AVAILABLE_CASH).await? {
            self.metrics.portfolio_cash.set(cash);
            updated += 1;
        }
        if let Some(positions) = kv.get_i64(keys::POSITIONS_COUNT).await? {
            self.metrics.portfolio_positions.set(positions);
            updated += 1;
        }
        if let Some(daily) = kv.get_f64(keys::DAILY_PNL).await? {
            self.metrics
                .portfolio_pnl
                .with_label_values(&["daily"])
                .set(daily);
            updated += 1;
        }
        if let Some(total) = kv.get_f64(keys::TOTAL_PNL).await? {
            self.metrics
                .portfolio_pnl
                .with_label_values(&["total"])
                .set(total);
            updated += 1;
        }
        if let Some(mode) = kv.get(keys::SOLDIER_MODE).await? {
            self.metrics
                .soldier_mode
                .set(i64::from(mode == "cloud"));
            updated += 1;
        }

        Ok(updated)
    }

    #[must_use]
    pub fn status(&self) -> CollectorStatus {
        CollectorStatus {
            running: self.running.load(Ordering::Acquire),
            port: self.config.port,
            collection_interval_s: self.config.collection_interval.as_secs(),
            collection_count: self.collection_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            last_collection: *self.last_collection.read(),
        }
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.config.port
    }
}

/// Last numeric token of the first line containing `needle`
/// (case-insensitive), tolerant of unit suffixes
fn parse_metric_line(output: &str, needle: &str) -> Option<f64> {
    let needle = needle.to_lowercase();
    let line = output
        .lines()
        .find(|line| line.to_lowercase().contains(&needle))?;

    line.split_whitespace()
        .rev()
        .find_map(|token| {
            let trimmed: String = token
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            trimmed.parse::<f64>().ok()
        })
}
