//! Doomsday switch
//!
//! Persistent, password-gated kill switch. Triggered state is the
//! disjunction of three observables: the in-memory flag, the lockfile on
//! disk, and the KV flag. Trigger conditions cover consecutive KV and GPU
//! probe failures, critical memory or disk pressure, and the daily loss
//! threshold. Reset requires the exact secret stored in the KV; the switch
//! only ever reads that secret.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use sysinfo::{Disks, System};
use tracing::{debug, error, info, warn};

use services_common::constants::{channels, keys};
use services_common::KvStore;

/// Trigger thresholds and the lockfile location
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Consecutive KV probe failures before firing
    pub kv_failure_threshold: i64,
    /// Consecutive GPU probe failures before firing
    pub gpu_failure_threshold: i64,
    /// Memory use ratio above which the switch fires (strict)
    pub memory_critical_threshold: f64,
    /// Disk use ratio above which the switch fires (strict)
    pub disk_critical_threshold: f64,
    /// Daily P&L ratio below which the switch fires
    pub loss_threshold: f64,
    /// P&L ratio below which liquidation is also signalled
    pub liquidation_threshold: f64,
    pub lock_file_path: PathBuf,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            kv_failure_threshold: 3,
            gpu_failure_threshold: 3,
            memory_critical_threshold: 0.95,
            disk_critical_threshold: 0.95,
            loss_threshold: -0.10,
            liquidation_threshold: -0.15,
            lock_file_path: PathBuf::from("data/doomsday.lock"),
        }
    }
}

/// Kill-switch state snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct DoomsdayStatus {
    pub is_triggered: bool,
    pub trigger_time: Option<DateTime<Utc>>,
    pub trigger_reason: Option<String>,
    pub triggers_fired: Vec<String>,
}

/// Source of memory/disk use ratios; injectable for tests
pub trait SystemSampler: Send + Sync {
    /// Memory in use as a fraction of total (0..=1)
    fn memory_used_ratio(&self) -> f64;
    /// Fullest reasonable view of disk use as a fraction (0..=1)
    fn disk_used_ratio(&self) -> f64;
}

/// Production sampler over the system API
pub struct SysinfoSampler;

impl SystemSampler for SysinfoSampler {
    fn memory_used_ratio(&self) -> f64 {
        let mut sys = System::new();
        sys.refresh_memory();
        let total = sys.total_memory();
        if total == 0 {
            return 0.0;
        }
        sys.used_memory() as f64 / total as f64
    }

    fn disk_used_ratio(&self) -> f64 {
        let disks = Disks::new_with_refreshed_list();
        let total: u64 = disks.list().iter().map(sysinfo::Disk::total_space).sum();
        if total == 0 {
            return 0.0;
        }
        let available: u64 = disks.list().iter().map(sysinfo::Disk::available_space).sum();
        (total - available.min(total)) as f64 / total as f64
    }
}

/// The kill switch
pub struct DoomsdaySwitch {
    kv: Option<Arc<dyn KvStore>>,
    config: TriggerConfig,
    sampler: Arc<dyn SystemSampler>,
    status: RwLock<DoomsdayStatus>,
}

impl DoomsdaySwitch {
    /// Build the switch; an existing lockfile means it starts triggered
    pub fn new(
        kv: Option<Arc<dyn KvStore>>,
        config: TriggerConfig,
        sampler: Arc<dyn SystemSampler>,
    ) -> Self {
        let mut status = DoomsdayStatus::default();

        if config.lock_file_path.exists() {
            status.is_triggered = true;
            warn!(lock_file = %config.lock_file_path.display(), "doomsday lock file present at startup");
        }

        info!(lock_file = %config.lock_file_path.display(), "doomsday switch initialized");

        Self {
            kv,
            config,
            sampler,
            status: RwLock::new(status),
        }
    }

    /// Conditions currently warranting a trigger
    pub async fn check_triggers(&self) -> Vec<String> {
        let mut fired = Vec::new();

        let kv_failures = self.counter(keys::REDIS_FAILURES).await;
        if kv_failures >= self.config.kv_failure_threshold {
            fired.push(format!("Redis failures: {kv_failures}"));
        }

        let gpu_failures = self.counter(keys::GPU_FAILURES).await;
        if gpu_failures >= self.config.gpu_failure_threshold {
            fired.push(format!("GPU failures: {gpu_failures}"));
        }

        let memory = self.sampler.memory_used_ratio();
        if memory > self.config.memory_critical_threshold {
            fired.push(format!("Memory critical: {:.1}%", memory * 100.0));
        }

        let disk = self.sampler.disk_used_ratio();
        if disk > self.config.disk_critical_threshold {
            fired.push(format!("Disk critical: {:.1}%", disk * 100.0));
        }

        let pnl_ratio = self.pnl_ratio().await;
        if pnl_ratio < self.config.loss_threshold {
            fired.push(format!("Loss threshold: {:.2}%", pnl_ratio * 100.0));
        }

        fired
    }

    /// Engage the kill switch
    ///
    /// Persists the lockfile and KV flags, signals the trading engine to
    /// stop, signals liquidation when the loss is severe, and notifies.
    pub async fn trigger(&self, reason: &str) {
        error!(reason, "DOOMSDAY TRIGGERED");

        {
            let mut status = self.status.write();
            status.is_triggered = true;
            status.trigger_time = Some(Utc::now());
            status.trigger_reason = Some(reason.to_string());
        }

        self.write_lock_file(reason);
        self.persist_kv_flags(reason).await;
        self.signal_stop().await;

        if self.pnl_ratio().await < self.config.liquidation_threshold {
            self.signal_liquidation().await;
        }

        self.send_alert(reason);
    }

    /// Authenticated reset; returns whether the switch was cleared
    ///
    /// The secret is read from the KV on every attempt and compared
    /// byte-for-byte. An empty password is never valid. Resetting an
    /// already-clear switch with the right password still succeeds.
    pub async fn reset(&self, password: &str) -> bool {
        if password.is_empty() {
            error!("doomsday reset rejected: empty password");
            return false;
        }

        let Some(expected) = self.reset_secret().await else {
            error!("doomsday reset rejected: no reset secret configured");
            return false;
        };

        if password != expected {
            error!("doomsday reset rejected: wrong password");
            return false;
        }

        if self.config.lock_file_path.exists() {
            match std::fs::remove_file(&self.config.lock_file_path) {
                Ok(()) => info!(lock_file = %self.config.lock_file_path.display(), "lock file removed"),
                Err(e) => warn!(error = %e, "failed to remove lock file"),
            }
        }

        if let Some(kv) = &self.kv {
            let cleanup = async {
                kv.delete(keys::DOOMSDAY_FLAG).await?;
                kv.delete(keys::DOOMSDAY_REASON).await?;
                kv.set(keys::REDIS_FAILURES, "0").await?;
                kv.set(keys::GPU_FAILURES, "0").await?;
                Ok::<(), services_common::KernelError>(())
            }
            .await;
            if let Err(e) = cleanup {
                warn!(error = %e, "failed to clear kv doomsday state");
            }
        }

        {
            let mut status = self.status.write();
            *status = DoomsdayStatus::default();
        }

        info!("doomsday switch reset");
        true
    }

    /// Triggered iff the memory flag or the lockfile says so
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.status.read().is_triggered || self.config.lock_file_path.exists()
    }

    #[must_use]
    pub fn status(&self) -> DoomsdayStatus {
        self.status.read().clone()
    }

    #[must_use]
    pub fn lock_file_path(&self) -> &Path {
        &self.config.lock_file_path
    }

    async fn counter(&self, key: &str) -> i64 {
        let Some(kv) = &self.kv else { return 0 };
        match kv.get_i64(key).await {
            Ok(value) => value.unwrap_or(0),
            Err(e) => {
                debug!(key, error = %e, "failure counter unreadable, treating as zero");
                0
            }
        }
    }

    async fn pnl_ratio(&self) -> f64 {
        let Some(kv) = &self.kv else { return 0.0 };

        let daily_pnl = match kv.get_f64(keys::DAILY_PNL).await {
            Ok(value) => value.unwrap_or(0.0),
            Err(_) => return 0.0,
        };
        let initial_capital = match kv.get_f64(keys::INITIAL_CAPITAL).await {
            Ok(value) => value.unwrap_or(1_000_000.0),
            Err(_) => return 0.0,
        };

        if initial_capital > 0.0 {
            daily_pnl / initial_capital
        } else {
            0.0
        }
    }

    async fn reset_secret(&self) -> Option<String> {
        let kv = self.kv.as_ref()?;
        match kv.get(keys::DOOMSDAY_PASSWORD).await {
            Ok(secret) => secret,
            Err(e) => {
                warn!(error = %e, "failed to read reset secret");
                None
            }
        }
    }

    fn write_lock_file(&self, reason: &str) {
        let path = &self.config.lock_file_path;

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!(error = %e, "failed to create lock file directory");
                return;
            }
        }

        let contents = format!(
            "Triggered at: {}\nReason: {reason}\n",
            Local::now().to_rfc3339()
        );
        match std::fs::write(path, contents) {
            Ok(()) => info!(lock_file = %path.display(), "lock file created"),
            Err(e) => error!(error = %e, "failed to create lock file"),
        }
    }

    async fn persist_kv_flags(&self, reason: &str) {
        let Some(kv) = &self.kv else { return };

        let result = async {
            kv.set(keys::DOOMSDAY_FLAG, "triggered").await?;
            kv.set(keys::DOOMSDAY_REASON, reason).await?;
            Ok::<(), services_common::KernelError>(())
        }
        .await;

        if let Err(e) = result {
            warn!(error = %e, "failed to persist doomsday flags");
        }
    }

    async fn signal_stop(&self) {
        let Some(kv) = &self.kv else { return };
        match kv.publish(channels::EMERGENCY_STOP, "doomsday").await {
            Ok(_) => info!("trading stop signal sent"),
            Err(e) => warn!(error = %e, "failed to send stop signal"),
        }
    }

    async fn signal_liquidation(&self) {
        error!("emergency liquidation signalled");
        let Some(kv) = &self.kv else { return };
        if let Err(e) = kv.publish(channels::LIQUIDATE_ALL, "emergency").await {
            error!(error = %e, "failed to send liquidation signal");
        }
    }

    fn send_alert(&self, reason: &str) {
        error!(
            reason,
            at = %Local::now().to_rfc3339(),
            "doomsday alert notification"
        );
    }
}
