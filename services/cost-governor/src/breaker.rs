//! Cost circuit breaker
//!
//! Vetoes outbound calls whose expected cost would violate a cap. The
//! breaker opens on an observed daily or monthly breach (or a manual
//! pause) and only closes through an explicit resume or the auto-reset
//! check. Critical calls pass the open state and aggregate caps; only the
//! per-call cap applies to everything.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use services_common::constants::keys;
use services_common::{KernelError, KernelResult, KvStore};

use crate::ledger::CostLedger;

/// Fraction of a cap both actuals must be under for auto-reset
const AUTO_RESET_FRACTION: f64 = 0.9;

/// Cap configuration
#[derive(Debug, Clone)]
pub struct CostBreakerConfig {
    /// Per-call cap in currency units
    pub per_request_limit: f64,
    pub daily_limit: f64,
    pub monthly_limit: f64,
}

impl Default for CostBreakerConfig {
    fn default() -> Self {
        Self {
            per_request_limit: 0.10,
            daily_limit: 50.0,
            monthly_limit: 1500.0,
        }
    }
}

/// Breaker state snapshot
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub is_open: bool,
    pub open_reason: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub per_request_limit: f64,
    pub daily_limit: f64,
    pub monthly_limit: f64,
    pub current_daily_cost: f64,
    pub current_monthly_cost: f64,
}

/// Breaker counters snapshot
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatistics {
    pub total_checks: u64,
    pub blocked_requests: u64,
    pub open_count: u64,
    pub is_open: bool,
    pub block_rate: f64,
}

#[derive(Default)]
struct OpenState {
    is_open: bool,
    reason: Option<String>,
    opened_at: Option<DateTime<Utc>>,
}

/// Circuit breaker over the cost ledger
pub struct CostBreaker {
    ledger: Arc<CostLedger>,
    kv: Option<Arc<dyn KvStore>>,
    config: CostBreakerConfig,
    state: RwLock<OpenState>,
    total_checks: AtomicU64,
    blocked_requests: AtomicU64,
    open_count: AtomicU64,
}

impl CostBreaker {
    pub fn new(
        ledger: Arc<CostLedger>,
        kv: Option<Arc<dyn KvStore>>,
        config: CostBreakerConfig,
    ) -> KernelResult<Self> {
        if config.per_request_limit <= 0.0 {
            return Err(KernelError::BadInput(format!(
                "per-request limit must be > 0: {}",
                config.per_request_limit
            )));
        }
        if config.daily_limit <= 0.0 {
            return Err(KernelError::BadInput(format!(
                "daily limit must be > 0: {}",
                config.daily_limit
            )));
        }
        if config.monthly_limit <= 0.0 {
            return Err(KernelError::BadInput(format!(
                "monthly limit must be > 0: {}",
                config.monthly_limit
            )));
        }

        info!(
            per_request_limit = config.per_request_limit,
            daily_limit = config.daily_limit,
            monthly_limit = config.monthly_limit,
            "cost breaker initialized"
        );

        Ok(Self {
            ledger,
            kv,
            config,
            state: RwLock::new(OpenState::default()),
            total_checks: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
            open_count: AtomicU64::new(0),
        })
    }

    /// Decide whether a call may proceed
    ///
    /// Returns `true` to allow. Every invocation counts toward
    /// `total_checks`; every rejection toward `blocked_requests`.
    pub async fn check(&self, estimated_cost: Option<f64>, is_critical: bool) -> bool {
        self.total_checks.fetch_add(1, Ordering::Relaxed);

        if self.is_open() && !is_critical {
            self.blocked_requests.fetch_add(1, Ordering::Relaxed);
            warn!(
                reason = self.state.read().reason.as_deref().unwrap_or("unknown"),
                "breaker open, blocking non-critical call"
            );
            return false;
        }

        if let Some(estimated) = estimated_cost {
            if estimated > self.config.per_request_limit {
                self.blocked_requests.fetch_add(1, Ordering::Relaxed);
                warn!(
                    estimated,
                    limit = self.config.per_request_limit,
                    "per-request cost cap exceeded"
                );
                return false;
            }
        }

        let daily_cost = self.ledger.daily_cost(None).await;
        if daily_cost >= self.config.daily_limit {
            self.open_circuit("daily_limit_exceeded", Some(daily_cost)).await;
            if !is_critical {
                self.blocked_requests.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        let monthly_cost = self.ledger.monthly_cost(None).await;
        if monthly_cost >= self.config.monthly_limit {
            self.open_circuit("monthly_limit_exceeded", Some(monthly_cost))
                .await;
            if !is_critical {
                self.blocked_requests.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        true
    }

    /// Manually open the breaker; idempotent
    pub async fn pause_non_critical_calls(&self) {
        if !self.is_open() {
            self.open_circuit("manual_pause", None).await;
            info!("non-critical calls paused");
        }
    }

    /// Manually close the breaker; idempotent
    pub async fn resume_calls(&self) {
        if self.is_open() {
            self.close_circuit().await;
            info!("all calls resumed");
        }
    }

    /// Close the breaker iff both actuals are comfortably under their caps
    ///
    /// "Comfortably" means below 90% of the respective cap.
    pub async fn auto_reset_if_possible(&self) -> bool {
        if !self.is_open() {
            return false;
        }

        let daily_cost = self.ledger.daily_cost(None).await;
        let monthly_cost = self.ledger.monthly_cost(None).await;

        let can_reset = daily_cost < self.config.daily_limit * AUTO_RESET_FRACTION
            && monthly_cost < self.config.monthly_limit * AUTO_RESET_FRACTION;

        if can_reset {
            self.close_circuit().await;
            info!(daily_cost, monthly_cost, "breaker auto-reset");
            return true;
        }

        false
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.read().is_open
    }

    pub async fn status(&self) -> BreakerStatus {
        let (is_open, open_reason, opened_at) = {
            let state = self.state.read();
            (state.is_open, state.reason.clone(), state.opened_at)
        };

        BreakerStatus {
            is_open,
            open_reason,
            opened_at,
            per_request_limit: self.config.per_request_limit,
            daily_limit: self.config.daily_limit,
            monthly_limit: self.config.monthly_limit,
            current_daily_cost: self.ledger.daily_cost(None).await,
            current_monthly_cost: self.ledger.monthly_cost(None).await,
        }
    }

    #[must_use]
    pub fn statistics(&self) -> BreakerStatistics {
        let total_checks = self.total_checks.load(Ordering::Relaxed);
        let blocked_requests = self.blocked_requests.load(Ordering::Relaxed);

        BreakerStatistics {
            total_checks,
            blocked_requests,
            open_count: self.open_count.load(Ordering::Relaxed),
            is_open: self.is_open(),
            block_rate: if total_checks > 0 {
                blocked_requests as f64 / total_checks as f64
            } else {
                0.0
            },
        }
    }

    pub fn reset_statistics(&self) {
        self.total_checks.store(0, Ordering::Relaxed);
        self.blocked_requests.store(0, Ordering::Relaxed);
        self.open_count.store(0, Ordering::Relaxed);
        info!("breaker statistics reset");
    }

    async fn open_circuit(&self, reason: &str, cost: Option<f64>) {
        {
            let mut state = self.state.write();
            if state.is_open {
                return;
            }
            state.is_open = true;
            state.reason = Some(reason.to_string());
            state.opened_at = Some(Utc::now());
        }
        self.open_count.fetch_add(1, Ordering::Relaxed);

        warn!(reason, cost = ?cost, "cost breaker opened");

        if let Some(kv) = &self.kv {
            if let Err(e) = kv.set(keys::COST_CIRCUIT_BREAKER, "open").await {
                warn!(error = %e, "failed to persist breaker open flag");
            }
        }
    }

    async fn close_circuit(&self) {
        {
            let mut state = self.state.write();
            state.is_open = false;
            state.reason = None;
            state.opened_at = None;
        }

        info!("cost breaker closed");

        if let Some(kv) = &self.kv {
            if let Err(e) = kv.delete(keys::COST_CIRCUIT_BREAKER).await {
                warn!(error = %e, "failed to clear breaker open flag");
            }
        }
    }
}
