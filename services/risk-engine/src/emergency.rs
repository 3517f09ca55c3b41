//! Emergency responder
//!
//! Tiered alert dispatch with SLA-bounded response:
//! - warning (P2, 30 minutes), danger (P1, 5 minutes), critical (P0,
//!   immediate — under a second counts as compliant)
//!
//! Every alert runs the handlers registered for its level, then the default
//! procedure, and appends an auditable record to the bounded history. A
//! failing handler marks the record unsuccessful but never aborts dispatch.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use services_common::{KernelError, KernelResult};

use async_trait::async_trait;

/// Bounded procedure history length
const MAX_HISTORY: usize = 1000;

/// Alert severity mapped to response priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// P2, respond within 30 minutes
    Warning,
    /// P1, respond within 5 minutes
    Danger,
    /// P0, respond immediately
    Critical,
}

impl AlertLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Danger => "danger",
            Self::Critical => "critical",
        }
    }

    /// Response-time SLA for this level
    #[must_use]
    pub fn sla(self) -> StdDuration {
        match self {
            Self::Warning => StdDuration::from_secs(30 * 60),
            Self::Danger => StdDuration::from_secs(5 * 60),
            Self::Critical => StdDuration::ZERO,
        }
    }
}

/// Named emergency procedures the surrounding system executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcedureKind {
    StopTrading,
    Liquidate,
    Failover,
    Recovery,
}

impl ProcedureKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StopTrading => "stop_trading",
            Self::Liquidate => "liquidate",
            Self::Failover => "failover",
            Self::Recovery => "recovery",
        }
    }
}

impl FromStr for ProcedureKind {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stop_trading" => Ok(Self::StopTrading),
            "liquidate" => Ok(Self::Liquidate),
            "failover" => Ok(Self::Failover),
            "recovery" => Ok(Self::Recovery),
            other => Err(KernelError::BadInput(format!(
                "unknown procedure kind: {other}"
            ))),
        }
    }
}

/// Free-form context attached to an alert
pub type AlertContext = Map<String, Value>;

/// One executed alert, auditable
#[derive(Debug, Clone, Serialize)]
pub struct ProcedureRecord {
    pub procedure_id: String,
    pub alert_level: AlertLevel,
    pub description: String,
    /// Executed action identifiers, in order
    pub actions: Vec<String>,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
}

/// Handler invoked for alerts of a registered level
#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn handle(&self, description: &str, context: &AlertContext) -> anyhow::Result<()>;

    fn name(&self) -> &str;
}

/// Responder statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EmergencyStatistics {
    pub total_procedures: usize,
    pub success_count: usize,
    pub success_rate: f64,
    pub recent_24h: usize,
    pub level_counts_24h: FxHashMap<String, usize>,
    pub last_procedure_id: Option<String>,
}

/// Alert dispatch with SLA verification and bounded history
pub struct EmergencyResponder {
    handlers: RwLock<FxHashMap<AlertLevel, Vec<Arc<dyn AlertHandler>>>>,
    history: RwLock<Vec<ProcedureRecord>>,
    procedure_counter: AtomicU64,
}

impl Default for EmergencyResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmergencyResponder {
    #[must_use]
    pub fn new() -> Self {
        info!("emergency responder initialized");
        Self {
            handlers: RwLock::new(FxHashMap::default()),
            history: RwLock::new(Vec::new()),
            procedure_counter: AtomicU64::new(0),
        }
    }

    /// Register a handler for one alert level
    pub fn register_handler<H>(&self, level: AlertLevel, handler: H)
    where
        H: AlertHandler + 'static,
    {
        let handler: Arc<dyn AlertHandler> = Arc::new(handler);
        info!(level = level.as_str(), handler = handler.name(), "alert handler registered");
        self.handlers.write().entry(level).or_default().push(handler);
    }

    /// Dispatch an alert and append the procedure record
    pub async fn trigger_alert(
        &self,
        level: AlertLevel,
        description: &str,
        context: Option<AlertContext>,
    ) -> KernelResult<ProcedureRecord> {
        if description.trim().is_empty() {
            return Err(KernelError::BadInput(
                "alert description must not be empty".to_string(),
            ));
        }

        let context = context.unwrap_or_default();
        let alert_time = Utc::now();
        let started = std::time::Instant::now();

        let counter = self.procedure_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let procedure_id = format!(
            "{}_{}_{}",
            level.as_str(),
            alert_time.format("%Y%m%d%H%M%S%6f"),
            counter
        );

        warn!(
            level = level.as_str(),
            procedure_id = %procedure_id,
            description,
            "alert triggered"
        );

        let mut actions = Vec::new();
        let mut success = true;

        let handlers: Vec<Arc<dyn AlertHandler>> = self
            .handlers
            .read()
            .get(&level)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            match handler.handle(description, &context).await {
                Ok(()) => {
                    actions.push(format!("handler_ok: {}", handler.name()));
                    info!(handler = handler.name(), "alert handler succeeded");
                }
                Err(e) => {
                    actions.push(format!("handler_failed: {} - {e}", handler.name()));
                    error!(handler = handler.name(), error = %e, "alert handler failed");
                    success = false;
                }
            }
        }

        actions.extend(Self::default_procedure(level, description));

        let record = ProcedureRecord {
            procedure_id,
            alert_level: level,
            description: description.to_string(),
            actions,
            executed_at: alert_time,
            success,
        };

        {
            let mut history = self.history.write();
            history.push(record.clone());
            if history.len() > MAX_HISTORY {
                let excess = history.len() - MAX_HISTORY;
                history.drain(0..excess);
            }
        }

        let elapsed = started.elapsed();
        let sla = level.sla();
        // P0 has no slack in the SLA table; under a second is compliant.
        let compliant = if sla.is_zero() {
            elapsed < StdDuration::from_secs(1)
        } else {
            elapsed <= sla
        };
        if compliant {
            info!(
                level = level.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                sla_s = sla.as_secs(),
                "response within SLA"
            );
        } else {
            warn!(
                level = level.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                sla_s = sla.as_secs(),
                "response exceeded SLA"
            );
        }

        Ok(record)
    }

    /// Execute a named procedure; the actual work is delegated to the
    /// surrounding system
    pub fn execute_procedure(&self, kind: ProcedureKind, _context: Option<AlertContext>) -> bool {
        match kind {
            ProcedureKind::StopTrading => {
                warn!("executing stop-trading procedure");
            }
            ProcedureKind::Liquidate => {
                warn!("executing liquidation procedure");
            }
            ProcedureKind::Failover => {
                info!("executing failover procedure");
            }
            ProcedureKind::Recovery => {
                info!("executing recovery procedure");
            }
        }
        true
    }

    /// SLA for a level
    #[must_use]
    pub fn sla_for(&self, level: AlertLevel) -> StdDuration {
        level.sla()
    }

    /// Procedures within the last `hours`, optionally filtered by level
    pub fn history(
        &self,
        level: Option<AlertLevel>,
        hours: u32,
    ) -> KernelResult<Vec<ProcedureRecord>> {
        if hours == 0 {
            return Err(KernelError::BadInput("hours must be > 0".to_string()));
        }

        let cutoff = Utc::now() - Duration::hours(i64::from(hours));
        Ok(self
            .history
            .read()
            .iter()
            .filter(|record| record.executed_at >= cutoff)
            .filter(|record| level.map_or(true, |l| record.alert_level == l))
            .cloned()
            .collect())
    }

    /// Prune records strictly older than `days`; returns how many were removed
    pub fn clear_old_history(&self, days: u32) -> KernelResult<usize> {
        if days == 0 {
            return Err(KernelError::BadInput("days must be > 0".to_string()));
        }

        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut history = self.history.write();
        let before = history.len();
        history.retain(|record| record.executed_at >= cutoff);
        let removed = before - history.len();

        if removed > 0 {
            info!(removed, keep_days = days, "pruned old procedure records");
        }
        Ok(removed)
    }

    #[must_use]
    pub fn statistics(&self) -> EmergencyStatistics {
        let history = self.history.read();
        let total = history.len();
        let success_count = history.iter().filter(|record| record.success).count();

        let cutoff = Utc::now() - Duration::hours(24);
        let mut level_counts: FxHashMap<String, usize> = FxHashMap::default();
        let mut recent = 0;
        for record in history.iter().filter(|record| record.executed_at >= cutoff) {
            recent += 1;
            *level_counts
                .entry(record.alert_level.as_str().to_string())
                .or_insert(0) += 1;
        }

        EmergencyStatistics {
            total_procedures: total,
            success_count,
            success_rate: if total > 0 {
                success_count as f64 / total as f64
            } else {
                1.0
            },
            recent_24h: recent,
            level_counts_24h: level_counts,
            last_procedure_id: history.last().map(|record| record.procedure_id.clone()),
        }
    }

    fn default_procedure(level: AlertLevel, description: &str) -> Vec<String> {
        match level {
            AlertLevel::Critical => {
                error!(description, "P0 alert");
                vec![
                    "record_p0_alert".to_string(),
                    "send_emergency_notice".to_string(),
                    "stop_trading_signal".to_string(),
                ]
            }
            AlertLevel::Danger => {
                error!(description, "P1 alert");
                vec![
                    "record_p1_alert".to_string(),
                    "send_priority_notice".to_string(),
                    "switch_to_fallback".to_string(),
                ]
            }
            AlertLevel::Warning => {
                warn!(description, "P2 alert");
                vec![
                    "record_p2_alert".to_string(),
                    "schedule_background_fix".to_string(),
                ]
            }
        }
    }
}
