//! Risk assessor
//!
//! Five monitoring axes — market, system, operational, liquidity,
//! counterparty — each mapping its inputs to at most one leveled risk
//! event per call. Within one monitor, checks run in a fixed order and the
//! first firing condition wins. Out-of-range inputs are rejected and
//! produce no event.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use services_common::{KernelError, KernelResult};

/// Bounded event history length
const MAX_EVENTS: usize = 1000;

/// Ordered risk severity
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Monitored risk axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskType {
    Market,
    System,
    Operational,
    Liquidity,
    Counterparty,
}

impl RiskType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market_risk",
            Self::System => "system_risk",
            Self::Operational => "operational_risk",
            Self::Liquidity => "liquidity_risk",
            Self::Counterparty => "counterparty_risk",
        }
    }
}

/// Market regime input to the market monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketTrend {
    Normal,
    Volatile,
    Crash,
}

/// One detected risk condition
#[derive(Debug, Clone, Serialize)]
pub struct RiskEvent {
    pub risk_type: RiskType,
    pub risk_level: RiskLevel,
    pub description: String,
    pub metrics: FxHashMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

/// Configurable detection thresholds
#[derive(Debug, Clone)]
pub struct RiskThresholds {
    /// Market volatility trigger
    pub market_volatility: f64,
    /// Daily loss trigger (as a positive ratio)
    pub daily_loss: f64,
    /// Bid/ask spread trigger
    pub liquidity: f64,
    /// Minimum acceptable component health
    pub system_health: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            market_volatility: 0.05,
            daily_loss: 0.10,
            liquidity: 0.20,
            system_health: 0.80,
        }
    }
}

/// Aggregated view over the last hour
#[derive(Debug, Clone, Serialize)]
pub struct RiskSummary {
    pub overall_risk_level: RiskLevel,
    pub total_events: usize,
    pub type_counts: FxHashMap<String, usize>,
    pub level_counts: FxHashMap<String, usize>,
    pub recent_events: Vec<RiskEvent>,
}

/// Multi-axis risk classifier with bounded event history
pub struct RiskAssessor {
    thresholds: RiskThresholds,
    events: RwLock<Vec<RiskEvent>>,
}

impl RiskAssessor {
    pub fn new(thresholds: RiskThresholds) -> KernelResult<Self> {
        for (name, value) in [
            ("market volatility threshold", thresholds.market_volatility),
            ("daily loss threshold", thresholds.daily_loss),
            ("liquidity threshold", thresholds.liquidity),
            ("system health threshold", thresholds.system_health),
        ] {
            if !(0.0..1.0).contains(&value) || value == 0.0 {
                return Err(KernelError::BadInput(format!(
                    "{name} must be in (0, 1): {value}"
                )));
            }
        }

        info!(
            market_volatility = thresholds.market_volatility,
            daily_loss = thresholds.daily_loss,
            liquidity = thresholds.liquidity,
            system_health = thresholds.system_health,
            "risk assessor initialized"
        );

        Ok(Self {
            thresholds,
            events: RwLock::new(Vec::new()),
        })
    }

    /// Volatility, single-day loss, and regime checks
    pub fn monitor_market_risk(
        &self,
        volatility: f64,
        daily_pnl_ratio: f64,
        trend: MarketTrend,
    ) -> KernelResult<Option<RiskEvent>> {
        ensure_range("volatility", volatility, 0.0, 1.0)?;
        ensure_range("daily pnl ratio", daily_pnl_ratio, -1.0, 1.0)?;

        if volatility > self.thresholds.market_volatility {
            let level = severity_for(volatility, self.thresholds.market_volatility);
            let event = self.record(
                RiskType::Market,
                level,
                format!(
                    "market volatility high: {:.2}% > {:.2}%",
                    volatility * 100.0,
                    self.thresholds.market_volatility * 100.0
                ),
                [
                    ("volatility", volatility),
                    ("threshold", self.thresholds.market_volatility),
                ],
            );
            return Ok(Some(event));
        }

        if daily_pnl_ratio < -self.thresholds.daily_loss {
            let event = self.record(
                RiskType::Market,
                RiskLevel::Critical,
                format!(
                    "single-day loss over threshold: {:.2}% < -{:.2}%",
                    daily_pnl_ratio * 100.0,
                    self.thresholds.daily_loss * 100.0
                ),
                [
                    ("daily_pnl_ratio", daily_pnl_ratio),
                    ("threshold", -self.thresholds.daily_loss),
                ],
            );
            return Ok(Some(event));
        }

        if trend == MarketTrend::Crash {
            let event = self.record(
                RiskType::Market,
                RiskLevel::Critical,
                "market crash regime".to_string(),
                [("volatility", volatility)],
            );
            return Ok(Some(event));
        }

        Ok(None)
    }

    /// Minimum of the three component healths against the system threshold
    pub fn monitor_system_risk(
        &self,
        redis_health: f64,
        gpu_health: f64,
        network_health: f64,
    ) -> KernelResult<Option<RiskEvent>> {
        ensure_range("redis health", redis_health, 0.0, 1.0)?;
        ensure_range("gpu health", gpu_health, 0.0, 1.0)?;
        ensure_range("network health", network_health, 0.0, 1.0)?;

        let overall = redis_health.min(gpu_health).min(network_health);
        if overall >= self.thresholds.system_health {
            return Ok(None);
        }

        let mut failing = Vec::new();
        if redis_health < self.thresholds.system_health {
            failing.push(format!("redis({:.0}%)", redis_health * 100.0));
        }
        if gpu_health < self.thresholds.system_health {
            failing.push(format!("gpu({:.0}%)", gpu_health * 100.0));
        }
        if network_health < self.thresholds.system_health {
            failing.push(format!("network({:.0}%)", network_health * 100.0));
        }

        let level = severity_for(1.0 - overall, 1.0 - self.thresholds.system_health);
        let event = self.record(
            RiskType::System,
            level,
            format!("system health low: {}", failing.join(", ")),
            [
                ("redis_health", redis_health),
                ("gpu_health", gpu_health),
                ("network_health", network_health),
                ("overall_health", overall),
                ("threshold", self.thresholds.system_health),
            ],
        );
        Ok(Some(event))
    }

    /// Strategy quality checks: sharpe, data quality, overfitting
    pub fn monitor_operational_risk(
        &self,
        strategy_sharpe: f64,
        data_quality: f64,
        overfitting: f64,
    ) -> KernelResult<Option<RiskEvent>> {
        ensure_range("data quality score", data_quality, 0.0, 1.0)?;
        ensure_range("overfitting score", overfitting, 0.0, 1.0)?;

        if strategy_sharpe < 1.0 {
            let level = if strategy_sharpe > 0.5 {
                RiskLevel::Medium
            } else {
                RiskLevel::High
            };
            let event = self.record(
                RiskType::Operational,
                level,
                format!("strategy sharpe low: {strategy_sharpe:.2} < 1.0"),
                [("strategy_sharpe", strategy_sharpe), ("threshold", 1.0)],
            );
            return Ok(Some(event));
        }

        if data_quality < 0.80 {
            let level = severity_for(1.0 - data_quality, 1.0 - 0.80);
            let event = self.record(
                RiskType::Operational,
                level,
                format!("data quality low: {:.0}% < 80%", data_quality * 100.0),
                [("data_quality", data_quality), ("threshold", 0.80)],
            );
            return Ok(Some(event));
        }

        if overfitting > 0.70 {
            let level = severity_for(overfitting, 0.70);
            let event = self.record(
                RiskType::Operational,
                level,
                format!("strategy overfitting: {:.0}% > 70%", overfitting * 100.0),
                [("overfitting", overfitting), ("threshold", 0.70)],
            );
            return Ok(Some(event));
        }

        Ok(None)
    }

    /// Spread, volume, and depth checks
    pub fn monitor_liquidity_risk(
        &self,
        bid_ask_spread: f64,
        volume_ratio: f64,
        market_depth: f64,
    ) -> KernelResult<Option<RiskEvent>> {
        ensure_range("bid/ask spread", bid_ask_spread, 0.0, 1.0)?;
        if volume_ratio < 0.0 {
            return Err(KernelError::BadInput(format!(
                "volume ratio must be >= 0: {volume_ratio}"
            )));
        }
        ensure_range("market depth", market_depth, 0.0, 1.0)?;

        if bid_ask_spread > self.thresholds.liquidity {
            let level = severity_for(bid_ask_spread, self.thresholds.liquidity);
            let event = self.record(
                RiskType::Liquidity,
                level,
                format!(
                    "bid/ask spread wide: {:.2}% > {:.2}%",
                    bid_ask_spread * 100.0,
                    self.thresholds.liquidity * 100.0
                ),
                [
                    ("bid_ask_spread", bid_ask_spread),
                    ("threshold", self.thresholds.liquidity),
                ],
            );
            return Ok(Some(event));
        }

        if volume_ratio < 0.30 {
            let level = if volume_ratio > 0.10 {
                RiskLevel::Medium
            } else {
                RiskLevel::High
            };
            let event = self.record(
                RiskType::Liquidity,
                level,
                format!("volume low: {:.0}% of average < 30%", volume_ratio * 100.0),
                [("volume_ratio", volume_ratio), ("threshold", 0.30)],
            );
            return Ok(Some(event));
        }

        if market_depth < 0.50 {
            let level = severity_for(1.0 - market_depth, 1.0 - 0.50);
            let event = self.record(
                RiskType::Liquidity,
                level,
                format!("market depth thin: {:.0}% < 50%", market_depth * 100.0),
                [("market_depth", market_depth), ("threshold", 0.50)],
            );
            return Ok(Some(event));
        }

        Ok(None)
    }

    /// Broker rating, settlement delay, and credit exposure checks
    pub fn monitor_counterparty_risk(
        &self,
        broker_rating: f64,
        settlement_delay_days: u32,
        credit_exposure: f64,
    ) -> KernelResult<Option<RiskEvent>> {
        ensure_range("broker rating", broker_rating, 0.0, 1.0)?;
        ensure_range("credit exposure", credit_exposure, 0.0, 1.0)?;

        if broker_rating < 0.70 {
            let level = severity_for(1.0 - broker_rating, 1.0 - 0.70);
            let event = self.record(
                RiskType::Counterparty,
                level,
                format!("broker rating low: {:.0}% < 70%", broker_rating * 100.0),
                [("broker_rating", broker_rating), ("threshold", 0.70)],
            );
            return Ok(Some(event));
        }

        if settlement_delay_days > 2 {
            let level = if settlement_delay_days <= 5 {
                RiskLevel::Medium
            } else {
                RiskLevel::High
            };
            let event = self.record(
                RiskType::Counterparty,
                level,
                format!("settlement delayed: T+{settlement_delay_days} > T+2"),
                [
                    ("settlement_delay", f64::from(settlement_delay_days)),
                    ("threshold", 2.0),
                ],
            );
            return Ok(Some(event));
        }

        if credit_exposure > 0.30 {
            let level = severity_for(credit_exposure, 0.30);
            let event = self.record(
                RiskType::Counterparty,
                level,
                format!("credit exposure high: {:.0}% > 30%", credit_exposure * 100.0),
                [("credit_exposure", credit_exposure), ("threshold", 0.30)],
            );
            return Ok(Some(event));
        }

        Ok(None)
    }

    /// Maximum severity among events within the last hour; low if none
    #[must_use]
    pub fn overall_risk_level(&self) -> RiskLevel {
        let cutoff = Utc::now() - Duration::hours(1);
        self.events
            .read()
            .iter()
            .filter(|event| event.timestamp > cutoff)
            .map(|event| event.risk_level)
            .max()
            .unwrap_or(RiskLevel::Low)
    }

    /// Per-type and per-level counts over the last hour
    #[must_use]
    pub fn risk_summary(&self) -> RiskSummary {
        let cutoff = Utc::now() - Duration::hours(1);
        let events = self.events.read();
        let recent: Vec<&RiskEvent> = events
            .iter()
            .filter(|event| event.timestamp > cutoff)
            .collect();

        let mut type_counts: FxHashMap<String, usize> = FxHashMap::default();
        let mut level_counts: FxHashMap<String, usize> = FxHashMap::default();
        for event in &recent {
            *type_counts
                .entry(event.risk_type.as_str().to_string())
                .or_insert(0) += 1;
            *level_counts
                .entry(event.risk_level.as_str().to_string())
                .or_insert(0) += 1;
        }

        let recent_events = recent
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(|event| (*event).clone())
            .collect();

        RiskSummary {
            overall_risk_level: recent
                .iter()
                .map(|event| event.risk_level)
                .max()
                .unwrap_or(RiskLevel::Low),
            total_events: recent.len(),
            type_counts,
            level_counts,
            recent_events,
        }
    }

    /// Prune events strictly older than `hours`; returns how many were removed
    pub fn clear_old_events(&self, hours: u32) -> KernelResult<usize> {
        if hours == 0 {
            return Err(KernelError::BadInput("hours must be > 0".to_string()));
        }

        let cutoff = Utc::now() - Duration::hours(i64::from(hours));
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|event| event.timestamp > cutoff);
        let removed = before - events.len();

        if removed > 0 {
            info!(removed, keep_hours = hours, "pruned old risk events");
        }
        Ok(removed)
    }

    /// Number of events currently held
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    fn record<const N: usize>(
        &self,
        risk_type: RiskType,
        risk_level: RiskLevel,
        description: String,
        metrics: [(&str, f64); N],
    ) -> RiskEvent {
        let event = RiskEvent {
            risk_type,
            risk_level,
            description,
            metrics: metrics
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            timestamp: Utc::now(),
        };

        match risk_level {
            RiskLevel::Critical => error!(
                risk_type = risk_type.as_str(),
                description = %event.description,
                "risk detected"
            ),
            _ => warn!(
                risk_type = risk_type.as_str(),
                risk_level = risk_level.as_str(),
                description = %event.description,
                "risk detected"
            ),
        }

        let mut events = self.events.write();
        events.push(event.clone());
        if events.len() > MAX_EVENTS {
            let excess = events.len() - MAX_EVENTS;
            events.drain(0..excess);
        }

        event
    }
}

/// Severity from the value/threshold ratio: ≥2 critical, ≥1.5 high,
/// ≥1 medium, else low
#[must_use]
pub fn severity_for(value: f64, threshold: f64) -> RiskLevel {
    let ratio = value / threshold;
    if ratio >= 2.0 {
        RiskLevel::Critical
    } else if ratio >= 1.5 {
        RiskLevel::High
    } else if ratio >= 1.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn ensure_range(name: &str, value: f64, min: f64, max: f64) -> KernelResult<()> {
    if !(min..=max).contains(&value) {
        return Err(KernelError::BadInput(format!(
            "{name} must be in [{min}, {max}]: {value}"
        )));
    }
    Ok(())
}
