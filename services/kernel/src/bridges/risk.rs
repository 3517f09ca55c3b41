//! Risk → emergency bridge
//!
//! One fund/risk tick: consult the doomsday switch (skip everything when
//! it is engaged, fire it when its conditions hold), run the five risk
//! monitors over the supplied snapshots, map a detected risk to an alert
//! level, dispatch the emergency responder, and publish the matching
//! cross-subsystem events. Critical market or system risk also fires the
//! doomsday switch directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map};
use tracing::{debug, error, warn};

use doomsday::DoomsdaySwitch;
use health_monitor::FundProbe;
use risk_engine::{
    AlertLevel, ControlMatrix, EmergencyResponder, MarketTrend, ProcedureRecord, RiskAssessor,
    RiskEvent, RiskLevel, RiskType,
};
use services_common::constants::{keys, subsystems};
use services_common::{CrossBus, CrossEvent, CrossEventKind, EventPriority, KernelResult, KvStore};

use crate::bridges::health::HealthAlertBridge;

/// Market-side inputs for one monitoring pass; absent values skip the
/// monitors that need them
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub volatility: Option<f64>,
    pub daily_pnl_ratio: Option<f64>,
    pub trend: Option<MarketTrend>,
    pub bid_ask_spread: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub market_depth: Option<f64>,
}

/// System-side inputs for one monitoring pass
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    pub redis_health: Option<f64>,
    pub gpu_health: Option<f64>,
    pub network_health: Option<f64>,
    pub strategy_sharpe: Option<f64>,
    pub data_quality: Option<f64>,
    pub overfitting: Option<f64>,
    pub broker_rating: Option<f64>,
    pub settlement_delay_days: Option<u32>,
    pub credit_exposure: Option<f64>,
}

/// Bridge counters snapshot
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RiskBridgeStats {
    pub risks_detected: u64,
    pub alerts_triggered: u64,
    pub doomsday_checks: u64,
    pub events_published: u64,
}

/// Couples the risk assessor, the emergency responder, and the doomsday
/// switch
pub struct RiskEmergencyBridge {
    assessor: Arc<RiskAssessor>,
    responder: Arc<EmergencyResponder>,
    doomsday: Arc<DoomsdaySwitch>,
    matrix: Arc<ControlMatrix>,
    bus: Arc<CrossBus>,
    risks_detected: AtomicU64,
    alerts_triggered: AtomicU64,
    doomsday_checks: AtomicU64,
    events_published: AtomicU64,
}

impl RiskEmergencyBridge {
    #[must_use]
    pub fn new(
        assessor: Arc<RiskAssessor>,
        responder: Arc<EmergencyResponder>,
        doomsday: Arc<DoomsdaySwitch>,
        matrix: Arc<ControlMatrix>,
        bus: Arc<CrossBus>,
    ) -> Self {
        Self {
            assessor,
            responder,
            doomsday,
            matrix,
            bus,
            risks_detected: AtomicU64::new(0),
            alerts_triggered: AtomicU64::new(0),
            doomsday_checks: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
        }
    }

    /// One monitoring pass; returns the procedure record when an alert was
    /// dispatched
    pub async fn monitor_and_respond(
        &self,
        market: &MarketSnapshot,
        system: &SystemSnapshot,
    ) -> KernelResult<Option<ProcedureRecord>> {
        if self.doomsday.is_triggered() {
            warn!("doomsday engaged, skipping risk monitoring");
            return Ok(None);
        }

        self.check_doomsday_triggers().await;

        let event = self.monitor_all(market, system)?;
        self.matrix.update_risk_level(self.assessor.overall_risk_level());

        let Some(event) = event else {
            return Ok(None);
        };
        self.risks_detected.fetch_add(1, Ordering::Relaxed);

        self.respond(event).await
    }

    /// Map risk level to alert level: low stays silent
    #[must_use]
    pub fn alert_level_for(level: RiskLevel) -> Option<AlertLevel> {
        match level {
            RiskLevel::Low => None,
            RiskLevel::Medium => Some(AlertLevel::Warning),
            RiskLevel::High => Some(AlertLevel::Danger),
            RiskLevel::Critical => Some(AlertLevel::Critical),
        }
    }

    #[must_use]
    pub fn stats(&self) -> RiskBridgeStats {
        RiskBridgeStats {
            risks_detected: self.risks_detected.load(Ordering::Relaxed),
            alerts_triggered: self.alerts_triggered.load(Ordering::Relaxed),
            doomsday_checks: self.doomsday_checks.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
        }
    }

    async fn check_doomsday_triggers(&self) {
        self.doomsday_checks.fetch_add(1, Ordering::Relaxed);

        let fired = self.doomsday.check_triggers().await;
        if fired.is_empty() {
            return;
        }

        let reason = format!("trigger conditions: {}", fired.join(", "));
        error!(%reason, "doomsday conditions met");

        self.doomsday.trigger(&reason).await;
        self.publish_doomsday(&reason, &fired);
    }

    /// Run the monitors in fixed order; the first detected risk wins
    fn monitor_all(
        &self,
        market: &MarketSnapshot,
        system: &SystemSnapshot,
    ) -> KernelResult<Option<RiskEvent>> {
        if let (Some(volatility), Some(pnl)) = (market.volatility, market.daily_pnl_ratio) {
            let trend = market.trend.unwrap_or(MarketTrend::Normal);
            if let Some(event) = self.assessor.monitor_market_risk(volatility, pnl, trend)? {
                return Ok(Some(event));
            }
        }

        if let (Some(redis), Some(gpu), Some(network)) = (
            system.redis_health,
            system.gpu_health,
            system.network_health,
        ) {
            if let Some(event) = self.assessor.monitor_system_risk(redis, gpu, network)? {
                return Ok(Some(event));
            }
        }

        if let (Some(sharpe), Some(quality), Some(overfit)) = (
            system.strategy_sharpe,
            system.data_quality,
            system.overfitting,
        ) {
            if let Some(event) = self
                .assessor
                .monitor_operational_risk(sharpe, quality, overfit)?
            {
                return Ok(Some(event));
            }
        }

        if let (Some(spread), Some(volume), Some(depth)) = (
            market.bid_ask_spread,
            market.volume_ratio,
            market.market_depth,
        ) {
            if let Some(event) = self.assessor.monitor_liquidity_risk(spread, volume, depth)? {
                return Ok(Some(event));
            }
        }

        if let (Some(rating), Some(delay), Some(exposure)) = (
            system.broker_rating,
            system.settlement_delay_days,
            system.credit_exposure,
        ) {
            if let Some(event) = self
                .assessor
                .monitor_counterparty_risk(rating, delay, exposure)?
            {
                return Ok(Some(event));
            }
        }

        Ok(None)
    }

    async fn respond(&self, event: RiskEvent) -> KernelResult<Option<ProcedureRecord>> {
        let Some(alert_level) = Self::alert_level_for(event.risk_level) else {
            debug!(description = %event.description, "low risk, no alert");
            return Ok(None);
        };

        let mut context = Map::new();
        context.insert("risk_type".to_string(), json!(event.risk_type.as_str()));
        context.insert("risk_level".to_string(), json!(event.risk_level.as_str()));
        context.insert("metrics".to_string(), json!(event.metrics));
        context.insert(
            "timestamp".to_string(),
            json!(event.timestamp.to_rfc3339()),
        );

        let procedure = self
            .responder
            .trigger_alert(alert_level, &event.description, Some(context))
            .await?;
        self.alerts_triggered.fetch_add(1, Ordering::Relaxed);

        self.publish_risk_event(&event, alert_level);

        if event.risk_level == RiskLevel::Critical
            && matches!(event.risk_type, RiskType::Market | RiskType::System)
        {
            let reason = format!("critical risk: {}", event.description);
            error!(%reason, "firing doomsday on critical risk");
            self.doomsday.trigger(&reason).await;
            self.publish_doomsday(&reason, std::slice::from_ref(&event.description));
        }

        Ok(Some(procedure))
    }

    fn publish_risk_event(&self, event: &RiskEvent, alert_level: AlertLevel) {
        let priority = match alert_level {
            AlertLevel::Warning => EventPriority::Normal,
            AlertLevel::Danger => EventPriority::High,
            AlertLevel::Critical => EventPriority::Critical,
        };

        let published = self.bus.publish(CrossEvent::new(
            CrossEventKind::RiskLevelChanged,
            subsystems::RISK,
            subsystems::MONITORING,
            json!({
                "risk_type": event.risk_type.as_str(),
                "risk_level": event.risk_level.as_str(),
                "alert_level": alert_level.as_str(),
                "description": event.description,
                "metrics": event.metrics,
                "timestamp": event.timestamp.to_rfc3339(),
            }),
            priority,
        ));

        if published {
            self.events_published.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn publish_doomsday(&self, reason: &str, triggers_fired: &[String]) {
        let published = self.bus.publish(CrossEvent::new(
            CrossEventKind::DoomsdayTriggered,
            subsystems::DOOMSDAY,
            subsystems::MONITORING,
            json!({
                "reason": reason,
                "triggers_fired": triggers_fired,
                "timestamp": Utc::now().to_rfc3339(),
            }),
            EventPriority::Critical,
        ));

        if published {
            self.events_published.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Where the fund/risk loop gets its monitoring inputs
#[async_trait]
pub trait RiskDataSource: Send + Sync {
    async fn market_snapshot(&self) -> MarketSnapshot;
    async fn system_snapshot(&self) -> SystemSnapshot;
}

/// Production data source: P&L ratio from the KV portfolio keys, system
/// healths from the latest probe pass
pub struct KvRiskSource {
    kv: Option<Arc<dyn KvStore>>,
    health: Arc<HealthAlertBridge>,
}

impl KvRiskSource {
    #[must_use]
    pub fn new(kv: Option<Arc<dyn KvStore>>, health: Arc<HealthAlertBridge>) -> Self {
        Self { kv, health }
    }
}

#[async_trait]
impl RiskDataSource for KvRiskSource {
    async fn market_snapshot(&self) -> MarketSnapshot {
        let mut snapshot = MarketSnapshot::default();

        let Some(kv) = &self.kv else {
            return snapshot;
        };

        let daily_pnl = kv.get_f64(keys::DAILY_PNL).await.ok().flatten();
        let capital = kv.get_f64(keys::INITIAL_CAPITAL).await.ok().flatten();
        if let (Some(pnl), Some(capital)) = (daily_pnl, capital) {
            if capital > 0.0 {
                snapshot.daily_pnl_ratio = Some((pnl / capital).clamp(-1.0, 1.0));
            }
        }

        snapshot
    }

    async fn system_snapshot(&self) -> SystemSnapshot {
        let mut snapshot = SystemSnapshot::default();

        if let Some((kv, gpu, network)) = self.health.component_health_ratios() {
            snapshot.redis_health = Some(kv);
            snapshot.gpu_health = Some(gpu);
            snapshot.network_health = Some(network);
        }

        snapshot
    }
}

/// Adapter running the bridge as the fund/risk loop body
pub struct RiskProbe {
    bridge: Arc<RiskEmergencyBridge>,
    source: Arc<dyn RiskDataSource>,
}

impl RiskProbe {
    #[must_use]
    pub fn new(bridge: Arc<RiskEmergencyBridge>, source: Arc<dyn RiskDataSource>) -> Self {
        Self { bridge, source }
    }
}

#[async_trait]
impl FundProbe for RiskProbe {
    async fn tick(&self) {
        let market = self.source.market_snapshot().await;
        let system = self.source.system_snapshot().await;

        if let Err(e) = self.bridge.monitor_and_respond(&market, &system).await {
            warn!(error = %e, "risk monitoring tick failed");
        }
    }
}
