//! Cost → alerts bridge
//!
//! Routes every tracked model call through the ledger, keeps the exported
//! cost gauges in sync with the budget state and the monthly prediction,
//! and publishes limit/warning events when a budget is breached or the
//! projection crosses it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use cost_governor::{BudgetAlert, CostLedger, CostPredictor};
use monitoring::KernelMetrics;
use services_common::constants::subsystems;
use services_common::{CrossBus, CrossEvent, CrossEventKind, EventPriority, KernelResult};

/// Bridge counters snapshot
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CostBridgeStats {
    pub total_tracked: u64,
    pub total_synced: u64,
    pub events_published: u64,
    pub budget_alerts: u64,
}

/// Tracks calls and mirrors budget state into metrics and events
pub struct CostAlertBridge {
    ledger: Arc<CostLedger>,
    predictor: Arc<CostPredictor>,
    metrics: Arc<KernelMetrics>,
    bus: Arc<CrossBus>,
    total_tracked: AtomicU64,
    total_synced: AtomicU64,
    events_published: AtomicU64,
    budget_alerts: AtomicU64,
}

impl CostAlertBridge {
    #[must_use]
    pub fn new(
        ledger: Arc<CostLedger>,
        predictor: Arc<CostPredictor>,
        metrics: Arc<KernelMetrics>,
        bus: Arc<CrossBus>,
    ) -> Self {
        Self {
            ledger,
            predictor,
            metrics,
            bus,
            total_tracked: AtomicU64::new(0),
            total_synced: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            budget_alerts: AtomicU64::new(0),
        }
    }

    /// Track a model call, sync the exported gauges, check the budgets
    pub async fn track_and_publish(
        &self,
        service: &str,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
    ) -> KernelResult<f64> {
        let cost = self
            .ledger
            .track(service, model, input_tokens, output_tokens)
            .await?;

        self.total_tracked.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .cost_api_calls_total
            .with_label_values(&[service, model])
            .inc();

        self.sync_cost_metrics().await;
        self.check_budget_limits().await;

        Ok(cost)
    }

    /// Push the current budget state and prediction into the gauges
    pub async fn sync_cost_metrics(&self) {
        let budget = self.ledger.budget_state().await;
        let prediction = self.predictor.predict_monthly().await;

        self.metrics.cost_daily_total.set(budget.daily_cost);
        self.metrics.cost_monthly_total.set(budget.monthly_cost);
        self.metrics
            .cost_predicted_monthly
            .set(prediction.predicted_monthly);
        self.metrics
            .cost_daily_budget_utilization
            .set(budget.daily_utilization);
        self.metrics
            .cost_monthly_budget_utilization
            .set(budget.monthly_utilization);
        self.metrics
            .cost_budget_exceeded
            .with_label_values(&["daily"])
            .set(i64::from(budget.is_daily_exceeded));
        self.metrics
            .cost_budget_exceeded
            .with_label_values(&["monthly"])
            .set(i64::from(budget.is_monthly_exceeded));

        for (service, cost) in self.ledger.breakdown() {
            self.metrics
                .cost_by_service
                .with_label_values(&[&service])
                .set(cost);
        }

        self.total_synced.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish limit events for breached budgets and prediction warnings
    pub async fn check_budget_limits(&self) {
        let budget = self.ledger.budget_state().await;

        if budget.is_daily_exceeded {
            self.publish_limit_exceeded(
                "daily",
                budget.daily_cost,
                budget.daily_budget,
                budget.daily_utilization,
            );
        }
        if budget.is_monthly_exceeded {
            self.publish_limit_exceeded(
                "monthly",
                budget.monthly_cost,
                budget.monthly_budget,
                budget.monthly_utilization,
            );
        }

        if let Some(alert) = self.predictor.alert_if_over_budget().await {
            self.publish_budget_warning(&alert);
        }
    }

    #[must_use]
    pub fn stats(&self) -> CostBridgeStats {
        CostBridgeStats {
            total_tracked: self.total_tracked.load(Ordering::Relaxed),
            total_synced: self.total_synced.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            budget_alerts: self.budget_alerts.load(Ordering::Relaxed),
        }
    }

    fn publish_limit_exceeded(&self, limit_type: &str, current_cost: f64, budget: f64, utilization: f64) {
        warn!(
            limit_type,
            current_cost, budget, utilization, "cost limit exceeded"
        );

        let published = self.bus.publish(CrossEvent::new(
            CrossEventKind::CostLimitExceeded,
            subsystems::COST,
            subsystems::MONITORING,
            json!({
                "limit_type": limit_type,
                "current_cost": current_cost,
                "budget": budget,
                "utilization": utilization,
                "excess_amount": current_cost - budget,
                "timestamp": Utc::now().to_rfc3339(),
            }),
            EventPriority::High,
        ));

        if published {
            self.events_published.fetch_add(1, Ordering::Relaxed);
            self.budget_alerts.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn publish_budget_warning(&self, alert: &BudgetAlert) {
        let published = self.bus.publish(CrossEvent::new(
            CrossEventKind::CostBudgetWarning,
            subsystems::COST,
            subsystems::MONITORING,
            json!({
                "predicted_monthly": alert.predicted_monthly,
                "budget_monthly": alert.budget_monthly,
                "excess_amount": alert.excess_amount,
                "budget_utilization": alert.utilization,
                "message": alert.message,
                "timestamp": Utc::now().to_rfc3339(),
            }),
            EventPriority::Normal,
        ));

        if published {
            self.events_published.fetch_add(1, Ordering::Relaxed);
        }
    }
}
