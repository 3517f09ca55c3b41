//! Health → alerts bridge
//!
//! Observes every probe pass: mirrors overall and per-component status
//! into the exported gauges, drives KV recovery when the KV probe fails,
//! and publishes health events onto the cross-subsystem bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use health_monitor::{
    ComponentStatus, HealthCheckResult, HealthChecker, HealthObserver, OverallStatus, KV_COMPONENT,
};
use monitoring::KernelMetrics;
use services_common::constants::subsystems;
use services_common::{CrossBus, CrossEvent, CrossEventKind, EventPriority};

/// Bridge counters snapshot
#[derive(Debug, Clone, Copy, Serialize)]
pub struct HealthBridgeStats {
    pub health_checks_performed: u64,
    pub events_published: u64,
    pub recoveries_attempted: u64,
    pub recoveries_succeeded: u64,
}

/// Mirrors probe results into metrics and alert events
pub struct HealthAlertBridge {
    checker: Arc<HealthChecker>,
    metrics: Arc<KernelMetrics>,
    bus: Arc<CrossBus>,
    latest: RwLock<Option<HealthCheckResult>>,
    health_checks_performed: AtomicU64,
    events_published: AtomicU64,
    recoveries_attempted: AtomicU64,
    recoveries_succeeded: AtomicU64,
}

impl HealthAlertBridge {
    #[must_use]
    pub fn new(checker: Arc<HealthChecker>, metrics: Arc<KernelMetrics>, bus: Arc<CrossBus>) -> Self {
        Self {
            checker,
            metrics,
            bus,
            latest: RwLock::new(None),
            health_checks_performed: AtomicU64::new(0),
            events_published: AtomicU64::new(0),
            recoveries_attempted: AtomicU64::new(0),
            recoveries_succeeded: AtomicU64::new(0),
        }
    }

    /// Most recent probe result, if any pass has completed
    #[must_use]
    pub fn latest_result(&self) -> Option<HealthCheckResult> {
        self.latest.read().clone()
    }

    /// Component healths as (kv, gpu, network) ratios for the risk side
    ///
    /// healthy → 1.0, degraded → 0.5, unhealthy → 0.0; network is the
    /// worst of the port probes.
    #[must_use]
    pub fn component_health_ratios(&self) -> Option<(f64, f64, f64)> {
        let latest = self.latest.read();
        let result = latest.as_ref()?;

        let ratio = |status: ComponentStatus| match status {
            ComponentStatus::Healthy => 1.0,
            ComponentStatus::Degraded => 0.5,
            ComponentStatus::Unhealthy => 0.0,
        };

        let kv = ratio(result.components.get(KV_COMPONENT)?.status);
        let gpu = ratio(result.components.get("gpu")?.status);
        let network = result
            .components
            .iter()
            .filter(|(name, _)| name.starts_with("port_"))
            .map(|(_, health)| ratio(health.status))
            .fold(1.0f64, f64::min);

        Some((kv, gpu, network))
    }

    #[must_use]
    pub fn stats(&self) -> HealthBridgeStats {
        HealthBridgeStats {
            health_checks_performed: self.health_checks_performed.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            recoveries_attempted: self.recoveries_attempted.load(Ordering::Relaxed),
            recoveries_succeeded: self.recoveries_succeeded.load(Ordering::Relaxed),
        }
    }

    fn update_metrics(&self, result: &HealthCheckResult) {
        self.metrics
            .system_health_status
            .set(result.overall_status.as_value());
        for (name, health) in &result.components {
            self.metrics
                .component_health_status
                .with_label_values(&[name])
                .set(health.status.as_value());
        }
        self.metrics.health_checks_total.inc();
    }

    async fn handle_kv_failure(&self, message: &str) {
        warn!(message, "kv probe unhealthy, starting recovery");

        self.recoveries_attempted.fetch_add(1, Ordering::Relaxed);
        self.metrics.redis_recovery_attempts_total.inc();

        if self.checker.attempt_kv_recovery().await {
            info!("kv recovery succeeded");
            self.recoveries_succeeded.fetch_add(1, Ordering::Relaxed);
            self.metrics.redis_recovery_success_total.inc();

            self.publish(CrossEvent::new(
                CrossEventKind::HealthCheckRecovered,
                subsystems::HEALTH,
                subsystems::MONITORING,
                json!({
                    "component": KV_COMPONENT,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
                EventPriority::Normal,
            ));
        } else {
            error!("kv recovery failed");

            self.publish(CrossEvent::new(
                CrossEventKind::HealthCheckFailed,
                subsystems::HEALTH,
                subsystems::MONITORING,
                json!({
                    "component": KV_COMPONENT,
                    "status": "unhealthy",
                    "message": message,
                    "recovery_attempted": true,
                    "recovery_success": false,
                }),
                EventPriority::High,
            ));
        }
    }

    fn publish_health_failed(&self, result: &HealthCheckResult) {
        let failed: Vec<&str> = result
            .components
            .iter()
            .filter(|(_, health)| health.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .collect();

        let priority = if result.overall_status == OverallStatus::Critical {
            EventPriority::Critical
        } else {
            EventPriority::High
        };

        warn!(
            status = result.overall_status.as_str(),
            failed = ?failed,
            "publishing health check failure"
        );

        self.publish(CrossEvent::new(
            CrossEventKind::HealthCheckFailed,
            subsystems::HEALTH,
            subsystems::MONITORING,
            json!({
                "overall_status": result.overall_status.as_str(),
                "failed_components": failed,
                "timestamp": result.timestamp.to_rfc3339(),
            }),
            priority,
        ));
    }

    fn publish_degradation(&self, result: &HealthCheckResult) {
        let degraded: Vec<&str> = result
            .components
            .iter()
            .filter(|(_, health)| health.status == ComponentStatus::Degraded)
            .map(|(name, _)| name.as_str())
            .collect();

        info!(degraded = ?degraded, "publishing performance degradation");

        self.publish(CrossEvent::new(
            CrossEventKind::PerformanceDegradation,
            subsystems::HEALTH,
            subsystems::MONITORING,
            json!({
                "overall_status": result.overall_status.as_str(),
                "degraded_components": degraded,
                "timestamp": result.timestamp.to_rfc3339(),
            }),
            EventPriority::Normal,
        ));
    }

    fn publish(&self, event: CrossEvent) {
        if self.bus.publish(event) {
            self.events_published.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl HealthObserver for HealthAlertBridge {
    async fn on_health_result(&self, result: &HealthCheckResult) {
        self.health_checks_performed.fetch_add(1, Ordering::Relaxed);
        self.update_metrics(result);
        *self.latest.write() = Some(result.clone());

        if let Some(kv_health) = result.components.get(KV_COMPONENT) {
            if kv_health.status == ComponentStatus::Unhealthy {
                self.handle_kv_failure(&kv_health.message).await;
            }
        }

        match result.overall_status {
            OverallStatus::Unhealthy | OverallStatus::Critical => {
                self.publish_health_failed(result);
            }
            OverallStatus::Degraded => {
                self.publish_degradation(result);
            }
            OverallStatus::Healthy => {}
        }
    }
}
