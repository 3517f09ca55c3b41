//! Cross-subsystem event layer
//!
//! Typed event vocabulary the integration bridges speak, plus the static
//! routing table of permitted source → target subsystem pairs. Events on an
//! undefined route are still delivered, with a warning and a bumped
//! routing-error counter.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{BusMessage, EventBus, EventHandler, EventPriority};
use crate::constants::subsystems;

/// Typed cross-subsystem event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossEventKind {
    HealthCheckFailed,
    HealthCheckRecovered,
    MonitoringAlert,
    PerformanceDegradation,
    CostLimitExceeded,
    CostBudgetWarning,
    RiskLevelChanged,
    EmergencyTriggered,
    DoomsdayTriggered,
    DoomsdayReset,
}

impl CrossEventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HealthCheckFailed => "health_check_failed",
            Self::HealthCheckRecovered => "health_check_recovered",
            Self::MonitoringAlert => "monitoring_alert",
            Self::PerformanceDegradation => "performance_degradation",
            Self::CostLimitExceeded => "cost_limit_exceeded",
            Self::CostBudgetWarning => "cost_budget_warning",
            Self::RiskLevelChanged => "risk_level_changed",
            Self::EmergencyTriggered => "emergency_triggered",
            Self::DoomsdayTriggered => "doomsday_triggered",
            Self::DoomsdayReset => "doomsday_reset",
        }
    }
}

/// Envelope carried between subsystems
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossEvent {
    /// Unique event id for tracing and audit
    pub id: String,
    pub kind: CrossEventKind,
    /// Originating subsystem id
    pub source: u8,
    /// Destination subsystem id
    pub target: u8,
    /// Structured event detail
    pub data: Map<String, Value>,
    pub priority: EventPriority,
    pub created_at: DateTime<Utc>,
}

impl CrossEvent {
    /// Build an event; `data` must be a JSON object
    #[must_use]
    pub fn new(
        kind: CrossEventKind,
        source: u8,
        target: u8,
        data: Value,
        priority: EventPriority,
    ) -> Self {
        let data = match data {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                if !other.is_null() {
                    map.insert("detail".to_string(), other);
                }
                map
            }
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            source,
            target,
            data,
            priority,
            created_at: Utc::now(),
        }
    }
}

impl BusMessage for CrossEvent {
    fn event_type(&self) -> &'static str {
        self.kind.as_str()
    }

    fn priority(&self) -> EventPriority {
        self.priority
    }
}

/// Snapshot of cross-layer counters
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossBusStats {
    pub events_published: u64,
    pub routing_errors: u64,
}

/// Routing-validated publisher over the base bus
pub struct CrossBus {
    bus: EventBus<CrossEvent>,
    routes: FxHashMap<u8, FxHashSet<u8>>,
    events_published: AtomicU64,
    routing_errors: AtomicU64,
}

impl CrossBus {
    /// Wrap a base bus with the default routing table
    #[must_use]
    pub fn new(bus: EventBus<CrossEvent>) -> Self {
        Self {
            bus,
            routes: default_routes(),
            events_published: AtomicU64::new(0),
            routing_errors: AtomicU64::new(0),
        }
    }

    /// Validate the route, then hand the event to the base bus
    ///
    /// Undefined routes are delivered anyway; the mismatch is logged and
    /// counted so deployments that want strict routing can alarm on it.
    pub fn publish(&self, event: CrossEvent) -> bool {
        if !self.route_defined(event.source, event.target) {
            warn!(
                source = event.source,
                target = event.target,
                kind = event.kind.as_str(),
                "no route defined between subsystems, delivering anyway"
            );
            self.routing_errors.fetch_add(1, Ordering::Relaxed);
        }

        let kind = event.kind;
        let published = self.bus.publish(event);
        if published {
            self.events_published.fetch_add(1, Ordering::Relaxed);
            debug!(kind = kind.as_str(), "cross-subsystem event published");
        }
        published
    }

    /// Subscribe a handler to one event kind
    pub fn subscribe<H>(&self, kind: CrossEventKind, handler: H) -> String
    where
        H: EventHandler<CrossEvent> + 'static,
    {
        self.bus.subscribe(kind.as_str(), handler)
    }

    #[must_use]
    pub fn route_defined(&self, source: u8, target: u8) -> bool {
        self.routes
            .get(&source)
            .is_some_and(|targets| targets.contains(&target))
    }

    /// The static routing table as (source, sorted targets) pairs
    #[must_use]
    pub fn routing_table(&self) -> Vec<(u8, Vec<u8>)> {
        let mut table: Vec<(u8, Vec<u8>)> = self
            .routes
            .iter()
            .map(|(source, targets)| {
                let mut targets: Vec<u8> = targets.iter().copied().collect();
                targets.sort_unstable();
                (*source, targets)
            })
            .collect();
        table.sort_unstable_by_key(|(source, _)| *source);
        table
    }

    #[must_use]
    pub fn stats(&self) -> CrossBusStats {
        CrossBusStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            routing_errors: self.routing_errors.load(Ordering::Relaxed),
        }
    }

    /// The underlying base bus
    #[must_use]
    pub fn base(&self) -> &EventBus<CrossEvent> {
        &self.bus
    }
}

fn default_routes() -> FxHashMap<u8, FxHashSet<u8>> {
    let table: [(u8, &[u8]); 5] = [
        (subsystems::HEALTH, &[subsystems::MONITORING, subsystems::RISK]),
        (subsystems::DOOMSDAY, &[subsystems::RISK]),
        (subsystems::MONITORING, &[subsystems::RISK]),
        (subsystems::COST, &[subsystems::MONITORING]),
        (subsystems::RISK, &[subsystems::MONITORING]),
    ];

    table
        .into_iter()
        .map(|(source, targets)| (source, targets.iter().copied().collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    struct Capture {
        events: Arc<Mutex<Vec<CrossEvent>>>,
    }

    #[async_trait]
    impl EventHandler<CrossEvent> for Capture {
        async fn handle(&self, event: CrossEvent) -> anyhow::Result<()> {
            self.events.lock().push(event);
            Ok(())
        }

        fn id(&self) -> &str {
            "capture"
        }
    }

    fn started_cross_bus() -> (CrossBus, Arc<Mutex<Vec<CrossEvent>>>) {
        let bus = EventBus::new();
        bus.start();
        let cross = CrossBus::new(bus);
        let events = Arc::new(Mutex::new(Vec::new()));
        cross.subscribe(
            CrossEventKind::HealthCheckFailed,
            Capture {
                events: Arc::clone(&events),
            },
        );
        (cross, events)
    }

    #[tokio::test]
    async fn defined_route_publishes_without_routing_error() {
        let (cross, events) = started_cross_bus();

        let ok = cross.publish(CrossEvent::new(
            CrossEventKind::HealthCheckFailed,
            subsystems::HEALTH,
            subsystems::MONITORING,
            json!({"component": "kv"}),
            EventPriority::High,
        ));
        cross.base().quiesce().await;

        assert!(ok);
        assert_eq!(events.lock().len(), 1);
        let stats = cross.stats();
        assert_eq!(stats.events_published, 1);
        assert_eq!(stats.routing_errors, 0);
    }

    #[tokio::test]
    async fn undefined_route_delivers_with_warning() {
        let (cross, events) = started_cross_bus();

        let ok = cross.publish(CrossEvent::new(
            CrossEventKind::HealthCheckFailed,
            subsystems::DOOMSDAY,
            subsystems::MONITORING,
            json!({}),
            EventPriority::Critical,
        ));
        cross.base().quiesce().await;

        assert!(ok, "undefined routes still deliver");
        assert_eq!(events.lock().len(), 1);
        assert_eq!(cross.stats().routing_errors, 1);
    }

    #[tokio::test]
    async fn routing_table_is_the_enumerated_contract() {
        let bus = EventBus::new();
        let cross = CrossBus::new(bus);

        assert_eq!(
            cross.routing_table(),
            vec![
                (10, vec![13, 19]),
                (12, vec![19]),
                (13, vec![19]),
                (18, vec![13]),
                (19, vec![13]),
            ]
        );
        assert!(cross.route_defined(10, 13));
        assert!(!cross.route_defined(13, 10));
    }

    #[test]
    fn non_object_data_wraps_into_detail() {
        let event = CrossEvent::new(
            CrossEventKind::MonitoringAlert,
            subsystems::MONITORING,
            subsystems::RISK,
            json!("plain message"),
            EventPriority::Normal,
        );
        assert_eq!(event.data.get("detail"), Some(&json!("plain message")));
    }
}
