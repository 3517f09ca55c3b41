//! Sentinel — operational safety kernel supervisor
//!
//! Assembles the construction graph explicitly at startup: KV client,
//! event bus, cost governor, risk engine, doomsday switch, health monitor,
//! metrics collector, and the integration bridges wiring them together.
//! Runs until an interrupt or terminate signal, then shuts the loops down
//! cooperatively.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cost_governor::{
    CostBreaker, CostBreakerConfig, CostLedger, CostLedgerConfig, CostPredictor,
};
use doomsday::{DoomsdaySwitch, SysinfoSampler, TriggerConfig};
use health_monitor::{HealthChecker, HealthCheckerConfig, Supervisor, SupervisorConfig};
use kernel::bridges::cost::CostAlertBridge;
use kernel::bridges::health::HealthAlertBridge;
use kernel::bridges::risk::{KvRiskSource, RiskEmergencyBridge, RiskProbe};
use kernel::KernelConfig;
use monitoring::{KernelMetrics, MetricsCollector, MetricsConfig};
use risk_engine::{ControlMatrix, EmergencyResponder, MatrixLimits, RiskAssessor, RiskThresholds};
use services_common::{CrossBus, EventBus, KvStore, MemoryKv, RedisKv};

const BREAKER_RESET_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting sentinel kernel v{}", env!("CARGO_PKG_VERSION"));

    let config = KernelConfig::from_env()?;

    // KV client; absence degrades every consumer to in-memory mode
    let kv: Option<Arc<dyn KvStore>> = match &config.redis_url {
        Some(url) => match RedisKv::connect(url).await {
            Ok(client) => {
                info!(url = %url, "connected to kv store");
                Some(Arc::new(client))
            }
            Err(e) => {
                warn!(error = %e, "kv connection failed, degrading to in-memory mode");
                None
            }
        },
        None => None,
    };

    // Event fabric
    let base_bus = EventBus::new();
    base_bus.start();
    let bus = Arc::new(CrossBus::new(base_bus));

    // Metrics
    let metrics = Arc::new(KernelMetrics::new()?);
    let collector = Arc::new(MetricsCollector::new(
        Arc::clone(&metrics),
        kv.clone(),
        MetricsConfig {
            port: config.metrics_port,
            collection_interval: config.collection_interval,
            ..MetricsConfig::default()
        },
    )?);
    collector.start()?;

    let exposition_metrics = Arc::clone(&metrics);
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = monitoring::serve(exposition_metrics, metrics_port).await {
            error!(error = %e, "metrics endpoint failed");
        }
    });

    // Cost governor
    let ledger = Arc::new(CostLedger::new(
        kv.clone(),
        CostLedgerConfig {
            daily_budget: config.daily_budget,
            monthly_budget: config.monthly_budget,
        },
    )?);
    let predictor = Arc::new(CostPredictor::new(
        Arc::clone(&ledger),
        cost_governor::predictor::DEFAULT_WINDOW,
    )?);
    let breaker = Arc::new(CostBreaker::new(
        Arc::clone(&ledger),
        kv.clone(),
        CostBreakerConfig {
            daily_limit: config.daily_budget,
            monthly_limit: config.monthly_budget,
            ..CostBreakerConfig::default()
        },
    )?);

    // Risk engine
    let assessor = Arc::new(RiskAssessor::new(RiskThresholds::default())?);
    let matrix = Arc::new(ControlMatrix::new(MatrixLimits::default())?);
    let responder = Arc::new(EmergencyResponder::new());

    // Doomsday switch
    let switch = Arc::new(DoomsdaySwitch::new(
        kv.clone(),
        TriggerConfig {
            lock_file_path: config.lock_file_path.clone(),
            ..TriggerConfig::default()
        },
        Arc::new(SysinfoSampler),
    ));
    if switch.is_triggered() {
        warn!("doomsday switch is engaged; non-critical activity is vetoed until reset");
    }

    // Health monitor; without a durable KV the probe target is a local stub
    let probe_kv: Arc<dyn KvStore> = kv.clone().unwrap_or_else(|| Arc::new(MemoryKv::new()));
    let checker = Arc::new(HealthChecker::new(
        probe_kv,
        HealthCheckerConfig {
            probe_ports: config.probe_ports.clone(),
            check_interval: config.health_interval,
            ..HealthCheckerConfig::default()
        },
    )?);

    // Integration bridges
    let health_bridge = Arc::new(HealthAlertBridge::new(
        Arc::clone(&checker),
        Arc::clone(&metrics),
        Arc::clone(&bus),
    ));
    let cost_bridge = Arc::new(CostAlertBridge::new(
        Arc::clone(&ledger),
        Arc::clone(&predictor),
        Arc::clone(&metrics),
        Arc::clone(&bus),
    ));
    cost_bridge.sync_cost_metrics().await;

    let risk_bridge = Arc::new(RiskEmergencyBridge::new(
        Arc::clone(&assessor),
        Arc::clone(&responder),
        Arc::clone(&switch),
        Arc::clone(&matrix),
        Arc::clone(&bus),
    ));
    let risk_source = Arc::new(KvRiskSource::new(kv.clone(), Arc::clone(&health_bridge)));
    let risk_probe = Arc::new(RiskProbe::new(Arc::clone(&risk_bridge), risk_source));

    // Periodic probe loops
    let supervisor = Arc::new(Supervisor::new(
        checker,
        health_bridge,
        risk_probe,
        SupervisorConfig {
            health_interval: config.health_interval,
            fund_interval: config.fund_interval,
            ..SupervisorConfig::default()
        },
    )?);
    supervisor.start()?;

    // Closed-breaker hygiene: retry the auto-reset once a minute
    let reset_breaker = Arc::clone(&breaker);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(BREAKER_RESET_INTERVAL);
        loop {
            interval.tick().await;
            reset_breaker.auto_reset_if_possible().await;
        }
    });

    info!("sentinel kernel running");
    shutdown_signal().await;

    info!("shutting down");
    supervisor.graceful_shutdown().await;
    collector.stop();
    bus.base().shutdown();
    info!("sentinel kernel stopped");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sentinel=info,kernel=info,info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();
}

/// Interrupt and terminate both initiate graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install interrupt handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install terminate handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("interrupt received, initiating graceful shutdown");
        }
        () = terminate => {
            info!("terminate received, initiating graceful shutdown");
        }
    }
}
