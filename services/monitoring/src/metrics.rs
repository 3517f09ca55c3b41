//! Exported metric surface
//!
//! Every metric the kernel exposes lives on one registry so the scrape
//! endpoint and the tests see the same set. Names follow the
//! `<prefix>_<subject>_<unit>` convention with the `mia` prefix.

use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};

use services_common::{KernelError, KernelResult};

fn name(subject: &str) -> String {
    format!("{}_{subject}", services_common::constants::METRIC_PREFIX)
}

/// The full metric registry of the kernel
pub struct KernelMetrics {
    registry: Registry,

    // Health
    pub system_health_status: IntGauge,
    pub component_health_status: IntGaugeVec,
    pub health_checks_total: IntCounter,
    pub redis_recovery_attempts_total: IntCounter,
    pub redis_recovery_success_total: IntCounter,

    // Trading
    pub trades_total: IntCounterVec,
    pub trade_latency_seconds: Histogram,
    pub trade_volume: GaugeVec,

    // Soldier decisions
    pub soldier_latency_seconds: HistogramVec,
    pub soldier_mode: IntGauge,
    pub soldier_decisions_total: IntCounterVec,

    // GPU
    pub gpu_memory_used_bytes: IntGauge,
    pub gpu_memory_total_bytes: IntGauge,
    pub gpu_utilization_percent: Gauge,
    pub gpu_fragmentation_ratio: Gauge,
    pub gpu_temperature_celsius: Gauge,

    // KV
    pub redis_latency_seconds: HistogramVec,
    pub redis_failures_total: IntCounter,

    // System
    pub system_cpu_percent: Gauge,
    pub system_memory_percent: Gauge,
    pub system_memory_available_gb: Gauge,
    pub system_disk_percent: GaugeVec,
    pub system_disk_free_gb: GaugeVec,

    // Portfolio
    pub portfolio_value: Gauge,
    pub portfolio_pnl: GaugeVec,
    pub portfolio_positions: IntGauge,
    pub portfolio_cash: Gauge,

    // Arena
    pub arena_battles_total: IntCounterVec,
    pub arena_survivors: IntGaugeVec,

    // Cost
    pub cost_daily_total: Gauge,
    pub cost_monthly_total: Gauge,
    pub cost_predicted_monthly: Gauge,
    pub cost_by_service: GaugeVec,
    pub cost_daily_budget_utilization: Gauge,
    pub cost_monthly_budget_utilization: Gauge,
    pub cost_api_calls_total: IntCounterVec,
    pub cost_budget_exceeded: IntGaugeVec,
}

macro_rules! register {
    ($registry:expr, $metric:expr) => {{
        let metric = $metric.map_err(|e| KernelError::Configuration(e.to_string()))?;
        $registry
            .register(Box::new(metric.clone()))
            .map_err(|e| KernelError::Configuration(e.to_string()))?;
        metric
    }};
}

impl KernelMetrics {
    /// Build and register every metric on a fresh registry
    pub fn new() -> KernelResult<Self> {
        let registry = Registry::new();

        let system_health_status = register!(
            registry,
            IntGauge::with_opts(Opts::new(
                name("system_health_status"),
                "Overall system health status (0=healthy, 1=degraded, 2=unhealthy, 3=critical)",
            ))
        );
        let component_health_status = register!(
            registry,
            IntGaugeVec::new(
                Opts::new(
                    name("component_health_status"),
                    "Component health status (0=healthy, 1=degraded, 2=unhealthy)",
                ),
                &["component"],
            )
        );
        let health_checks_total = register!(
            registry,
            IntCounter::with_opts(Opts::new(
                name("health_checks_total"),
                "Total number of health checks performed",
            ))
        );
        let redis_recovery_attempts_total = register!(
            registry,
            IntCounter::with_opts(Opts::new(
                name("redis_recovery_attempts_total"),
                "Total number of KV recovery attempts",
            ))
        );
        let redis_recovery_success_total = register!(
            registry,
            IntCounter::with_opts(Opts::new(
                name("redis_recovery_success_total"),
                "Total number of successful KV recoveries",
            ))
        );

        let trades_total = register!(
            registry,
            IntCounterVec::new(
                Opts::new(name("trades_total"), "Total number of trades"),
                &["strategy", "action", "status"],
            )
        );
        let trade_latency_seconds = register!(
            registry,
            Histogram::with_opts(
                HistogramOpts::new(name("trade_latency_seconds"), "Trade execution latency")
                    .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
            )
        );
        let trade_volume = register!(
            registry,
            GaugeVec::new(
                Opts::new(name("trade_volume"), "Trade volume in currency units"),
                &["strategy"],
            )
        );

        let soldier_latency_seconds = register!(
            registry,
            HistogramVec::new(
                HistogramOpts::new(name("soldier_latency_seconds"), "Decision latency")
                    .buckets(vec![0.01, 0.05, 0.1, 0.15, 0.2, 0.5, 1.0]),
                &["mode"],
            )
        );
        let soldier_mode = register!(
            registry,
            IntGauge::with_opts(Opts::new(
                name("soldier_mode"),
                "Decision mode (0=local, 1=cloud)",
            ))
        );
        let soldier_decisions_total = register!(
            registry,
            IntCounterVec::new(
                Opts::new(name("soldier_decisions_total"), "Total decisions"),
                &["mode", "action"],
            )
        );

        let gpu_memory_used_bytes = register!(
            registry,
            IntGauge::with_opts(Opts::new(
                name("gpu_memory_used_bytes"),
                "GPU memory used in bytes",
            ))
        );
        let gpu_memory_total_bytes = register!(
            registry,
            IntGauge::with_opts(Opts::new(
                name("gpu_memory_total_bytes"),
                "GPU memory total in bytes",
            ))
        );
        let gpu_utilization_percent = register!(
            registry,
            Gauge::with_opts(Opts::new(
                name("gpu_utilization_percent"),
                "GPU utilization percentage",
            ))
        );
        let gpu_fragmentation_ratio = register!(
            registry,
            Gauge::with_opts(Opts::new(
                name("gpu_fragmentation_ratio"),
                "GPU memory fragmentation ratio",
            ))
        );
        let gpu_temperature_celsius = register!(
            registry,
            Gauge::with_opts(Opts::new(
                name("gpu_temperature_celsius"),
                "GPU temperature in Celsius",
            ))
        );

        let redis_latency_seconds = register!(
            registry,
            HistogramVec::new(
                HistogramOpts::new(name("redis_latency_seconds"), "KV operation latency")
                    .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
                &["operation"],
            )
        );
        let redis_failures_total = register!(
            registry,
            IntCounter::with_opts(Opts::new(
                name("redis_failures_total"),
                "Total KV connection failures",
            ))
        );

        let system_cpu_percent = register!(
            registry,
            Gauge::with_opts(Opts::new(name("system_cpu_percent"), "CPU usage percentage"))
        );
        let system_memory_percent = register!(
            registry,
            Gauge::with_opts(Opts::new(
                name("system_memory_percent"),
                "Memory usage percentage",
            ))
        );
        let system_memory_available_gb = register!(
            registry,
            Gauge::with_opts(Opts::new(
                name("system_memory_available_gb"),
                "Available memory in GB",
            ))
        );
        let system_disk_percent = register!(
            registry,
            GaugeVec::new(
                Opts::new(name("system_disk_percent"), "Disk usage percentage"),
                &["drive"],
            )
        );
        let system_disk_free_gb = register!(
            registry,
            GaugeVec::new(
                Opts::new(name("system_disk_free_gb"), "Free disk space in GB"),
                &["drive"],
            )
        );

        let portfolio_value = register!(
            registry,
            Gauge::with_opts(Opts::new(
                name("portfolio_value"),
                "Total portfolio value in currency units",
            ))
        );
        let portfolio_pnl = register!(
            registry,
            GaugeVec::new(Opts::new(name("portfolio_pnl"), "Portfolio PnL"), &["period"])
        );
        let portfolio_positions = register!(
            registry,
            IntGauge::with_opts(Opts::new(
                name("portfolio_positions"),
                "Number of open positions",
            ))
        );
        let portfolio_cash = register!(
            registry,
            Gauge::with_opts(Opts::new(
                name("portfolio_cash"),
                "Available cash in currency units",
            ))
        );

        let arena_battles_total = register!(
            registry,
            IntCounterVec::new(
                Opts::new(name("arena_battles_total"), "Total arena battles"),
                &["track"],
            )
        );
        let arena_survivors = register!(
            registry,
            IntGaugeVec::new(
                Opts::new(name("arena_survivors"), "Number of surviving strategies"),
                &["track"],
            )
        );

        let cost_daily_total = register!(
            registry,
            Gauge::with_opts(Opts::new(name("cost_daily_total"), "Daily total cost"))
        );
        let cost_monthly_total = register!(
            registry,
            Gauge::with_opts(Opts::new(name("cost_monthly_total"), "Monthly total cost"))
        );
        let cost_predicted_monthly = register!(
            registry,
            Gauge::with_opts(Opts::new(
                name("cost_predicted_monthly"),
                "Predicted monthly cost",
            ))
        );
        let cost_by_service = register!(
            registry,
            GaugeVec::new(
                Opts::new(name("cost_by_service"), "Cost by service"),
                &["service"],
            )
        );
        let cost_daily_budget_utilization = register!(
            registry,
            Gauge::with_opts(Opts::new(
                name("cost_daily_budget_utilization"),
                "Daily budget utilization ratio",
            ))
        );
        let cost_monthly_budget_utilization = register!(
            registry,
            Gauge::with_opts(Opts::new(
                name("cost_monthly_budget_utilization"),
                "Monthly budget utilization ratio",
            ))
        );
        let cost_api_calls_total = register!(
            registry,
            IntCounterVec::new(
                Opts::new(name("cost_api_calls_total"), "Total API calls tracked"),
                &["service", "model"],
            )
        );
        let cost_budget_exceeded = register!(
            registry,
            IntGaugeVec::new(
                Opts::new(
                    name("cost_budget_exceeded"),
                    "Budget exceeded flag (0=no, 1=yes)",
                ),
                &["budget_type"],
            )
        );

        Ok(Self {
            registry,
            system_health_status,
            component_health_status,
            health_checks_total,
            redis_recovery_attempts_total,
            redis_recovery_success_total,
            trades_total,
            trade_latency_seconds,
            trade_volume,
            soldier_latency_seconds,
            soldier_mode,
            soldier_decisions_total,
            gpu_memory_used_bytes,
            gpu_memory_total_bytes,
            gpu_utilization_percent,
            gpu_fragmentation_ratio,
            gpu_temperature_celsius,
            redis_latency_seconds,
            redis_failures_total,
            system_cpu_percent,
            system_memory_percent,
            system_memory_available_gb,
            system_disk_percent,
            system_disk_free_gb,
            portfolio_value,
            portfolio_pnl,
            portfolio_positions,
            portfolio_cash,
            arena_battles_total,
            arena_survivors,
            cost_daily_total,
            cost_monthly_total,
            cost_predicted_monthly,
            cost_by_service,
            cost_daily_budget_utilization,
            cost_monthly_budget_utilization,
            cost_api_calls_total,
            cost_budget_exceeded,
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the text exposition format
    #[must_use]
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Record a completed trade
    pub fn record_trade(
        &self,
        strategy: &str,
        action: &str,
        status: &str,
        latency_seconds: f64,
        volume: f64,
    ) {
        self.trades_total
            .with_label_values(&[strategy, action, status])
            .inc();
        self.trade_latency_seconds.observe(latency_seconds);
        self.trade_volume.with_label_values(&[strategy]).set(volume);
    }

    /// Record one decision of the inference side
    pub fn record_decision(&self, mode: &str, action: &str, latency_seconds: f64) {
        self.soldier_decisions_total
            .with_label_values(&[mode, action])
            .inc();
        self.soldier_latency_seconds
            .with_label_values(&[mode])
            .observe(latency_seconds);
    }

    /// Record latency (and failure) of one KV operation
    pub fn record_kv_operation(&self, operation: &str, latency_seconds: f64, success: bool) {
        self.redis_latency_seconds
            .with_label_values(&[operation])
            .observe(latency_seconds);
        if !success {
            self.redis_failures_total.inc();
        }
    }

    /// Record one arena battle outcome
    pub fn record_arena_battle(&self, track: &str, survivors: i64) {
        self.arena_battles_total.with_label_values(&[track]).inc();
        self.arena_survivors
            .with_label_values(&[track])
            .set(survivors);
    }
}
