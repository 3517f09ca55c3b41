//! Persisted key layout, pub/sub channels, and metric naming
//!
//! The KV key strings are an external contract shared with the trading
//! engine and the dashboards; changing one here is a breaking change.

/// KV keys (all UTF-8 strings)
pub mod keys {
    /// Daily cost bucket, suffixed with `YYYYMMDD`
    pub const COST_DAILY_PREFIX: &str = "cost:daily:";
    /// Per-service cost total, suffixed with the service name
    pub const COST_SERVICE_PREFIX: &str = "cost:service:";
    /// Per-model cost total, suffixed with the model name
    pub const COST_MODEL_PREFIX: &str = "cost:model:";
    /// Grand total across all services and models
    pub const COST_TOTAL: &str = "cost:total";
    /// JSON-encoded budget alerts, trimmed to the most recent 100
    pub const COST_ALERTS: &str = "cost:alerts";
    /// "open" while the cost breaker is open, absent otherwise
    pub const COST_CIRCUIT_BREAKER: &str = "cost:circuit_breaker";

    /// Consecutive Redis probe failures
    pub const REDIS_FAILURES: &str = "system:redis_failures";
    /// Consecutive GPU probe failures
    pub const GPU_FAILURES: &str = "system:gpu_failures";

    pub const DAILY_PNL: &str = "portfolio:daily_pnl";
    pub const INITIAL_CAPITAL: &str = "portfolio:initial_capital";
    pub const TOTAL_PNL: &str = "portfolio:total_pnl";
    pub const TOTAL_VALUE: &str = "portfolio:total_value";
    pub const POSITIONS_COUNT: &str = "portfolio:positions_count";
    pub const AVAILABLE_CASH: &str = "portfolio:available_cash";

    /// Soldier inference mode; exported as 1 when equal to "cloud"
    pub const SOLDIER_MODE: &str = "mia:soldier:mode";
    /// "triggered" while the doomsday switch is engaged, absent otherwise
    pub const DOOMSDAY_FLAG: &str = "mia:doomsday";
    pub const DOOMSDAY_REASON: &str = "mia:doomsday:reason";
    /// Authoritative reset secret; the kernel only ever reads it
    pub const DOOMSDAY_PASSWORD: &str = "config:doomsday:password";
}

/// Pub/sub channels the kernel publishes on
pub mod channels {
    pub const EMERGENCY_STOP: &str = "trading:emergency_stop";
    pub const LIQUIDATE_ALL: &str = "trading:liquidate_all";
}

/// Numeric subsystem identifiers used for event routing
pub mod subsystems {
    pub const HEALTH: u8 = 10;
    pub const DOOMSDAY: u8 = 12;
    pub const MONITORING: u8 = 13;
    pub const COST: u8 = 18;
    pub const RISK: u8 = 19;
}

/// Prefix for every exported metric name
pub const METRIC_PREFIX: &str = "mia";
