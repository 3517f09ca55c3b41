//! Sentinel kernel
//!
//! The integration fabric and the supervisor binary. The [`bridges`]
//! translate subsystem observations into cross-subsystem events and
//! actions; [`config`] loads the environment-driven settings the binary
//! assembles the construction graph from.

pub mod bridges;
pub mod config;

pub use bridges::cost::CostAlertBridge;
pub use bridges::health::HealthAlertBridge;
pub use bridges::risk::{
    KvRiskSource, MarketSnapshot, RiskDataSource, RiskEmergencyBridge, RiskProbe, SystemSnapshot,
};
pub use config::KernelConfig;
