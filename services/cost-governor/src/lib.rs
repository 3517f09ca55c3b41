//! Cost Governor
//!
//! Economic bounds for outbound model calls:
//! - [`ledger`] — real-time spend accounting across daily, monthly,
//!   per-service, and per-model axes, with budget alerts
//! - [`predictor`] — monthly projection from a trailing daily window
//! - [`breaker`] — circuit breaker enforcing per-call, daily, and monthly
//!   caps; critical calls are never blocked by aggregate state

pub mod breaker;
pub mod ledger;
pub mod predictor;

pub use breaker::{BreakerStatistics, BreakerStatus, CostBreaker, CostBreakerConfig};
pub use ledger::{BudgetState, CostLedger, CostLedgerConfig, LedgerStatistics};
pub use predictor::{BudgetAlert, CostPredictor, CostTrend, DailyPrediction, MonthlyPrediction, Trend};
