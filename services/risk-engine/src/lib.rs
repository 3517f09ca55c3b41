//! Risk Engine
//!
//! Classification and response side of the safety kernel:
//! - [`assessor`] — five-axis risk monitors producing leveled risk events
//!   with severity aggregation over a sliding hour
//! - [`control_matrix`] — trading limits scaled by the current risk level
//! - [`emergency`] — tiered alert dispatch with SLA-bounded response

pub mod assessor;
pub mod control_matrix;
pub mod emergency;

pub use assessor::{
    MarketTrend, RiskAssessor, RiskEvent, RiskLevel, RiskSummary, RiskThresholds, RiskType,
};
pub use control_matrix::{ControlMatrix, LimitSnapshot, MatrixLimits};
pub use emergency::{
    AlertContext, AlertHandler, AlertLevel, EmergencyResponder, EmergencyStatistics,
    ProcedureKind, ProcedureRecord,
};
