//! Control matrix
//!
//! Translates the current overall risk level into trading limits. Base
//! limits are scaled by a factor that depends solely on the level: low
//! keeps them, medium tightens 20%, high tightens 50%, critical zeroes
//! everything and blocks new positions.

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use services_common::{KernelError, KernelResult};

use crate::assessor::RiskLevel;

/// Base trading limits, each a ratio in (0, 1]
#[derive(Debug, Clone)]
pub struct MatrixLimits {
    /// Single-position share of the portfolio
    pub single_position_ratio: f64,
    /// Daily loss before forced stop-loss
    pub daily_loss_ratio: f64,
    /// Derivatives margin share
    pub margin_ratio: f64,
    /// Per-sector concentration share
    pub sector_concentration: f64,
}

impl Default for MatrixLimits {
    fn default() -> Self {
        Self {
            single_position_ratio: 0.20,
            daily_loss_ratio: 0.10,
            margin_ratio: 0.30,
            sector_concentration: 0.40,
        }
    }
}

/// Current limits after scaling
#[derive(Debug, Clone, Serialize)]
pub struct LimitSnapshot {
    pub position_limit: f64,
    pub sector_limit: f64,
    pub stop_loss_threshold: f64,
    pub margin_limit: f64,
    pub can_open_position: bool,
    pub risk_level: RiskLevel,
}

/// Risk-level-scaled trading limits
pub struct ControlMatrix {
    base: MatrixLimits,
    current_level: RwLock<RiskLevel>,
}

impl ControlMatrix {
    pub fn new(base: MatrixLimits) -> KernelResult<Self> {
        for (name, value) in [
            ("single position ratio", base.single_position_ratio),
            ("daily loss ratio", base.daily_loss_ratio),
            ("margin ratio", base.margin_ratio),
            ("sector concentration", base.sector_concentration),
        ] {
            if value <= 0.0 || value > 1.0 {
                return Err(KernelError::BadInput(format!(
                    "{name} must be in (0, 1]: {value}"
                )));
            }
        }

        info!(
            single_position = base.single_position_ratio,
            daily_loss = base.daily_loss_ratio,
            margin = base.margin_ratio,
            sector = base.sector_concentration,
            "control matrix initialized"
        );

        Ok(Self {
            base,
            current_level: RwLock::new(RiskLevel::Low),
        })
    }

    pub fn update_risk_level(&self, level: RiskLevel) {
        let mut current = self.current_level.write();
        if *current != level {
            info!(
                from = current.as_str(),
                to = level.as_str(),
                "risk level updated"
            );
        }
        *current = level;
    }

    #[must_use]
    pub fn current_risk_level(&self) -> RiskLevel {
        *self.current_level.read()
    }

    /// Multiplier applied to every base limit at the current level
    #[must_use]
    pub fn scale_factor(&self) -> f64 {
        match self.current_risk_level() {
            RiskLevel::Low => 1.0,
            RiskLevel::Medium => 0.80,
            RiskLevel::High => 0.50,
            RiskLevel::Critical => 0.0,
        }
    }

    #[must_use]
    pub fn position_limit(&self) -> f64 {
        self.base.single_position_ratio * self.scale_factor()
    }

    #[must_use]
    pub fn sector_limit(&self) -> f64 {
        self.base.sector_concentration * self.scale_factor()
    }

    #[must_use]
    pub fn stop_loss_threshold(&self) -> f64 {
        self.base.daily_loss_ratio * self.scale_factor()
    }

    #[must_use]
    pub fn margin_limit(&self) -> f64 {
        self.base.margin_ratio * self.scale_factor()
    }

    /// New positions are allowed at every level except critical
    #[must_use]
    pub fn can_open_position(&self) -> bool {
        self.current_risk_level() != RiskLevel::Critical
    }

    #[must_use]
    pub fn all_limits(&self) -> LimitSnapshot {
        LimitSnapshot {
            position_limit: self.position_limit(),
            sector_limit: self.sector_limit(),
            stop_loss_threshold: self.stop_loss_threshold(),
            margin_limit: self.margin_limit(),
            can_open_position: self.can_open_position(),
            risk_level: self.current_risk_level(),
        }
    }

    /// Force the level back to low
    pub fn reset_to_default(&self) {
        let mut current = self.current_level.write();
        if *current != RiskLevel::Low {
            info!(from = current.as_str(), "risk level reset to low");
        }
        *current = RiskLevel::Low;
    }
}
