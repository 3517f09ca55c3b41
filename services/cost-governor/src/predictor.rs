//! Cost predictor
//!
//! Projects monthly spend from a trailing window of daily buckets. The
//! confidence score decays with the coefficient of variation of the window,
//! so a noisy week predicts with less certainty than a flat one.

use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use tracing::{info, warn};

use services_common::{KernelError, KernelResult};

use crate::ledger::CostLedger;

/// Default trailing window in days
pub const DEFAULT_WINDOW: u32 = 7;

/// Monthly projection
#[derive(Debug, Clone, Serialize)]
pub struct MonthlyPrediction {
    pub avg_daily: f64,
    pub predicted_monthly: f64,
    pub budget: f64,
    pub utilization: f64,
    pub sample_size: usize,
    pub confidence: f64,
    pub is_over_budget: bool,
}

/// Short-horizon projection
#[derive(Debug, Clone, Serialize)]
pub struct DailyPrediction {
    pub predicted_cost: f64,
    pub days_ahead: u32,
    pub confidence: f64,
    pub sample_size: usize,
    pub avg_daily: f64,
}

/// Raised when the projection exceeds the monthly budget
#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlert {
    pub predicted_monthly: f64,
    pub budget_monthly: f64,
    pub excess_amount: f64,
    pub utilization: f64,
    pub message: String,
}

/// Direction of the recent cost series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Trend summary over a window
#[derive(Debug, Clone, Serialize)]
pub struct CostTrend {
    pub daily_costs: Vec<f64>,
    pub trend: Trend,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// Monthly spend projection over the ledger's daily buckets
pub struct CostPredictor {
    ledger: Arc<CostLedger>,
    window: u32,
}

impl CostPredictor {
    pub fn new(ledger: Arc<CostLedger>, window: u32) -> KernelResult<Self> {
        if window == 0 {
            return Err(KernelError::BadInput(
                "prediction window must be > 0".to_string(),
            ));
        }
        Ok(Self { ledger, window })
    }

    /// Project this month's total from the trailing window
    pub async fn predict_monthly(&self) -> MonthlyPrediction {
        let samples = self.recent_daily_costs(self.window).await;

        let (avg_daily, confidence) = if samples.is_empty() {
            (0.0, 0.0)
        } else {
            let avg = samples.iter().sum::<f64>() / samples.len() as f64;
            (avg, confidence_from(&samples))
        };

        let predicted_monthly = avg_daily * 30.0;
        let budget = self.ledger.monthly_budget();
        let utilization = predicted_monthly / budget;

        let prediction = MonthlyPrediction {
            avg_daily,
            predicted_monthly,
            budget,
            utilization,
            sample_size: samples.len(),
            confidence,
            is_over_budget: predicted_monthly > budget,
        };

        info!(
            avg_daily,
            predicted_monthly,
            utilization,
            sample_size = prediction.sample_size,
            "monthly cost prediction"
        );

        prediction
    }

    /// Project spend `days_ahead` days out
    pub async fn predict_daily(&self, days_ahead: u32) -> KernelResult<DailyPrediction> {
        if days_ahead == 0 {
            return Err(KernelError::BadInput("days ahead must be > 0".to_string()));
        }

        let samples = self.recent_daily_costs(self.window).await;
        if samples.is_empty() {
            return Ok(DailyPrediction {
                predicted_cost: 0.0,
                days_ahead,
                confidence: 0.0,
                sample_size: 0,
                avg_daily: 0.0,
            });
        }

        let avg_daily = samples.iter().sum::<f64>() / samples.len() as f64;
        Ok(DailyPrediction {
            predicted_cost: avg_daily * f64::from(days_ahead),
            days_ahead,
            confidence: confidence_from(&samples),
            sample_size: samples.len(),
            avg_daily,
        })
    }

    /// Alert iff the projection exceeds the monthly budget
    pub async fn alert_if_over_budget(&self) -> Option<BudgetAlert> {
        let prediction = self.predict_monthly().await;
        if !prediction.is_over_budget {
            return None;
        }

        let alert = BudgetAlert {
            predicted_monthly: prediction.predicted_monthly,
            budget_monthly: prediction.budget,
            excess_amount: prediction.predicted_monthly - prediction.budget,
            utilization: prediction.utilization,
            message: format!(
                "predicted monthly cost over budget: {:.2} > {:.2}",
                prediction.predicted_monthly, prediction.budget
            ),
        };

        warn!(
            predicted = alert.predicted_monthly,
            budget = alert.budget_monthly,
            excess = alert.excess_amount,
            "predicted monthly cost over budget"
        );

        Some(alert)
    }

    /// Trend over the trailing `days`, oldest sample last
    pub async fn cost_trend(&self, days: u32) -> KernelResult<CostTrend> {
        if days == 0 {
            return Err(KernelError::BadInput("days must be > 0".to_string()));
        }

        let samples = self.recent_daily_costs(days).await;
        if samples.is_empty() {
            return Ok(CostTrend {
                daily_costs: Vec::new(),
                trend: Trend::Stable,
                avg: 0.0,
                min: 0.0,
                max: 0.0,
            });
        }

        let avg = samples.iter().sum::<f64>() / samples.len() as f64;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let trend = analyze_trend(&samples);

        Ok(CostTrend {
            daily_costs: samples,
            trend,
            avg,
            min,
            max,
        })
    }

    /// Daily buckets with a record, most recent first, over `days` days
    async fn recent_daily_costs(&self, days: u32) -> Vec<f64> {
        let mut samples = Vec::new();
        let today = Local::now().date_naive();

        for i in 0..days {
            let date = today - chrono::Duration::days(i64::from(i));
            let date_str = date.format("%Y%m%d").to_string();
            if let Some(cost) = self.ledger.daily_record(&date_str).await {
                samples.push(cost);
            }
        }

        samples
    }
}

/// Confidence from the coefficient of variation
///
/// CV 0 → ~0.95, CV 0.13 → ~0.85, CV 0.65 → ~0.53. Fewer than two samples
/// or a zero mean give the neutral 0.5.
fn confidence_from(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.5;
    }

    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    if mean == 0.0 {
        return 0.5;
    }

    let variance = samples
        .iter()
        .map(|x| (x - mean).powi(2))
        .sum::<f64>()
        / samples.len() as f64;
    let cv = variance.sqrt() / mean;

    (0.95 * (-0.9 * cv).exp()).clamp(0.0, 1.0)
}

/// Least-squares slope against a threshold of 5% of the mean
fn analyze_trend(samples: &[f64]) -> Trend {
    if samples.len() < 2 {
        return Trend::Stable;
    }

    let n = samples.len();
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = samples.iter().sum::<f64>() / n as f64;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, y) in samples.iter().enumerate() {
        let dx = i as f64 - x_mean;
        numerator += dx * (y - y_mean);
        denominator += dx * dx;
    }

    if denominator == 0.0 {
        return Trend::Stable;
    }

    let slope = numerator / denominator;
    let threshold = if y_mean > 0.0 { y_mean * 0.05 } else { 0.01 };

    if slope > threshold {
        Trend::Increasing
    } else if slope < -threshold {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::CostLedgerConfig;

    fn predictor_over(ledger: CostLedger) -> CostPredictor {
        CostPredictor::new(Arc::new(ledger), DEFAULT_WINDOW).unwrap()
    }

    fn empty_predictor() -> CostPredictor {
        predictor_over(CostLedger::new(None, CostLedgerConfig::default()).unwrap())
    }

    #[test]
    fn zero_window_is_rejected() {
        let ledger = Arc::new(CostLedger::new(None, CostLedgerConfig::default()).unwrap());
        assert!(matches!(
            CostPredictor::new(ledger, 0),
            Err(KernelError::BadInput(_))
        ));
    }

    #[tokio::test]
    async fn empty_history_predicts_zero_with_no_confidence() {
        let prediction = empty_predictor().predict_monthly().await;
        assert_eq!(prediction.predicted_monthly, 0.0);
        assert_eq!(prediction.sample_size, 0);
        assert_eq!(prediction.confidence, 0.0);
        assert!(!prediction.is_over_budget);
    }

    #[tokio::test]
    async fn single_day_predicts_thirty_times_it() {
        let ledger = CostLedger::new(None, CostLedgerConfig::default()).unwrap();
        // 1M tokens at 1.0/M puts 1.0 into today's bucket
        ledger.track("svc", "qwen-next-80b", 1_000_000, 0).await.unwrap();

        let prediction = predictor_over(ledger).predict_monthly().await;
        assert_eq!(prediction.sample_size, 1);
        assert!((prediction.avg_daily - 1.0).abs() < 1e-9);
        assert!((prediction.predicted_monthly - 30.0).abs() < 1e-9);
        assert_eq!(prediction.confidence, 0.5, "one sample is neutral confidence");
    }

    #[tokio::test]
    async fn over_budget_projection_raises_an_alert() {
        let config = CostLedgerConfig {
            daily_budget: 1000.0,
            monthly_budget: 10.0,
        };
        let ledger = CostLedger::new(None, config).unwrap();
        ledger.track("svc", "qwen-next-80b", 1_000_000, 0).await.unwrap();

        let predictor = predictor_over(ledger);
        let alert = predictor.alert_if_over_budget().await.expect("30 > 10");
        assert!((alert.excess_amount - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn under_budget_projection_stays_silent() {
        let ledger = CostLedger::new(None, CostLedgerConfig::default()).unwrap();
        ledger.track("svc", "deepseek-chat", 10_000, 0).await.unwrap();
        assert!(predictor_over(ledger).alert_if_over_budget().await.is_none());
    }

    #[tokio::test]
    async fn predict_daily_rejects_zero_days() {
        assert!(matches!(
            empty_predictor().predict_daily(0).await,
            Err(KernelError::BadInput(_))
        ));
    }

    #[tokio::test]
    async fn cost_trend_of_empty_history_is_stable() {
        let trend = empty_predictor().cost_trend(30).await.unwrap();
        assert_eq!(trend.trend, Trend::Stable);
        assert!(trend.daily_costs.is_empty());
    }

    #[test]
    fn confidence_is_high_for_flat_series() {
        let c = confidence_from(&[5.0, 5.0, 5.0, 5.0]);
        assert!((c - 0.95).abs() < 1e-9, "zero CV gives 0.95, got {c}");
    }

    #[test]
    fn confidence_decays_with_variance() {
        let flat = confidence_from(&[5.0, 5.0, 5.0, 5.0]);
        let noisy = confidence_from(&[1.0, 9.0, 2.0, 8.0]);
        assert!(noisy < flat);
        assert!((0.0..=1.0).contains(&noisy));
    }

    #[test]
    fn confidence_of_zero_mean_is_neutral() {
        assert_eq!(confidence_from(&[0.0, 0.0, 0.0]), 0.5);
    }

    #[test]
    fn trend_detects_direction() {
        assert_eq!(analyze_trend(&[1.0, 2.0, 3.0, 4.0, 5.0]), Trend::Increasing);
        assert_eq!(analyze_trend(&[5.0, 4.0, 3.0, 2.0, 1.0]), Trend::Decreasing);
        assert_eq!(analyze_trend(&[3.0, 3.01, 2.99, 3.0]), Trend::Stable);
        assert_eq!(analyze_trend(&[3.0]), Trend::Stable);
    }
}
