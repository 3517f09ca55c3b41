//! Unit and property tests for the risk assessor

use proptest::prelude::*;
use risk_engine::{MarketTrend, RiskAssessor, RiskLevel, RiskThresholds, RiskType};
use services_common::KernelError;

fn assessor() -> RiskAssessor {
    RiskAssessor::new(RiskThresholds::default()).unwrap()
}

#[test]
fn out_of_range_thresholds_are_rejected() {
    for bad in [0.0, 1.0, -0.1, 1.5] {
        let thresholds = RiskThresholds {
            market_volatility: bad,
            ..RiskThresholds::default()
        };
        assert!(matches!(
            RiskAssessor::new(thresholds),
            Err(KernelError::BadInput(_))
        ));
    }
}

#[test]
fn out_of_range_inputs_raise_and_leave_no_event() {
    let assessor = assessor();

    assert!(matches!(
        assessor.monitor_market_risk(1.5, 0.0, MarketTrend::Normal),
        Err(KernelError::BadInput(_))
    ));
    assert!(matches!(
        assessor.monitor_market_risk(0.02, -2.0, MarketTrend::Normal),
        Err(KernelError::BadInput(_))
    ));
    assert!(matches!(
        assessor.monitor_system_risk(1.2, 0.5, 0.5),
        Err(KernelError::BadInput(_))
    ));
    assert!(matches!(
        assessor.monitor_liquidity_risk(0.1, -0.5, 0.8),
        Err(KernelError::BadInput(_))
    ));
    assert!(matches!(
        assessor.monitor_counterparty_risk(-0.1, 0, 0.1),
        Err(KernelError::BadInput(_))
    ));

    assert_eq!(assessor.event_count(), 0);
}

#[test]
fn calm_inputs_produce_no_event() {
    let assessor = assessor();
    assert!(assessor
        .monitor_market_risk(0.02, 0.01, MarketTrend::Normal)
        .unwrap()
        .is_none());
    assert!(assessor
        .monitor_system_risk(0.95, 0.9, 0.99)
        .unwrap()
        .is_none());
    assert!(assessor
        .monitor_operational_risk(1.5, 0.95, 0.1)
        .unwrap()
        .is_none());
    assert!(assessor
        .monitor_liquidity_risk(0.05, 1.0, 0.9)
        .unwrap()
        .is_none());
    assert!(assessor
        .monitor_counterparty_risk(0.9, 1, 0.1)
        .unwrap()
        .is_none());
    assert_eq!(assessor.overall_risk_level(), RiskLevel::Low);
}

#[test]
fn volatility_scales_with_threshold_ratio() {
    // Threshold 0.05: 0.06 → medium (1.2x), 0.08 → high (1.6x), 0.12 → critical (2.4x)
    let assessor = assessor();

    let medium = assessor
        .monitor_market_risk(0.06, 0.0, MarketTrend::Normal)
        .unwrap()
        .unwrap();
    assert_eq!(medium.risk_level, RiskLevel::Medium);
    assert_eq!(medium.risk_type, RiskType::Market);

    let high = assessor
        .monitor_market_risk(0.08, 0.0, MarketTrend::Normal)
        .unwrap()
        .unwrap();
    assert_eq!(high.risk_level, RiskLevel::High);

    let critical = assessor
        .monitor_market_risk(0.12, 0.0, MarketTrend::Normal)
        .unwrap()
        .unwrap();
    assert_eq!(critical.risk_level, RiskLevel::Critical);
}

#[test]
fn heavy_daily_loss_is_critical() {
    let event = assessor()
        .monitor_market_risk(0.03, -0.15, MarketTrend::Normal)
        .unwrap()
        .unwrap();
    assert_eq!(event.risk_level, RiskLevel::Critical);
    assert_eq!(event.risk_type, RiskType::Market);
    assert_eq!(event.metrics.get("daily_pnl_ratio"), Some(&-0.15));
}

#[test]
fn crash_regime_is_critical_even_when_calm() {
    let event = assessor()
        .monitor_market_risk(0.01, 0.0, MarketTrend::Crash)
        .unwrap()
        .unwrap();
    assert_eq!(event.risk_level, RiskLevel::Critical);
}

#[test]
fn system_risk_names_failing_components() {
    let event = assessor()
        .monitor_system_risk(0.5, 0.95, 0.7)
        .unwrap()
        .unwrap();
    assert_eq!(event.risk_type, RiskType::System);
    assert!(event.description.contains("redis"));
    assert!(event.description.contains("network"));
    assert!(!event.description.contains("gpu"));
}

#[test]
fn sharpe_below_half_is_high_risk() {
    let assessor = assessor();
    let medium = assessor
        .monitor_operational_risk(0.8, 0.9, 0.1)
        .unwrap()
        .unwrap();
    assert_eq!(medium.risk_level, RiskLevel::Medium);

    let high = assessor
        .monitor_operational_risk(0.3, 0.9, 0.1)
        .unwrap()
        .unwrap();
    assert_eq!(high.risk_level, RiskLevel::High);
}

#[test]
fn liquidity_checks_fire_in_order() {
    let assessor = assessor();

    // Wide spread wins over low volume
    let spread = assessor
        .monitor_liquidity_risk(0.5, 0.05, 0.9)
        .unwrap()
        .unwrap();
    assert!(spread.description.contains("spread"));

    // Volume next
    let volume = assessor
        .monitor_liquidity_risk(0.05, 0.05, 0.9)
        .unwrap()
        .unwrap();
    assert_eq!(volume.risk_level, RiskLevel::High);
    assert!(volume.description.contains("volume"));

    // Depth last
    let depth = assessor
        .monitor_liquidity_risk(0.05, 0.9, 0.2)
        .unwrap()
        .unwrap();
    assert!(depth.description.contains("depth"));
}

#[test]
fn settlement_delay_beyond_five_days_is_high() {
    let assessor = assessor();
    let medium = assessor
        .monitor_counterparty_risk(0.9, 4, 0.1)
        .unwrap()
        .unwrap();
    assert_eq!(medium.risk_level, RiskLevel::Medium);

    let high = assessor
        .monitor_counterparty_risk(0.9, 6, 0.1)
        .unwrap()
        .unwrap();
    assert_eq!(high.risk_level, RiskLevel::High);
}

#[test]
fn overall_level_is_max_of_recent_events() {
    let assessor = assessor();
    assessor
        .monitor_operational_risk(0.8, 0.9, 0.1)
        .unwrap()
        .unwrap(); // medium
    assert_eq!(assessor.overall_risk_level(), RiskLevel::Medium);

    assessor
        .monitor_market_risk(0.0, -0.2, MarketTrend::Normal)
        .unwrap()
        .unwrap(); // critical
    assert_eq!(assessor.overall_risk_level(), RiskLevel::Critical);
}

#[test]
fn clear_old_events_rejects_zero_and_keeps_recent() {
    let assessor = assessor();
    assert!(matches!(
        assessor.clear_old_events(0),
        Err(KernelError::BadInput(_))
    ));

    assessor
        .monitor_market_risk(0.06, 0.0, MarketTrend::Normal)
        .unwrap();
    assert_eq!(assessor.clear_old_events(1).unwrap(), 0);
    assert_eq!(assessor.event_count(), 1);
}

#[test]
fn summary_counts_by_type_and_level() {
    let assessor = assessor();
    assessor
        .monitor_market_risk(0.06, 0.0, MarketTrend::Normal)
        .unwrap();
    assessor.monitor_system_risk(0.5, 0.9, 0.9).unwrap();

    let summary = assessor.risk_summary();
    assert_eq!(summary.total_events, 2);
    assert_eq!(summary.type_counts.get("market_risk"), Some(&1));
    assert_eq!(summary.type_counts.get("system_risk"), Some(&1));
    assert!(summary.recent_events.len() <= 5);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Overall risk equals the max severity of the events recorded so far
    #[test]
    fn overall_is_max_severity(volatilities in prop::collection::vec(0.0f64..0.5, 1..12)) {
        let assessor = RiskAssessor::new(RiskThresholds::default()).unwrap();
        let mut max_level = RiskLevel::Low;

        for volatility in volatilities {
            if let Some(event) = assessor
                .monitor_market_risk(volatility, 0.0, MarketTrend::Normal)
                .unwrap()
            {
                max_level = max_level.max(event.risk_level);
            }
        }

        prop_assert_eq!(assessor.overall_risk_level(), max_level);
    }

    /// The scaling rule is exactly the ratio thresholds
    #[test]
    fn severity_matches_ratio(value in 0.001f64..10.0, threshold in 0.001f64..10.0) {
        let ratio = value / threshold;
        let expected = if ratio >= 2.0 {
            RiskLevel::Critical
        } else if ratio >= 1.5 {
            RiskLevel::High
        } else if ratio >= 1.0 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };
        prop_assert_eq!(risk_engine::assessor::severity_for(value, threshold), expected);
    }
}
