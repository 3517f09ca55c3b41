//! Property tests for cost accounting invariants
//!
//! For any finite sequence of tracked calls: the sum of returned costs
//! equals today's daily bucket, per-service sums equal the daily bucket,
//! per-model sums equal the grand total, and costs never decrease without
//! an explicit reset.

use std::sync::Arc;

use cost_governor::{CostLedger, CostLedgerConfig};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Call {
    service: &'static str,
    model: &'static str,
    input_tokens: i64,
    output_tokens: i64,
}

const SERVICES: [&str; 3] = ["soldier", "commander", "auditor"];
const MODELS: [&str; 4] = ["deepseek-chat", "qwen-next-80b", "deepseek-r1", "local-model"];

fn call_strategy() -> impl Strategy<Value = Call> {
    (0usize..SERVICES.len(), 0usize..MODELS.len(), 0i64..2_000_000, 0i64..2_000_000).prop_map(
        |(s, m, input_tokens, output_tokens)| Call {
            service: SERVICES[s],
            model: MODELS[m],
            input_tokens,
            output_tokens,
        },
    )
}

fn run_calls(calls: &[Call]) -> (Arc<CostLedger>, Vec<f64>) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let ledger = Arc::new(
        CostLedger::new(
            None,
            CostLedgerConfig {
                daily_budget: 1e12,
                monthly_budget: 1e12,
            },
        )
        .unwrap(),
    );

    let costs = runtime.block_on(async {
        let mut costs = Vec::with_capacity(calls.len());
        for call in calls {
            costs.push(
                ledger
                    .track(call.service, call.model, call.input_tokens, call.output_tokens)
                    .await
                    .unwrap(),
            );
        }
        costs
    });

    (ledger, costs)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn returned_costs_sum_to_daily_bucket(calls in prop::collection::vec(call_strategy(), 0..40)) {
        let (ledger, costs) = run_calls(&calls);
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        let expected: f64 = costs.iter().sum();
        let daily = runtime.block_on(ledger.daily_cost(None));
        prop_assert!((daily - expected).abs() < 1e-6, "daily {daily} != sum {expected}");
    }

    #[test]
    fn per_service_sums_equal_daily_bucket(calls in prop::collection::vec(call_strategy(), 0..40)) {
        let (ledger, _) = run_calls(&calls);
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        let service_sum: f64 = ledger.breakdown().values().sum();
        let daily = runtime.block_on(ledger.daily_cost(None));
        prop_assert!((service_sum - daily).abs() < 1e-6);
    }

    #[test]
    fn per_model_sums_equal_grand_total(calls in prop::collection::vec(call_strategy(), 0..40)) {
        let (ledger, _) = run_calls(&calls);
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

        let model_sum: f64 = runtime.block_on(async {
            let mut sum = 0.0;
            for model in MODELS {
                sum += ledger.model_cost(model).await;
            }
            sum
        });
        let total = runtime.block_on(ledger.total_cost());
        prop_assert!((model_sum - total).abs() < 1e-6);
    }

    #[test]
    fn totals_never_decrease_while_tracking(calls in prop::collection::vec(call_strategy(), 1..30)) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let ledger = CostLedger::new(
            None,
            CostLedgerConfig { daily_budget: 1e12, monthly_budget: 1e12 },
        ).unwrap();

        runtime.block_on(async {
            let mut last_total = 0.0;
            for call in &calls {
                ledger
                    .track(call.service, call.model, call.input_tokens, call.output_tokens)
                    .await
                    .unwrap();
                let total = ledger.total_cost().await;
                assert!(total >= last_total, "total decreased: {total} < {last_total}");
                last_total = total;
            }
        });
    }
}
