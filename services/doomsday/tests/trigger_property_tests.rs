//! Property tests for trigger inclusion and reset authentication
//!
//! Integer thresholds (failure counters) compare with `>=`; ratio
//! thresholds (memory, disk) compare strictly with `>`. A condition
//! appears in `check_triggers()` exactly when its comparison holds. Reset
//! succeeds exactly for the stored secret.

use std::sync::Arc;

use doomsday::{DoomsdaySwitch, SystemSampler, TriggerConfig};
use proptest::prelude::*;
use services_common::constants::keys;
use services_common::{KvStore, MemoryKv};
use tempfile::TempDir;

struct FixedSampler {
    memory: f64,
    disk: f64,
}

impl SystemSampler for FixedSampler {
    fn memory_used_ratio(&self) -> f64 {
        self.memory
    }

    fn disk_used_ratio(&self) -> f64 {
        self.disk
    }
}

fn build_switch(
    dir: &TempDir,
    kv: Arc<MemoryKv>,
    kv_failure_threshold: i64,
    memory_threshold: f64,
    memory: f64,
) -> DoomsdaySwitch {
    let config = TriggerConfig {
        kv_failure_threshold,
        memory_critical_threshold: memory_threshold,
        lock_file_path: dir.path().join("doomsday.lock"),
        ..TriggerConfig::default()
    };
    DoomsdaySwitch::new(
        Some(kv as Arc<dyn KvStore>),
        config,
        Arc::new(FixedSampler { memory, disk: 0.0 }),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn integer_threshold_inclusion(threshold in 1i64..20, observed in 0i64..40) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(MemoryKv::new());
        let switch = build_switch(&dir, Arc::clone(&kv), threshold, 0.95, 0.0);

        runtime.block_on(async {
            kv.set(keys::REDIS_FAILURES, &observed.to_string()).await.unwrap();
            let fired = switch.check_triggers().await;
            let has_condition = fired.iter().any(|t| t.contains("Redis failures"));
            assert_eq!(has_condition, observed >= threshold,
                "observed {observed}, threshold {threshold}, fired {fired:?}");
        });
    }

    #[test]
    fn ratio_threshold_is_strict(threshold in 0.5f64..0.99, observed in 0.0f64..1.0) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(MemoryKv::new());
        let switch = build_switch(&dir, kv, i64::MAX, threshold, observed);

        runtime.block_on(async {
            let fired = switch.check_triggers().await;
            let has_condition = fired.iter().any(|t| t.contains("Memory critical"));
            assert_eq!(has_condition, observed > threshold,
                "observed {observed}, threshold {threshold}");
        });
    }

    #[test]
    fn reset_authenticates_exactly(
        correct in "[a-zA-Z0-9@#]{1,24}",
        wrong in "[a-zA-Z0-9@#]{1,24}",
    ) {
        prop_assume!(correct != wrong);

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let dir = TempDir::new().unwrap();
        let kv = Arc::new(MemoryKv::new());
        let switch = build_switch(&dir, Arc::clone(&kv), 3, 0.95, 0.0);

        runtime.block_on(async {
            kv.set(keys::DOOMSDAY_PASSWORD, &correct).await.unwrap();
            switch.trigger("property check").await;

            assert!(!switch.reset(&wrong).await, "wrong password must fail");
            assert!(switch.is_triggered(), "state unchanged after failed reset");

            assert!(switch.reset(&correct).await, "correct password must clear");
            assert!(!switch.is_triggered());
        });
    }
}
