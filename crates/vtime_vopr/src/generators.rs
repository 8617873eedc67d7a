//! Property-based generators for workloads.
//!
//! Uses proptest strategies to generate:
//! - Sleep durations biased toward ties and zero-length sleeps
//! - Task trees of bounded depth
//! - Whole workloads

use crate::synthetic::{TaskPlan, Workload};
use proptest::prelude::*;
use std::time::Duration;

/// Strategy for generating sleep durations.
pub fn sleep_duration() -> impl Strategy<Value = Duration> {
    prop_oneof![
        1 => Just(Duration::ZERO),                        // Yield (10%)
        6 => (1..=10u64).prop_map(Duration::from_millis), // Short, many ties (60%)
        2 => (10..=1000u64).prop_map(Duration::from_millis),
        1 => (1..=3650u64).prop_map(|days| Duration::from_secs(days * 24 * 3600)),
    ]
}

/// Strategy for generating a leaf task.
pub fn leaf_task() -> impl Strategy<Value = TaskPlan> {
    prop::collection::vec(sleep_duration(), 0..4).prop_map(TaskPlan::sleeping)
}

/// Strategy for generating task trees up to `depth` levels of spawning.
pub fn task_plan(depth: u32) -> impl Strategy<Value = TaskPlan> {
    leaf_task().prop_recursive(depth, 24, 3, |inner| {
        (
            prop::collection::vec(sleep_duration(), 0..4),
            prop::collection::vec(inner, 0..3),
        )
            .prop_map(|(sleeps, children)| TaskPlan { sleeps, children })
    })
}

/// Strategy for generating workloads.
pub fn workload() -> impl Strategy<Value = Workload> {
    prop::collection::vec(task_plan(2), 0..6).prop_map(Workload::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{run_workload, RuntimeFlavor};
    use vtime::CoordinatorConfig;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn generated_workloads_hold_every_invariant(workload in workload()) {
            let outcome = match run_workload(&workload, RuntimeFlavor::CurrentThread, CoordinatorConfig::default()) {
                Ok(outcome) => outcome,
                Err(e) => return Err(TestCaseError::fail(format!("run failed: {e}"))),
            };
            let violations = outcome.check_invariants(&workload, 1);
            prop_assert!(violations.is_empty(), "{:?}", violations);
        }

        #[test]
        fn release_trace_ignores_scheduler_flavor(workload in workload()) {
            let single = run_workload(&workload, RuntimeFlavor::CurrentThread, CoordinatorConfig::default()).unwrap();
            let multi = run_workload(&workload, RuntimeFlavor::MultiThread { workers: 3 }, CoordinatorConfig::default()).unwrap();
            prop_assert_eq!(single.fingerprint(), multi.fingerprint());
            prop_assert_eq!(single.report.now, multi.report.now);
        }

        #[test]
        fn generated_trees_are_bounded(plan in task_plan(2)) {
            prop_assert!(plan.sleeps.len() < 4);
            prop_assert!(plan.task_count() >= 1);
        }
    }
}
