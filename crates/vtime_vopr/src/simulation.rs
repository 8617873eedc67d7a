//! Simulation scenarios and results.

use crate::synthetic::WorkloadConfig;
use serde::Serialize;
use std::fmt;

/// A test scenario to run in the simulation.
#[derive(Debug, Clone)]
pub enum Scenario {
    /// Three sleepers of 100, 50 and 50: release order B, C, A at 50, 50, 100.
    StaggeredSleepers,
    /// One task sleeping 10 then 5 observes 0, 10, 15.
    SequentialSleeps,
    /// Two zero-length sleeps release in submission order without moving the clock.
    SimultaneousZeroSleeps,
    /// Very long sleeps complete in real time independent of their length.
    LongSleeps {
        /// Number of sleeping tasks.
        count: usize,
    },
    /// A generated workload checked against every invariant.
    RandomWorkload {
        /// Workload shape.
        config: WorkloadConfig,
    },
    /// A task blocked forever with an empty timer queue must surface as no progress.
    NoProgress,
    /// An unmatched `block_end` must halt the coordinator.
    BookkeepingCorruption,
}

impl Scenario {
    /// Creates a long sleeps scenario.
    #[must_use]
    pub const fn long_sleeps(count: usize) -> Self {
        Self::LongSleeps { count }
    }

    /// Creates a random workload scenario.
    #[must_use]
    pub const fn random_workload(config: WorkloadConfig) -> Self {
        Self::RandomWorkload { config }
    }

    /// Returns the name of this scenario.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StaggeredSleepers => "staggered_sleepers",
            Self::SequentialSleeps => "sequential_sleeps",
            Self::SimultaneousZeroSleeps => "simultaneous_zero_sleeps",
            Self::LongSleeps { .. } => "long_sleeps",
            Self::RandomWorkload { .. } => "random_workload",
            Self::NoProgress => "no_progress",
            Self::BookkeepingCorruption => "bookkeeping_corruption",
        }
    }
}

/// Verdict of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct SimResult {
    /// Scenario name.
    pub name: &'static str,
    /// Whether the scenario held.
    pub passed: bool,
    /// One-line account of what happened.
    pub message: String,
    /// Supporting detail, one entry per line.
    pub diagnostics: Vec<String>,
}

impl SimResult {
    /// A passing verdict.
    #[must_use]
    pub fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self::new(name, true, message.into())
    }

    /// A failing verdict.
    #[must_use]
    pub fn fail(name: &'static str, message: impl Into<String>) -> Self {
        Self::new(name, false, message.into())
    }

    const fn new(name: &'static str, passed: bool, message: String) -> Self {
        Self {
            name,
            passed,
            message,
            diagnostics: Vec::new(),
        }
    }

    /// Appends detail lines.
    #[must_use]
    pub fn with_diagnostics(mut self, lines: impl IntoIterator<Item = String>) -> Self {
        self.diagnostics.extend(lines);
        self
    }
}

impl fmt::Display for SimResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed { "ok" } else { "FAILED" };
        write!(f, "{:<26} {verdict:<6} {}", self.name, self.message)?;
        self.diagnostics
            .iter()
            .try_for_each(|line| write!(f, "\n    {line}"))
    }
}

/// Verdicts of a whole scenario run.
#[derive(Debug, Serialize)]
pub struct SimSummary {
    /// Scenarios that failed.
    pub failed: usize,
    /// Every verdict, in run order.
    pub results: Vec<SimResult>,
}

impl SimSummary {
    /// Collects verdicts.
    #[must_use]
    pub fn from_results(results: Vec<SimResult>) -> Self {
        let failed = results.iter().filter(|r| !r.passed).count();
        Self { failed, results }
    }

    /// Returns true if no scenario failed.
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for SimSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for result in &self.results {
            writeln!(f, "{result}")?;
        }
        writeln!(
            f,
            "{}/{} scenarios held",
            self.results.len() - self.failed,
            self.results.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_every_verdict() {
        let summary = SimSummary::from_results(vec![
            SimResult::pass("staggered_sleepers", "woke at 50, 50, 100ms"),
            SimResult::fail("sequential_sleeps", "woke early").with_diagnostics([
                "task 0 step 1: woke at t+10ms but expected t+15ms".to_string(),
            ]),
        ]);

        assert!(!summary.all_passed());
        insta::assert_snapshot!(summary.to_string(), @r"
        staggered_sleepers         ok     woke at 50, 50, 100ms
        sequential_sleeps          FAILED woke early
            task 0 step 1: woke at t+10ms but expected t+15ms
        1/2 scenarios held
        ");
    }

    #[test]
    fn scenario_names_are_distinct() {
        let scenarios = [
            Scenario::StaggeredSleepers,
            Scenario::SequentialSleeps,
            Scenario::SimultaneousZeroSleeps,
            Scenario::long_sleeps(1),
            Scenario::random_workload(WorkloadConfig::default()),
            Scenario::NoProgress,
            Scenario::BookkeepingCorruption,
        ];
        let mut names: Vec<_> = scenarios.iter().map(Scenario::name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), scenarios.len());
    }
}
