//! Synthetic workload generation.
//!
//! A workload is a forest of tasks. Each task spawns its children first and
//! then performs a sequence of sleeps. Sleep lengths are whole multiples of a
//! tick so that equal wake times (and FIFO tie-breaking) come up often.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for synthetic workload generation.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Tasks spawned directly by the initial task.
    pub root_tasks: usize,
    /// Maximum nesting depth of spawned tasks.
    pub max_depth: usize,
    /// Maximum children spawned by one task.
    pub max_children: usize,
    /// Maximum sleeps performed by one task.
    pub max_sleeps: usize,
    /// Granularity of sleep durations.
    pub tick: Duration,
    /// Longest sleep, in ticks.
    pub max_ticks: u32,
    /// Probability of a zero-length sleep (0.0 - 1.0).
    pub zero_sleep_rate: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            root_tasks: 8,
            max_depth: 2,
            max_children: 3,
            max_sleeps: 4,
            tick: Duration::from_millis(1),
            max_ticks: 20,
            zero_sleep_rate: 0.05,
        }
    }
}

impl WorkloadConfig {
    /// Creates a new config with the given seed.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the number of root tasks.
    #[must_use]
    pub const fn with_root_tasks(mut self, tasks: usize) -> Self {
        self.root_tasks = tasks;
        self
    }

    /// Sets the maximum spawn depth.
    #[must_use]
    pub const fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Sets the maximum sleeps per task.
    #[must_use]
    pub const fn with_max_sleeps(mut self, sleeps: usize) -> Self {
        self.max_sleeps = sleeps;
        self
    }

    /// Sets the longest sleep in ticks.
    #[must_use]
    pub const fn with_max_ticks(mut self, ticks: u32) -> Self {
        self.max_ticks = ticks;
        self
    }

    /// Few distinct wake times, so most releases are ties.
    #[must_use]
    pub fn dense_ties() -> Self {
        Self {
            root_tasks: 16,
            max_ticks: 2,
            zero_sleep_rate: 0.25,
            ..Self::default()
        }
    }

    /// Very long sleeps, to show that real time does not depend on them.
    #[must_use]
    pub fn long_haul() -> Self {
        Self {
            tick: Duration::from_secs(24 * 3600),
            max_ticks: 365,
            zero_sleep_rate: 0.0,
            ..Self::default()
        }
    }
}

/// One task: the sleeps it performs and the tasks it spawns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPlan {
    /// Sleeps, in order.
    pub sleeps: Vec<Duration>,
    /// Tasks spawned before the first sleep.
    pub children: Vec<TaskPlan>,
}

impl TaskPlan {
    /// Creates a leaf task with the given sleeps.
    #[must_use]
    pub const fn sleeping(sleeps: Vec<Duration>) -> Self {
        Self {
            sleeps,
            children: Vec::new(),
        }
    }

    /// Number of tasks in this subtree, including this one.
    #[must_use]
    pub fn task_count(&self) -> usize {
        1 + self.children.iter().map(Self::task_count).sum::<usize>()
    }

    /// Number of sleeps in this subtree.
    #[must_use]
    pub fn sleep_count(&self) -> usize {
        self.sleeps.len() + self.children.iter().map(Self::sleep_count).sum::<usize>()
    }

    /// Latest wake time in this subtree for a task started at `start`.
    #[must_use]
    pub fn horizon(&self, start: Duration) -> Duration {
        let own = start + self.sleeps.iter().sum::<Duration>();
        self.children
            .iter()
            .map(|child| child.horizon(start))
            .fold(own, Duration::max)
    }
}

/// A complete workload for one simulation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Tasks spawned by the initial task.
    pub roots: Vec<TaskPlan>,
}

impl Workload {
    /// Creates a workload from root tasks.
    #[must_use]
    pub const fn new(roots: Vec<TaskPlan>) -> Self {
        Self { roots }
    }

    /// Number of spawned tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.roots.iter().map(TaskPlan::task_count).sum()
    }

    /// Number of sleeps across all tasks.
    #[must_use]
    pub fn sleep_count(&self) -> usize {
        self.roots.iter().map(TaskPlan::sleep_count).sum()
    }

    /// Virtual time at which the last sleeper wakes.
    #[must_use]
    pub fn horizon(&self) -> Duration {
        self.roots
            .iter()
            .map(|root| root.horizon(Duration::ZERO))
            .max()
            .unwrap_or_default()
    }
}

/// Synthetic workload generator.
pub struct SyntheticWorkload {
    config: WorkloadConfig,
    rng: ChaCha8Rng,
}

impl SyntheticWorkload {
    /// Creates a new generator.
    #[must_use]
    pub fn new(config: WorkloadConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    /// Generates a workload with the configured parameters.
    #[must_use]
    pub fn generate(&mut self) -> Workload {
        let roots = (0..self.config.root_tasks)
            .map(|_| self.generate_task(0))
            .collect();
        Workload::new(roots)
    }

    fn generate_task(&mut self, depth: usize) -> TaskPlan {
        let sleep_count = self.rng.gen_range(0..=self.config.max_sleeps);
        let sleeps = (0..sleep_count).map(|_| self.generate_sleep()).collect();

        let children = if depth < self.config.max_depth {
            let count = self.rng.gen_range(0..=self.config.max_children);
            (0..count).map(|_| self.generate_task(depth + 1)).collect()
        } else {
            Vec::new()
        };

        TaskPlan { sleeps, children }
    }

    fn generate_sleep(&mut self) -> Duration {
        if self.config.max_ticks == 0 || self.rng.gen_bool(self.config.zero_sleep_rate) {
            return Duration::ZERO;
        }
        self.config.tick * self.rng.gen_range(1..=self.config.max_ticks)
    }
}
