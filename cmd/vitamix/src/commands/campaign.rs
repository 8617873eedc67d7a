//! Campaign command implementation.

use anyhow::Result;
use std::time::Duration;
use tracing::{error, info};
use vtime::CoordinatorConfig;
use vtime_vopr::{run_long_haul_campaign, run_workload_campaign, CampaignResult, WorkloadConfig};

/// Parsed arguments of the campaign command.
pub struct CampaignArgs {
    pub seed: u64,
    pub iterations: usize,
    pub tasks: usize,
    pub depth: usize,
    pub sleeps: usize,
    pub max_sleep_ms: u32,
    pub stall_timeout_ms: Option<u64>,
    pub long_haul: bool,
    pub multi_thread: Option<usize>,
    pub format: String,
}

/// Runs the campaign command.
pub fn run(args: &CampaignArgs) -> Result<()> {
    let flavor = super::flavor(args.multi_thread);
    if args.long_haul {
        info!(
            "Long-haul campaign: {} workloads from seed {} on {:?}",
            args.iterations, args.seed, flavor
        );
        return report(&run_long_haul_campaign(args.seed, args.iterations, flavor), &args.format);
    }

    let workload = WorkloadConfig::default()
        .with_root_tasks(args.tasks)
        .with_max_depth(args.depth)
        .with_max_sleeps(args.sleeps)
        .with_max_ticks(args.max_sleep_ms);

    let mut coordinator = CoordinatorConfig::default();
    if let Some(ms) = args.stall_timeout_ms {
        coordinator = coordinator.with_stall_timeout(Duration::from_millis(ms));
    }

    info!(
        "Campaign: {} workloads from seed {} on {:?}",
        args.iterations, args.seed, flavor
    );
    let result = run_workload_campaign(args.seed, args.iterations, &workload, flavor, &coordinator);
    report(&result, &args.format)
}

fn report(result: &CampaignResult, format: &str) -> Result<()> {
    if !super::emit("campaign", result, format)? {
        println!(
            "{}: {} iterations, {} sleeps, {}s simulated in {}ms ({:.0}x)",
            result.name,
            result.iterations,
            result.sleeps,
            result.simulated_seconds,
            result.real_elapsed_ms,
            result.compression()
        );
        for failure in &result.failure_details {
            println!("  - {failure}");
        }
    }

    if !result.all_passed {
        error!("{} failure(s) detected", result.failures);
        anyhow::bail!("Campaign failed with {} failure(s)", result.failures);
    }

    Ok(())
}
