//! Scenarios command implementation.

use anyhow::Result;
use tracing::{error, info, warn};
use vtime_vopr::{SimConfig, SimSummary, Simulation};

/// Runs the scenarios command.
pub fn run(seed: u64, iterations: usize, multi_thread: Option<usize>, format: &str) -> Result<()> {
    let flavor = super::flavor(multi_thread);
    info!("Running scenarios on {:?} with seed {}", flavor, seed);

    let sim = Simulation::new(
        SimConfig::default()
            .with_seed(seed)
            .with_iterations(iterations)
            .with_flavor(flavor),
    );

    let scenarios = sim.standard_scenarios();
    let summary = SimSummary::from_results(sim.run_all(&scenarios));

    if !super::emit("scenarios", &summary, format)? {
        print!("{summary}");
    }

    if !sim.verify_determinism() {
        warn!("Release trace differed between runtime flavors for seed {}", seed);
        anyhow::bail!("Determinism check failed for seed {seed}");
    }

    if !summary.all_passed() {
        for result in summary.results.iter().filter(|r| !r.passed) {
            error!("{}", result);
        }
        anyhow::bail!(
            "{} of {} scenario(s) failed",
            summary.failed,
            summary.results.len()
        );
    }

    info!("All {} scenarios passed", summary.results.len());
    Ok(())
}
