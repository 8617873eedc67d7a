//! Demo command implementation.

use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tracing::info;
use vtime::{Coordinator, CoordinatorConfig};

/// Runs the demo command.
pub fn run(sleeps_ms: &[u64]) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    let started = Instant::now();
    let report = runtime.block_on(async {
        let (clock, coordinator) = Coordinator::start(CoordinatorConfig::default().with_release_log());

        let mut sleepers = Vec::with_capacity(sleeps_ms.len());
        for (id, &ms) in sleeps_ms.iter().enumerate() {
            let clock_in_task = clock.clone();
            sleepers.push(clock.spawn(async move {
                clock_in_task.sleep(Duration::from_millis(ms)).await?;
                let now = clock_in_task.now().await?;
                info!("sleeper {} ({}ms) woke at {}", id, ms, now);
                Ok::<_, vtime::Error>((id, now))
            })?);
        }

        let mut wakes = Vec::with_capacity(sleepers.len());
        for sleeper in sleepers {
            wakes.push(sleeper.join().await??);
        }
        for (id, at) in wakes {
            println!("sleeper {id} woke at {at}");
        }

        coordinator.shutdown().await
    })?;

    println!("{report}");
    println!("real time: {:?}", started.elapsed());
    Ok(())
}
