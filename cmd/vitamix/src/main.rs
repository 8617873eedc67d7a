//! Vitamix CLI - deterministic virtual time for concurrent programs.
//!
//! Commands:
//! - `vitamix scenarios` - Run the built-in scenario suite
//! - `vitamix campaign` - Run a seeded campaign of generated workloads
//! - `vitamix demo` - Run a handful of sleepers and show when each wakes

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "vitamix")]
#[command(about = "Deterministic virtual clock for concurrent programs under test")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the built-in scenario suite
    Scenarios {
        /// Seed for generated workloads
        #[arg(short, long, env = "VITAMIX_SEED", default_value_t = 42)]
        seed: u64,

        /// Generated workloads per random scenario
        #[arg(short, long, default_value_t = 10)]
        iterations: usize,

        /// Run on a work-stealing pool with this many workers
        #[arg(long)]
        multi_thread: Option<usize>,

        /// Output format (text, json or yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a seeded campaign of generated workloads
    Campaign {
        /// First seed; iteration i uses seed + i
        #[arg(short, long, env = "VITAMIX_SEED", default_value_t = 42)]
        seed: u64,

        /// Number of workloads to run
        #[arg(short, long, default_value_t = 100)]
        iterations: usize,

        /// Tasks spawned by the initial task
        #[arg(long, default_value_t = 8)]
        tasks: usize,

        /// Maximum spawn depth
        #[arg(long, default_value_t = 2)]
        depth: usize,

        /// Maximum sleeps per task
        #[arg(long, default_value_t = 4)]
        sleeps: usize,

        /// Longest sleep in milliseconds
        #[arg(long, default_value_t = 20)]
        max_sleep_ms: u32,

        /// Fail a run that stalls for this long in real time
        #[arg(long, env = "VITAMIX_STALL_TIMEOUT_MS")]
        stall_timeout_ms: Option<u64>,

        /// Run day-granular sleeps spanning up to a year instead; ignores the workload shape flags
        #[arg(long)]
        long_haul: bool,

        /// Run on a work-stealing pool with this many workers
        #[arg(long)]
        multi_thread: Option<usize>,

        /// Output format (text, json or yaml)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run sleepers of the given lengths and report their wake times
    Demo {
        /// Sleep lengths in milliseconds, one task each
        #[arg(value_delimiter = ',', default_values_t = [100, 50, 50])]
        sleeps_ms: Vec<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Scenarios {
            seed,
            iterations,
            multi_thread,
            format,
        } => commands::scenarios::run(seed, iterations, multi_thread, &format),
        Commands::Campaign {
            seed,
            iterations,
            tasks,
            depth,
            sleeps,
            max_sleep_ms,
            stall_timeout_ms,
            long_haul,
            multi_thread,
            format,
        } => commands::campaign::run(&commands::campaign::CampaignArgs {
            seed,
            iterations,
            tasks,
            depth,
            sleeps,
            max_sleep_ms,
            stall_timeout_ms,
            long_haul,
            multi_thread,
            format,
        }),
        Commands::Demo { sleeps_ms } => commands::demo::run(&sleeps_ms),
    }
}
