//! Subcommand implementations.

pub mod campaign;
pub mod demo;
pub mod scenarios;

use anyhow::{bail, Result};
use serde::Serialize;
use vtime_vopr::RuntimeFlavor;

/// Maps the `--multi-thread` flag to a runtime flavor.
pub fn flavor(multi_thread: Option<usize>) -> RuntimeFlavor {
    multi_thread.map_or(RuntimeFlavor::CurrentThread, |workers| {
        RuntimeFlavor::MultiThread { workers }
    })
}

/// Output envelope for machine-readable formats.
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    generated_at: chrono::DateTime<chrono::Utc>,
    command: &'a str,
    result: &'a T,
}

/// Prints `value` as json or yaml. Returns false for the text format.
pub fn emit<T: Serialize>(command: &str, value: &T, format: &str) -> Result<bool> {
    let envelope = Envelope {
        generated_at: chrono::Utc::now(),
        command,
        result: value,
    };
    match format {
        "text" => return Ok(false),
        "json" => println!("{}", serde_json::to_string_pretty(&envelope)?),
        "yaml" => print!("{}", serde_yaml::to_string(&envelope)?),
        other => bail!("Unknown output format: {other}"),
    }
    Ok(true)
}
