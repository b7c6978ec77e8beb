use std::path::PathBuf;

use anyhow::Context;
use basal_core::{DeliveryType, ReconcileConfig};
use basal_segments::{reconcile_str, split_str, subtotal};
use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "basal-cli",
    about = "Reconcile basal-rate segments from a JSON array of device records."
)]
struct Args {
    /// Path to the JSON records file.
    #[arg(short, long)]
    input: PathBuf,

    /// Which algorithm to run.
    #[arg(short, long, value_enum, default_value_t = Mode::Reconcile)]
    mode: Mode,

    /// Override priority order, lowest first (e.g. `temp,suspend`).
    #[arg(long, value_delimiter = ',')]
    priority: Option<Vec<String>>,

    /// Cap on overlap-resolution steps.
    #[arg(long)]
    max_steps: Option<usize>,

    /// Print the full result as JSON instead of a summary.
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Reconcile,
    Split,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    let data = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Could not read file {:?}", args.input))?;

    let mut config = ReconcileConfig::default();
    if let Some(priority) = args.priority {
        config.priority = priority.into_iter().map(DeliveryType::from).collect();
    }
    if let Some(steps) = args.max_steps {
        config.max_resolution_steps = steps;
    }

    match args.mode {
        Mode::Reconcile => {
            let result = reconcile_str(&data, &config).context("Reconciliation failed")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                return Ok(());
            }

            let delivered = match (result.actual.first(), result.actual.last()) {
                (Some(first), Some(last)) => match (first.start, last.end) {
                    (Some(start), Some(end)) => subtotal(&result.actual, start, end),
                    _ => 0.0,
                },
                _ => 0.0,
            };
            println!(
                "Actual segments: {}\nUndelivered streams: {}\nUnhandled delivery types: {}\nDevice conflicts: {}\nDelivered basal: {delivered} U",
                result.actual.len(),
                result.undelivered.len(),
                result.unhandled.len(),
                result.conflicts.len()
            );
        }
        Mode::Split => {
            let split = split_str(&data).context("Split failed")?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&split)?);
                return Ok(());
            }

            println!(
                "Actual segments: {}\nUndelivered segments: {}\nGaps: {}",
                split.actual_segments.len(),
                split.undelivered_segments.len(),
                split.non_continuous_segments.len()
            );
        }
    }

    Ok(())
}
