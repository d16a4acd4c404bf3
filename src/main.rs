use anyhow::{Context, Result};
use device_scheduler::{config, optimizer, telemetry};
use config::Config;
use optimizer::{DeviceScheduler, SchedulingProblem};
use std::path::PathBuf;
use telemetry::init_tracing;
use tracing::info;

const USAGE: &str = "usage: device-scheduler <problem.json> [config.toml]";

fn main() -> Result<()> {
    init_tracing();

    let mut args = std::env::args_os().skip(1);
    let problem_path = PathBuf::from(args.next().context(USAGE)?);
    let cfg = match args.next() {
        Some(path) => Config::from_path(PathBuf::from(path))?,
        None => Config::load()?,
    };

    let raw = std::fs::read_to_string(&problem_path)
        .with_context(|| format!("Failed to read {}", problem_path.display()))?;
    let problem: SchedulingProblem = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", problem_path.display()))?;

    info!(problem = %problem_path.display(), solver = %cfg.solver.name, "starting device scheduler");

    let result = DeviceScheduler::new(cfg)
        .schedule(&problem)
        .context("Scheduling failed")?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
