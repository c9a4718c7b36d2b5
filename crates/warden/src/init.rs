// ABOUTME: Interactive setup for warden.toml.
// ABOUTME: Prompts for pool and liveness settings, validates them, and writes the config file.

use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::str::FromStr;
use warden_core::Config;

fn prompt<T, R, W>(input: &mut R, output: &mut W, message: &str, default: T) -> Result<T>
where
    T: FromStr + ToString,
    T::Err: std::error::Error + Send + Sync + 'static,
    R: BufRead,
    W: Write,
{
    write!(output, "{} [{}]: ", message, default.to_string())?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;

    let line = line.trim();
    if line.is_empty() {
        Ok(default)
    } else {
        line.parse()
            .with_context(|| format!("Invalid value for {}: {}", message, line))
    }
}

/// Ask for every setting, falling back to the defaults on empty input.
pub fn prompt_config<R: BufRead, W: Write>(input: &mut R, output: &mut W) -> Result<Config> {
    let defaults = Config::default();
    let mut config = Config::default();

    config.pool.size = prompt(input, output, "Worker processes", defaults.pool.size)?;
    config.pool.respawn = prompt(input, output, "Respawn exited workers", defaults.pool.respawn)?;
    config.supervisor.number_of_workers_threshold = prompt(
        input,
        output,
        "Minimum live workers",
        defaults.supervisor.number_of_workers_threshold,
    )?;
    config.supervisor.poll_interval_ms = prompt(
        input,
        output,
        "Supervisor poll interval (ms)",
        defaults.supervisor.poll_interval_ms,
    )?;
    config.supervisor.worker_startup_time_ms = prompt(
        input,
        output,
        "Worker startup grace period (ms)",
        defaults.supervisor.worker_startup_time_ms,
    )?;
    config.supervisor.worker_unresponsive_threshold_ms = prompt(
        input,
        output,
        "Unresponsive after (ms)",
        defaults.supervisor.worker_unresponsive_threshold_ms,
    )?;
    config.worker.heartbeat_interval_ms = prompt(
        input,
        output,
        "Heartbeat interval (ms)",
        defaults.worker.heartbeat_interval_ms,
    )?;

    config.validate()?;
    Ok(config)
}

/// Prompt on the terminal and write the result to `path`
pub fn run_init(path: Option<&Path>) -> Result<()> {
    println!("warden initialization\n");

    let stdin = io::stdin();
    let config = prompt_config(&mut stdin.lock(), &mut io::stdout())?;

    let config_path = path.map(Path::to_path_buf).unwrap_or_else(Config::default_path);
    config.save(&config_path)?;
    println!("\nConfig written to {}", config_path.display());
    println!("\nReady to run: warden supervisor");

    Ok(())
}
