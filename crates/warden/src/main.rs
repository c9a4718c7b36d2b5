// ABOUTME: warden CLI entry point.
// ABOUTME: Provides init, supervisor, and worker subcommands.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use warden::{run_init, run_supervisor, run_worker, SupervisorOptions, WorkerOptions};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Heartbeat supervisor for a pool of worker processes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a warden.toml interactively
    Init {
        /// Where to write the config (defaults to ~/.config/warden/warden.toml)
        #[arg(long, env = "WARDEN_CONFIG")]
        config: Option<PathBuf>,
    },
    /// Run the supervisor and its worker pool
    Supervisor {
        /// Path to configuration file
        #[arg(long, env = "WARDEN_CONFIG")]
        config: Option<PathBuf>,
        /// Number of workers, overriding the config file
        #[arg(long, env = "WARDEN_WORKERS")]
        workers: Option<usize>,
        /// Log to ~/.config/warden/supervisor/supervisor.log instead of stderr
        #[arg(long)]
        log_file: bool,
    },
    /// Run a single worker (internal, spawned by the supervisor)
    Worker {
        #[arg(long)]
        heartbeat_interval_ms: Option<u64>,
        /// Stop sending heartbeats after this many milliseconds
        #[arg(long)]
        stall_after_ms: Option<u64>,
        /// Exit with status 1 after this many milliseconds
        #[arg(long)]
        exit_after_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (ignore errors if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { config } => {
            warden_log::init();
            run_init(config.as_deref())
        }
        Commands::Supervisor {
            config,
            workers,
            log_file,
        } => {
            if log_file {
                warden_log::init_file("supervisor");
            } else {
                warden_log::init();
            }
            run_supervisor(SupervisorOptions {
                config_path: config,
                pool_size: workers,
            })
            .await
        }
        Commands::Worker {
            heartbeat_interval_ms,
            stall_after_ms,
            exit_after_ms,
        } => {
            warden_log::init_for("warden");
            run_worker(WorkerOptions {
                heartbeat_interval_ms,
                stall_after_ms,
                exit_after_ms,
            })
            .await
        }
    }
}
