// ABOUTME: warden library: child-process pool, stdio channel, and the supervisor/worker entry points.
// ABOUTME: The binary in main.rs is a thin clap wrapper over run_supervisor, run_worker and run_init.

pub mod channel;
pub mod diagnostics;
pub mod init;
pub mod pool;
pub mod work;

pub use channel::{
    spawn_directive_reader, stdin_directives, LineChannel, StdioChannel, CHANNEL_ENV,
};
pub use diagnostics::PsDiagnostics;
pub use init::run_init;
pub use pool::{ChildPool, WorkerCommand};
pub use work::WorkLoop;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use warden_core::{Config, HealthCheck, ParentChannel, Supervisor, WorkerConfig, WorkerMonitor};

const TERMINATE_GRACE: Duration = Duration::from_secs(5);
const HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(5);

/// Options for running the supervisor
pub struct SupervisorOptions {
    /// Path to configuration file
    pub config_path: Option<PathBuf>,
    /// Override the configured number of workers
    pub pool_size: Option<usize>,
}

/// Options for running a worker (internal, spawned by the supervisor)
#[derive(Default)]
pub struct WorkerOptions {
    pub heartbeat_interval_ms: Option<u64>,
    /// Stop heartbeating after this long while staying alive
    pub stall_after_ms: Option<u64>,
    /// Exit with status 1 after this long
    pub exit_after_ms: Option<u64>,
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(Config::default_path);
    if path.exists() {
        let config = Config::load(&path)?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config)
    } else {
        tracing::warn!(path = %path.display(), "no config file, using defaults");
        Ok(Config::default())
    }
}

/// Run the supervisor until interrupted, or until every worker is gone when respawn is off.
pub async fn run_supervisor(options: SupervisorOptions) -> Result<()> {
    let mut config = load_config(options.config_path)?;
    if let Some(size) = options.pool_size {
        config.pool.size = size;
    }
    config.validate()?;

    let command = WorkerCommand::current_exe(&config.worker)?;
    let pool = ChildPool::new(command, config.pool.respawn);
    let spawned = pool.spawn_workers(config.pool.size)?;
    tracing::info!(count = spawned.len(), "spawned worker pool");

    let mut supervisor = Supervisor::new(config.supervisor.clone(), pool.clone())?;
    if config.supervisor.diagnostics {
        supervisor = supervisor.with_diagnostics(Arc::new(PsDiagnostics::default()));
    }
    let handle = supervisor.start();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
            tracing::info!("interrupted, shutting down");
        }
        _ = pool.wait_until_empty(), if !config.pool.respawn => {
            tracing::info!("all workers have exited");
        }
    }

    let supervisor = handle.stop().await.context("Supervisor task failed")?;
    let registry = supervisor.registry();
    tracing::info!(
        registered = registry.registered_count(),
        live = registry.live_count(),
        "supervisor stopped"
    );

    pool.terminate(TERMINATE_GRACE).await;
    Ok(())
}

/// Run one worker: heartbeat to the parent, process work, and drain on shutdown.
pub async fn run_worker(options: WorkerOptions) -> Result<()> {
    let mut config = WorkerConfig::default();
    if let Some(ms) = options.heartbeat_interval_ms {
        config.heartbeat_interval_ms = ms;
    }

    let channel = Arc::new(StdioChannel::from_env());
    if !channel.is_available() {
        tracing::warn!("not launched by a supervisor, heartbeats disabled");
    }

    let health = HealthCheck::new();
    let health_task = health.spawn(HEALTH_CHECK_PERIOD);
    let shutdown = CancellationToken::new();

    let directives = stdin_directives();
    let monitor = WorkerMonitor::new(channel.clone(), config, health.clone(), shutdown.clone())?
        .start(directives);

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, draining");
                shutdown.cancel();
            }
        });
    }

    if let Some(ms) = options.stall_after_ms {
        let channel = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            tracing::warn!("stalling: heartbeats stop, process stays up");
            channel.close();
        });
    }

    if let Some(ms) = options.exit_after_ms {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            tracing::error!("exiting abruptly");
            std::process::exit(1);
        });
    }

    let completed = WorkLoop::default().run(shutdown).await;

    monitor.stop().await;
    health.stop();
    let _ = health_task.await;
    tracing::info!(completed, "worker exiting");
    Ok(())
}
