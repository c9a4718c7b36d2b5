// ABOUTME: Shared logging setup for the warden supervisor and its workers
// ABOUTME: init() for stderr, init_file() for detached runs, init_for() for workers, SampledLog

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::EnvFilter;

fn env_filter(floor: Level) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(floor.into())
}

/// INFO-and-above to stderr, RUST_LOG wins when set.
/// `warden supervisor` and `warden init` start with this.
pub fn init() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter(Level::INFO))
        .init();
}

/// WARN-and-above appended to ~/.config/warden/{app_name}/{app_name}.log.
/// `warden supervisor --log-file` uses this when nobody is watching stderr.
/// A directory or file error is reported on stderr and logging stays off.
pub fn init_file(app_name: &str) {
    if let Err(e) = init_file_inner(app_name) {
        eprintln!("Warning: failed to set up file logging: {e}");
    }
}

fn init_file_inner(app_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = dirs::config_dir().ok_or("could not determine config directory")?;
    let log_dir = config_dir.join("warden").join(app_name);
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{app_name}.log")))?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(env_filter(Level::WARN))
        .with_ansi(false)
        .init();

    Ok(())
}

/// `warden worker` logging: INFO for `crate_name`, WARN elsewhere, always on stderr.
/// Stdout carries heartbeats, and the supervisor echoes this stderr with a `[pid]` prefix.
pub fn init_for(crate_name: &str) {
    let directive = format!("{crate_name}=info");
    let filter = env_filter(Level::WARN).add_directive(
        directive
            .parse()
            .unwrap_or_else(|_| Level::INFO.into()),
    );

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

/// Per-key counter that lets one in every `every` calls through.
///
/// Hot paths such as per-worker heartbeats ask `should_log` before logging.
#[derive(Debug)]
pub struct SampledLog {
    every: u64,
    counters: Mutex<HashMap<String, u64>>,
}

impl SampledLog {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// True on the first call for `key` and then on every `every`th call.
    pub fn should_log(&self, key: &str) -> bool {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = counters.entry(key.to_string()).or_insert(0);
        let hit = *count % self.every == 0;
        *count += 1;
        hit
    }

    /// Forget a key, e.g. when the worker it tracked has gone away.
    pub fn forget(&self, key: &str) {
        if let Ok(mut counters) = self.counters.lock() {
            counters.remove(key);
        }
    }
}

/// Log at info level through a [`SampledLog`].
#[macro_export]
macro_rules! info_sampled {
    ($sampler:expr, $key:expr, $($arg:tt)+) => {
        if $sampler.should_log($key) {
            ::tracing::info!($($arg)+);
        }
    };
}
