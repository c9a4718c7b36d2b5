// ABOUTME: Shared types and control logic for the warden worker-pool supervisor.
// ABOUTME: Config, wire protocol, heartbeat registry, supervisor loop and worker monitor.

pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod supervisor;
pub mod testing;
pub mod worker;

pub use config::{Config, PoolConfig, SupervisorConfig, WorkerConfig};
pub use error::{ConfigError, WardenError};
pub use health::HealthCheck;
pub use manager::{Diagnostics, ExitReason, ProcessManager, WorkerEvent};
pub use protocol::{Directive, WorkerId, WorkerMessage};
pub use registry::{Registry, WorkerRecord};
pub use supervisor::{Supervisor, SupervisorHandle, TickReport};
pub use worker::{MonitorHandle, ParentChannel, WorkerMonitor};
