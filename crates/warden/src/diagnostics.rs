// ABOUTME: Process-table sampler used by the supervisor's optional diagnostics.
// ABOUTME: Runs a shell command (default `ps aux`) and returns its output lines.

use async_trait::async_trait;
use tokio::process::Command;
use warden_core::{Diagnostics, WardenError};

/// Samples the OS process table by running a command
#[derive(Debug, Clone)]
pub struct PsDiagnostics {
    program: String,
    args: Vec<String>,
}

impl Default for PsDiagnostics {
    fn default() -> Self {
        Self::new("ps", ["aux"])
    }
}

impl PsDiagnostics {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Diagnostics for PsDiagnostics {
    async fn sample(&self) -> Result<Vec<String>, WardenError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| WardenError::Diagnostics(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(WardenError::Diagnostics(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }
}
