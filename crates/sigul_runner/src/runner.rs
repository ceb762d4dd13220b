//! Stack control plane and process runner traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ProcessSpec;
use crate::error::RunnerResult;

/// Health of a single tracked service, as reported by its health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceHealth {
    Unknown,
    Starting,
    Healthy,
    Unhealthy,
}

impl ServiceHealth {
    /// Parse a Docker health status string.
    pub fn from_status(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "healthy" => Self::Healthy,
            "unhealthy" => Self::Unhealthy,
            "starting" => Self::Starting,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        };
        write!(f, "{}", s)
    }
}

/// Result of a host process execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// Exit code (-1 if terminated by a signal)
    pub exit_code: i32,
    /// Captured stdout (empty when streamed)
    pub stdout: String,
    /// Captured stderr (empty when streamed)
    pub stderr: String,
    /// Execution start time
    pub started_at: DateTime<Utc>,
    /// Execution end time
    pub finished_at: DateTime<Utc>,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl ProcessOutput {
    /// Check if execution was successful (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stdout.is_empty() {
            self.stderr.clone()
        } else if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Control plane for the multi-service stack, keyed by compose service name.
#[async_trait]
pub trait StackControlPlane: Send + Sync {
    /// Build images for the given services.
    async fn build(&self, services: &[String], no_cache: bool) -> RunnerResult<()>;

    /// Start the given services detached.
    async fn up(&self, services: &[String]) -> RunnerResult<()>;

    /// Stop the stack, optionally discarding its volumes.
    async fn down(&self, remove_volumes: bool) -> RunnerResult<()>;

    /// Synchronous teardown for paths that cannot await (drop during unwinding).
    fn down_blocking(&self) -> RunnerResult<()>;

    /// Current health-check status of a service.
    async fn health(&self, service: &str) -> RunnerResult<ServiceHealth>;

    /// Logs of a service, limited to the last `tail` lines when given.
    async fn logs(&self, service: &str, tail: Option<usize>) -> RunnerResult<String>;

    /// Structural inspection dump (JSON) of the service's container.
    async fn inspect(&self, service: &str) -> RunnerResult<String>;

    /// Container runtime version metadata.
    async fn runtime_version(&self) -> RunnerResult<String>;

    /// Container runtime environment metadata.
    async fn runtime_info(&self) -> RunnerResult<String>;

    /// The shell command an operator runs to tear the stack down by hand.
    fn teardown_command(&self) -> String;
}

/// Runner for host processes (package manager, test tool).
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run a process to completion, honoring the spec's timeout.
    async fn run(&self, spec: &ProcessSpec) -> RunnerResult<ProcessOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_from_docker_status() {
        assert_eq!(ServiceHealth::from_status("healthy"), ServiceHealth::Healthy);
        assert_eq!(ServiceHealth::from_status("unhealthy"), ServiceHealth::Unhealthy);
        assert_eq!(ServiceHealth::from_status("starting"), ServiceHealth::Starting);
        assert_eq!(ServiceHealth::from_status("none"), ServiceHealth::Unknown);
        assert_eq!(ServiceHealth::from_status(""), ServiceHealth::Unknown);
        assert_eq!(ServiceHealth::from_status(" Healthy\n"), ServiceHealth::Healthy);
    }

    #[test]
    fn test_combined_output() {
        let now = Utc::now();
        let output = ProcessOutput {
            exit_code: 1,
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        };
        assert!(!output.success());
        assert_eq!(output.combined_output(), "out\nerr");
    }
}
