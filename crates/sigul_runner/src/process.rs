//! Host process execution with wall-clock timeouts.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ProcessSpec;
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{ProcessOutput, ProcessRunner};

/// Runs processes on the host through `tokio::process`.
///
/// The child is spawned with `kill_on_drop`, so an expired timeout (or a
/// cancelled caller) terminates it instead of leaving it orphaned.
#[derive(Debug, Clone, Default)]
pub struct HostProcess;

impl HostProcess {
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &ProcessSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.envs(&spec.env);
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        if spec.stream_output {
            cmd.stdout(Stdio::inherit());
            cmd.stderr(Stdio::inherit());
        } else {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        }
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ProcessRunner for HostProcess {
    async fn run(&self, spec: &ProcessSpec) -> RunnerResult<ProcessOutput> {
        debug!("Executing: {}", spec.command_line());

        let started_at = Utc::now();
        let start = Instant::now();

        let child = Self::command(spec).spawn().map_err(|e| {
            RunnerError::ExecutionFailed(format!("Failed to spawn {}: {}", spec.program, e))
        })?;

        let output = if spec.timeout_seconds > 0 {
            match timeout(
                Duration::from_secs(spec.timeout_seconds),
                child.wait_with_output(),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        "{} exceeded {}s budget, killed",
                        spec.program, spec.timeout_seconds
                    );
                    return Err(RunnerError::Timeout(spec.timeout_seconds));
                }
            }
        } else {
            child.wait_with_output().await?
        };

        let finished_at = Utc::now();

        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            started_at,
            finished_at,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
