//! Compose CLI wrapper supporting the `docker compose` plugin and the
//! standalone `docker-compose` binary.

use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ComposeConfig, ProcessSpec};
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{ProcessOutput, ProcessRunner};

/// Compose verb that tears the stack down with its volumes.
pub const TEARDOWN_VERB: &[&str] = &["down", "-v", "--remove-orphans"];

/// How compose is invoked on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComposeFlavor {
    /// `docker compose` (v2 plugin)
    Plugin,
    /// `docker-compose` (standalone binary)
    Standalone,
}

impl ComposeFlavor {
    /// Program to execute.
    pub fn program(&self) -> &'static str {
        match self {
            Self::Plugin => "docker",
            Self::Standalone => "docker-compose",
        }
    }

    /// Arguments preceding the compose verb.
    pub fn base_args(&self) -> &'static [&'static str] {
        match self {
            Self::Plugin => &["compose"],
            Self::Standalone => &[],
        }
    }

    /// Detect the available flavour, preferring the plugin.
    pub fn detect() -> RunnerResult<Self> {
        for flavor in [Self::Plugin, Self::Standalone] {
            if flavor.is_available() {
                return Ok(flavor);
            }
            debug!("{} not available", flavor);
        }
        Err(RunnerError::RuntimeNotAvailable(
            "Neither `docker compose` nor `docker-compose` is available".to_string(),
        ))
    }

    fn is_available(&self) -> bool {
        Command::new(self.program())
            .args(self.base_args())
            .arg("version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl std::fmt::Display for ComposeFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plugin => write!(f, "docker compose"),
            Self::Standalone => write!(f, "docker-compose"),
        }
    }
}

/// Issues compose verbs for one stack identity (compose file + project).
pub struct ComposeCli {
    flavor: ComposeFlavor,
    config: ComposeConfig,
    process: Arc<dyn ProcessRunner>,
}

impl ComposeCli {
    pub fn new(flavor: ComposeFlavor, config: ComposeConfig, process: Arc<dyn ProcessRunner>) -> Self {
        info!("Using compose: {}", flavor);
        Self {
            flavor,
            config,
            process,
        }
    }

    pub fn config(&self) -> &ComposeConfig {
        &self.config
    }

    /// Arguments identifying the stack, followed by `verb`.
    fn compose_args(&self, verb: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = self
            .flavor
            .base_args()
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push("-f".to_string());
        args.push(self.config.compose_file.to_string_lossy().to_string());
        args.push("-p".to_string());
        args.push(self.config.project_name.clone());
        args.extend(verb.iter().map(|s| s.to_string()));
        args
    }

    /// Build the process spec for a compose verb.
    pub fn spec(&self, verb: &[&str], services: &[String]) -> ProcessSpec {
        ProcessSpec::new(self.flavor.program())
            .args(self.compose_args(verb))
            .args(services.iter().cloned())
            .envs(&self.config.env)
            .workdir(&self.config.project_dir)
    }

    /// Run a compose verb, failing on non-zero exit.
    pub async fn run(&self, verb: &[&str], services: &[String]) -> RunnerResult<ProcessOutput> {
        let spec = self.spec(verb, services);
        let output = self.process.run(&spec).await?;
        if !output.success() {
            return Err(RunnerError::ComposeFailed {
                command: spec.command_line(),
                message: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Synchronous teardown, used when no async context can be awaited.
    pub fn down_blocking(&self) -> RunnerResult<()> {
        let spec = self.spec(TEARDOWN_VERB, &[]);
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        let status = cmd.status()?;
        if !status.success() {
            warn!("Blocking teardown exited with {}", status);
            return Err(RunnerError::ComposeFailed {
                command: spec.command_line(),
                message: status.to_string(),
            });
        }
        Ok(())
    }

    /// Teardown command line shown to operators.
    pub fn teardown_command(&self) -> String {
        self.spec(TEARDOWN_VERB, &[]).command_line()
    }
}
