//! The orchestrated run.
//!
//! Stages run strictly in sequence:
//! preflight → provision → build → start → health → tests → artifacts.
//! The whole sequence runs inside a [`CleanupGuard`] scope and is raced
//! against an external shutdown future.

use std::cell::Cell;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use sigul_runner::{ProcessRunner, StackControlPlane, TrackedService};

use crate::artifacts::{write_unique, Artifact, ArtifactCollector};
use crate::cleanup::CleanupGuard;
use crate::config::{Category, Mode, Paths, RunConfiguration};
use crate::engine::{AttemptRecord, RetryPolicy, TestEngine, TestRunResult};
use crate::environment::EnvSnapshot;
use crate::error::{CoreError, CoreResult};
use crate::provision::{Capabilities, Provisioner};
use crate::stack::{PollPolicy, StackController};

/// Furthest stage a run reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Preflight,
    Provisioning,
    Build,
    Startup,
    HealthCheck,
    Tests,
    Complete,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preflight => "preflight",
            Self::Provisioning => "provisioning",
            Self::Build => "build",
            Self::Startup => "startup",
            Self::HealthCheck => "health check",
            Self::Tests => "tests",
            Self::Complete => "complete",
        };
        write!(f, "{}", s)
    }
}

/// Machine-readable record of a run, written as `run_summary_<ts>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub mode: Mode,
    pub category: Category,
    pub stage: RunStage,
    pub configuration: RunConfiguration,
    pub capabilities: Option<Capabilities>,
    pub attempts: Vec<AttemptRecord>,
    pub exit_code: i32,
    pub error: Option<String>,
    pub artifacts: Vec<PathBuf>,
}

/// Outcome of [`Orchestrator::run_until`].
#[derive(Debug)]
pub struct RunReport {
    pub outcome: CoreResult<TestRunResult>,
    pub stage: RunStage,
    pub artifacts: Vec<Artifact>,
    /// Manual teardown command when cleanup was disabled
    pub teardown_hint: Option<String>,
    pub summary_path: Option<PathBuf>,
}

impl RunReport {
    /// Process exit code for the run.
    pub fn exit_code(&self) -> i32 {
        match &self.outcome {
            Ok(result) => result.exit_code,
            Err(e) => e.exit_code(),
        }
    }
}

/// Drives one orchestrated integration-test run.
pub struct Orchestrator {
    config: RunConfiguration,
    paths: Paths,
    env: EnvSnapshot,
    plane: Arc<dyn StackControlPlane>,
    process: Arc<dyn ProcessRunner>,
    services: Vec<String>,
    poll: PollPolicy,
    retry: RetryPolicy,
    run_id: Uuid,
    started_at: DateTime<Utc>,
}

impl Orchestrator {
    pub fn new(
        config: RunConfiguration,
        paths: Paths,
        env: EnvSnapshot,
        plane: Arc<dyn StackControlPlane>,
        process: Arc<dyn ProcessRunner>,
    ) -> Self {
        // Child processes run in the project root; report paths stay absolute.
        let config = match std::env::current_dir() {
            Ok(cwd) => config.anchored_at(&cwd),
            Err(_) => config,
        };
        Self {
            config,
            paths,
            env,
            plane,
            process,
            services: [TrackedService::bridge(), TrackedService::server()]
                .into_iter()
                .map(|s| s.service)
                .collect(),
            poll: PollPolicy::default(),
            retry: RetryPolicy::default(),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
        }
    }

    pub fn with_services(mut self, services: Vec<String>) -> Self {
        self.services = services;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Timestamp shared by every file this run writes.
    pub fn run_stamp(&self) -> String {
        self.started_at.format("%Y%m%d_%H%M%S").to_string()
    }

    /// Run to completion, or until `shutdown` resolves.
    ///
    /// The stack is torn down exactly once on every path unless cleanup is
    /// disabled, in which case the report carries the manual teardown command.
    pub async fn run_until<F>(&self, shutdown: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        info!(
            "Run {} starting (mode={}, category={})",
            self.run_id, self.config.mode, self.config.category
        );

        let guard = CleanupGuard::new(self.plane.clone(), self.config.cleanup_after);
        let stage = Cell::new(RunStage::Preflight);
        let capabilities = Cell::new(None);

        let outcome = tokio::select! {
            biased;
            _ = shutdown => {
                warn!("Interrupted during {}", stage.get());
                Err(CoreError::Interrupted)
            }
            result = self.pipeline(&stage, &capabilities) => result,
        };

        let interrupted = matches!(outcome, Err(CoreError::Interrupted));
        let artifacts = if stage.get() >= RunStage::Startup && !interrupted {
            let collector = ArtifactCollector::new(self.plane.as_ref(), &self.services, &self.config.output_dir);
            collector.collect(outcome.as_ref().ok()).await
        } else {
            Vec::new()
        };

        if let Err(e) = &outcome {
            error!("Run failed during {}: {}", stage.get(), e);
        }

        let summary_path = self.write_summary(&outcome, stage.get(), capabilities.get(), &artifacts);
        let teardown_hint = guard.release().await;

        RunReport {
            outcome,
            stage: stage.get(),
            artifacts,
            teardown_hint,
            summary_path,
        }
    }

    async fn pipeline(
        &self,
        stage: &Cell<RunStage>,
        capabilities: &Cell<Option<Capabilities>>,
    ) -> CoreResult<TestRunResult> {
        self.paths.validate()?;
        std::fs::create_dir_all(&self.config.output_dir).map_err(|e| {
            CoreError::Configuration(format!(
                "cannot create output directory {}: {}",
                self.config.output_dir.display(),
                e
            ))
        })?;

        stage.set(RunStage::Provisioning);
        let provisioner = Provisioner::new(
            &self.config,
            &self.paths,
            &self.env,
            self.process.clone(),
            self.plane.clone(),
        );
        let caps = provisioner.provision().await?;
        capabilities.set(Some(caps));

        let mut controller = StackController::new(self.plane.clone(), self.services.clone(), self.poll);
        if self.config.build_containers {
            stage.set(RunStage::Build);
            controller.build(self.config.no_cache).await?;
        }

        stage.set(RunStage::Startup);
        controller.start().await?;

        stage.set(RunStage::HealthCheck);
        controller.await_healthy().await?;

        stage.set(RunStage::Tests);
        let engine = TestEngine::new(&self.config, &self.paths, caps, self.process.clone(), self.run_stamp())
            .with_retry_policy(self.retry);
        let result = engine.run().await?;

        stage.set(RunStage::Complete);
        Ok(result)
    }

    fn write_summary(
        &self,
        outcome: &CoreResult<TestRunResult>,
        stage: RunStage,
        capabilities: Option<Capabilities>,
        artifacts: &[Artifact],
    ) -> Option<PathBuf> {
        let summary = RunSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            mode: self.config.mode,
            category: self.config.category,
            stage,
            configuration: self.config.clone(),
            capabilities,
            attempts: outcome
                .as_ref()
                .map(|r| r.attempts.clone())
                .unwrap_or_default(),
            exit_code: match outcome {
                Ok(r) => r.exit_code,
                Err(e) => e.exit_code(),
            },
            error: outcome.as_ref().err().map(|e| e.to_string()),
            artifacts: artifacts.iter().map(|a| a.path.clone()).collect(),
        };

        let json = match serde_json::to_string_pretty(&summary) {
            Ok(json) => json,
            Err(e) => {
                warn!("Could not serialize run summary: {}", e);
                return None;
            }
        };
        let file_name = format!("run_summary_{}.json", self.run_stamp());
        match write_unique(&self.config.output_dir, &file_name, &json) {
            Ok(path) => {
                info!("Run summary written to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Could not write run summary: {}", e);
                None
            }
        }
    }
}
