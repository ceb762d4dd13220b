//! Test execution engine.
//!
//! Runs one logical test invocation made of up to `retry_count + 1` physical
//! attempts. Every attempt writes its reports under attempt-distinct names,
//! and the exit code of the last attempt is the authoritative result.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use sigul_runner::{ProcessRunner, ProcessSpec, RunnerError};

use crate::config::{Paths, RunConfiguration};
use crate::error::{CoreResult, ExitCodes};
use crate::provision::Capabilities;

/// Directory under the output dir holding per-attempt reports.
pub const REPORTS_DIR: &str = "reports";

/// Backoff between failed attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(10),
        }
    }
}

/// Report files requested from one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptReports {
    /// Machine-readable result report (always requested)
    pub junit: PathBuf,
    pub html: Option<PathBuf>,
    pub coverage: Option<PathBuf>,
    /// Captured console output of a quiet attempt
    pub output_log: Option<PathBuf>,
}

impl AttemptReports {
    /// All report paths of this attempt.
    pub fn paths(&self) -> Vec<&Path> {
        let mut paths = vec![self.junit.as_path()];
        paths.extend(self.html.as_deref());
        paths.extend(self.coverage.as_deref());
        paths.extend(self.output_log.as_deref());
        paths
    }
}

/// A fully built test invocation for one attempt.
#[derive(Debug, Clone)]
pub struct TestInvocation {
    pub attempt: u32,
    pub spec: ProcessSpec,
    pub reports: AttemptReports,
}

/// Outcome of one physical attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_number: u32,
    pub exit_code: i32,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub reports: AttemptReports,
}

/// Outcome of the test phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunResult {
    /// Number of the last attempt made (1-based)
    pub attempt_number: u32,
    /// Exit code of the last attempt
    pub exit_code: i32,
    /// Directory holding the reports of every attempt
    pub artifacts_path: PathBuf,
    pub attempts: Vec<AttemptRecord>,
}

impl TestRunResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Builds and runs the test-suite invocation.
pub struct TestEngine<'a> {
    config: &'a RunConfiguration,
    paths: &'a Paths,
    capabilities: Capabilities,
    process: Arc<dyn ProcessRunner>,
    retry: RetryPolicy,
    run_stamp: String,
}

impl<'a> TestEngine<'a> {
    pub fn new(
        config: &'a RunConfiguration,
        paths: &'a Paths,
        capabilities: Capabilities,
        process: Arc<dyn ProcessRunner>,
        run_stamp: impl Into<String>,
    ) -> Self {
        Self {
            config,
            paths,
            capabilities,
            process,
            retry: RetryPolicy::default(),
            run_stamp: run_stamp.into(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn reports_dir(&self) -> PathBuf {
        self.config.output_dir.join(REPORTS_DIR)
    }

    fn report_path(&self, kind: &str, attempt: u32, ext: &str) -> PathBuf {
        self.reports_dir()
            .join(format!("{}_{}_attempt{}.{}", kind, self.run_stamp, attempt, ext))
    }

    /// Whether the parallel plugin will be used.
    pub fn runs_parallel(&self) -> bool {
        self.config.parallel && self.capabilities.parallel
    }

    /// Build the invocation for the given attempt.
    pub fn build_invocation(&self, attempt: u32) -> TestInvocation {
        let test_path = self.paths.test_path.to_string_lossy().to_string();
        let mut spec = ProcessSpec::new(&self.paths.python)
            .args(["-m", "pytest"])
            .arg(test_path)
            .workdir(&self.paths.project_root)
            .timeout(self.config.timeout_seconds)
            .stream_output(self.config.verbose)
            .envs(&self.config.images)
            .env("PYTHONUNBUFFERED", "1");

        if let Some(class) = self.config.category.selector() {
            spec = spec.arg("-k").arg(class);
        }

        spec = if self.config.verbose {
            spec.args(["-v", "-s", "--tb=long"])
        } else {
            spec.args(["-q", "--tb=short"])
        };
        spec = spec.arg("--durations=10");

        if self.runs_parallel() {
            spec = spec.args(["-n", "auto"]);
        }

        let junit = self.report_path("results", attempt, "xml");
        spec = spec.arg(format!("--junitxml={}", junit.display()));

        let html = self.capabilities.html_report.then(|| {
            self.report_path("report", attempt, "html")
        });
        if let Some(path) = &html {
            spec = spec
                .arg(format!("--html={}", path.display()))
                .arg("--self-contained-html");
        }

        let coverage = self.capabilities.coverage.then(|| {
            self.report_path("coverage", attempt, "xml")
        });
        if let Some(path) = &coverage {
            let cov_source = self
                .paths
                .test_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_else(|| ".".to_string());
            spec = spec
                .arg(format!("--cov={}", cov_source))
                .arg(format!("--cov-report=xml:{}", path.display()));
        }

        let output_log = (!self.config.verbose).then(|| self.report_path("pytest", attempt, "log"));

        TestInvocation {
            attempt,
            spec,
            reports: AttemptReports {
                junit,
                html,
                coverage,
                output_log,
            },
        }
    }

    async fn run_attempt(&self, invocation: &TestInvocation) -> CoreResult<AttemptRecord> {
        info!(
            "Test attempt {}/{}: {}",
            invocation.attempt,
            self.config.max_attempts(),
            invocation.spec.command_line()
        );

        let (exit_code, timed_out, duration_ms) = match self.process.run(&invocation.spec).await {
            Ok(output) => {
                if let Some(log_path) = &invocation.reports.output_log {
                    if let Err(e) = std::fs::write(log_path, output.combined_output()) {
                        warn!("Could not save test output to {}: {}", log_path.display(), e);
                    }
                }
                (output.exit_code, false, output.duration_ms)
            }
            Err(RunnerError::Timeout(seconds)) => {
                warn!("Test attempt {} exceeded {}s", invocation.attempt, seconds);
                (ExitCodes::TEST_TIMEOUT, true, seconds.saturating_mul(1000))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(AttemptRecord {
            attempt_number: invocation.attempt,
            exit_code,
            timed_out,
            duration_ms,
            reports: invocation.reports.clone(),
        })
    }

    /// Run the test suite with bounded retries.
    pub async fn run(&self) -> CoreResult<TestRunResult> {
        std::fs::create_dir_all(self.reports_dir())?;

        if self.config.parallel && !self.capabilities.parallel {
            info!("Parallel execution requested but unavailable; running sequentially");
        }

        let max_attempts = self.config.max_attempts();
        let mut attempts: Vec<AttemptRecord> = Vec::new();

        for attempt in 1..=max_attempts {
            let invocation = self.build_invocation(attempt);
            let record = self.run_attempt(&invocation).await?;
            let exit_code = record.exit_code;
            attempts.push(record);

            if exit_code == 0 {
                info!("Tests passed on attempt {}", attempt);
                break;
            }

            if attempt <= self.config.retry_count {
                warn!(
                    "Test attempt {} failed with exit code {}; retrying in {:?}",
                    attempt, exit_code, self.retry.backoff
                );
                tokio::time::sleep(self.retry.backoff).await;
            } else {
                warn!(
                    "Tests failed with exit code {} after {} attempt(s)",
                    exit_code, attempt
                );
            }
        }

        // the loop runs at least once
        let (attempt_number, exit_code) = attempts
            .last()
            .map(|a| (a.attempt_number, a.exit_code))
            .unwrap_or((0, ExitCodes::GENERAL_ERROR));
        Ok(TestRunResult {
            attempt_number,
            exit_code,
            artifacts_path: self.reports_dir(),
            attempts,
        })
    }
}
