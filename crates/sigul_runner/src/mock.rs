//! Mock control plane and process runner for testing.
//!
//! Provide configurable implementations of the StackControlPlane and
//! ProcessRunner traits for unit tests that must not touch Docker or
//! spawn real processes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::config::ProcessSpec;
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{ProcessOutput, ProcessRunner, ServiceHealth, StackControlPlane};

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub method: String,
    pub service: Option<String>,
    pub args: Vec<String>,
}

impl CapturedCall {
    fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            service: None,
            args: Vec::new(),
        }
    }

    fn service(mut self, service: &str) -> Self {
        self.service = Some(service.to_string());
        self
    }

    fn args(mut self, args: &[String]) -> Self {
        self.args = args.to_vec();
        self
    }
}

/// Mock stack control plane.
///
/// Health readings are scripted per service; once a script is exhausted the
/// last reading repeats. Services without a script report healthy.
#[derive(Clone, Default)]
pub struct MockControlPlane {
    health_scripts: Arc<RwLock<HashMap<String, Vec<ServiceHealth>>>>,
    health_index: Arc<RwLock<HashMap<String, usize>>>,
    logs: Arc<RwLock<HashMap<String, String>>>,
    failures: Arc<RwLock<HashMap<String, String>>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
}

impl MockControlPlane {
    /// Create a new mock control plane.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the sequence of health readings for a service.
    pub fn health_sequence(self, service: impl Into<String>, readings: Vec<ServiceHealth>) -> Self {
        self.health_scripts.write().insert(service.into(), readings);
        self
    }

    /// Set the log text returned for a service.
    pub fn service_logs(self, service: impl Into<String>, logs: impl Into<String>) -> Self {
        self.logs.write().insert(service.into(), logs.into());
        self
    }

    /// Make every call to `method` fail with `message`.
    pub fn fail_on(self, method: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.write().insert(method.into(), message.into());
        self
    }

    /// Get all captured calls.
    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured_calls.read().clone()
    }

    /// Check if a specific method was called.
    pub fn was_called(&self, method: &str) -> bool {
        self.captured_calls.read().iter().any(|c| c.method == method)
    }

    /// Get calls to a specific method.
    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Number of teardowns issued, async or blocking.
    pub fn teardown_count(&self) -> usize {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == "down" || c.method == "down_blocking")
            .count()
    }

    fn record_call(&self, call: CapturedCall) {
        self.captured_calls.write().push(call);
    }

    fn check_failure(&self, method: &str) -> RunnerResult<()> {
        if let Some(msg) = self.failures.read().get(method).cloned() {
            return Err(RunnerError::ExecutionFailed(msg));
        }
        Ok(())
    }

    fn next_health(&self, service: &str) -> ServiceHealth {
        let scripts = self.health_scripts.read();
        let Some(script) = scripts.get(service).filter(|s| !s.is_empty()) else {
            return ServiceHealth::Healthy;
        };
        let mut index = self.health_index.write();
        let i = index.entry(service.to_string()).or_insert(0);
        let reading = script[(*i).min(script.len() - 1)];
        *i += 1;
        reading
    }
}

#[async_trait]
impl StackControlPlane for MockControlPlane {
    async fn build(&self, services: &[String], no_cache: bool) -> RunnerResult<()> {
        let mut args = services.to_vec();
        if no_cache {
            args.push("--no-cache".to_string());
        }
        self.record_call(CapturedCall::new("build").args(&args));
        self.check_failure("build")
    }

    async fn up(&self, services: &[String]) -> RunnerResult<()> {
        self.record_call(CapturedCall::new("up").args(services));
        self.check_failure("up")
    }

    async fn down(&self, remove_volumes: bool) -> RunnerResult<()> {
        let args = if remove_volumes {
            vec!["-v".to_string()]
        } else {
            Vec::new()
        };
        self.record_call(CapturedCall::new("down").args(&args));
        self.check_failure("down")
    }

    fn down_blocking(&self) -> RunnerResult<()> {
        self.record_call(CapturedCall::new("down_blocking"));
        self.check_failure("down_blocking")
    }

    async fn health(&self, service: &str) -> RunnerResult<ServiceHealth> {
        self.record_call(CapturedCall::new("health").service(service));
        self.check_failure("health")?;
        Ok(self.next_health(service))
    }

    async fn logs(&self, service: &str, tail: Option<usize>) -> RunnerResult<String> {
        let args: Vec<String> = tail.map(|n| n.to_string()).into_iter().collect();
        self.record_call(CapturedCall::new("logs").service(service).args(&args));
        self.check_failure("logs")?;
        let logs = self
            .logs
            .read()
            .get(service)
            .cloned()
            .unwrap_or_else(|| format!("mock logs for {}", service));
        Ok(match tail {
            Some(n) => {
                let lines: Vec<&str> = logs.lines().collect();
                lines[lines.len().saturating_sub(n)..].join("\n")
            }
            None => logs,
        })
    }

    async fn inspect(&self, service: &str) -> RunnerResult<String> {
        self.record_call(CapturedCall::new("inspect").service(service));
        self.check_failure("inspect")?;
        Ok(format!("{{\"Name\": \"/{}\"}}", service))
    }

    async fn runtime_version(&self) -> RunnerResult<String> {
        self.record_call(CapturedCall::new("runtime_version"));
        self.check_failure("runtime_version")?;
        Ok("{\"Version\": \"mock\"}".to_string())
    }

    async fn runtime_info(&self) -> RunnerResult<String> {
        self.record_call(CapturedCall::new("runtime_info"));
        self.check_failure("runtime_info")?;
        Ok("{\"Containers\": 2}".to_string())
    }

    fn teardown_command(&self) -> String {
        "docker compose -f docker-compose.sigul.yml -p mock down -v --remove-orphans".to_string()
    }
}

/// Predefined response for a mock process execution.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Simulate the process exceeding its wall-clock budget
    pub timed_out: bool,
    /// Arguments starting with one of these prefixes name files to create
    pub creates_files_from: Vec<String>,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 100,
            timed_out: false,
            creates_files_from: Vec::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 100,
            timed_out: false,
            creates_files_from: Vec::new(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            timed_out: true,
            ..Self::failure(-1, "")
        }
    }

    /// Create the file named by any argument of the form `<prefix><path>`.
    pub fn creates_files_from(mut self, prefix: impl Into<String>) -> Self {
        self.creates_files_from.push(prefix.into());
        self
    }
}

/// Mock host process runner.
///
/// Responses are matched by command-line prefix; the longest matching prefix
/// wins. Each prefix replays its responses in order and then repeats the last.
#[derive(Clone, Default)]
pub struct MockProcessRunner {
    responses: Arc<RwLock<Vec<(String, Vec<MockResponse>)>>>,
    response_index: Arc<RwLock<HashMap<String, usize>>>,
    captured_specs: Arc<RwLock<Vec<ProcessSpec>>>,
}

impl MockProcessRunner {
    /// Create a new mock process runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a response for commands whose command line starts with `prefix`.
    pub fn respond(self, prefix: impl Into<String>, response: MockResponse) -> Self {
        let prefix = prefix.into();
        {
            let mut responses = self.responses.write();
            match responses.iter_mut().find(|(p, _)| *p == prefix) {
                Some((_, list)) => list.push(response),
                None => responses.push((prefix, vec![response])),
            }
        }
        self
    }

    /// Get all captured process specs.
    pub fn get_specs(&self) -> Vec<ProcessSpec> {
        self.captured_specs.read().clone()
    }

    /// Captured specs whose command line starts with `prefix`.
    pub fn specs_matching(&self, prefix: &str) -> Vec<ProcessSpec> {
        self.captured_specs
            .read()
            .iter()
            .filter(|s| s.command_line().starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Get the number of processes run.
    pub fn call_count(&self) -> usize {
        self.captured_specs.read().len()
    }

    fn next_response(&self, command_line: &str) -> MockResponse {
        let responses = self.responses.read();
        let Some((prefix, list)) = responses
            .iter()
            .filter(|(p, _)| command_line.starts_with(p.as_str()))
            .max_by_key(|(p, _)| p.len())
        else {
            return MockResponse::success("");
        };
        let mut index = self.response_index.write();
        let i = index.entry(prefix.clone()).or_insert(0);
        let response = list[(*i).min(list.len() - 1)].clone();
        *i += 1;
        response
    }

    fn create_files(spec: &ProcessSpec, prefixes: &[String]) -> RunnerResult<()> {
        for arg in &spec.args {
            for prefix in prefixes {
                if let Some(path) = arg.strip_prefix(prefix.as_str()) {
                    let path = Path::new(path);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, "<testsuite/>")?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(&self, spec: &ProcessSpec) -> RunnerResult<ProcessOutput> {
        self.captured_specs.write().push(spec.clone());

        let response = self.next_response(&spec.command_line());
        Self::create_files(spec, &response.creates_files_from)?;

        if response.timed_out {
            return Err(RunnerError::Timeout(spec.timeout_seconds));
        }

        let started_at = Utc::now();
        let finished_at = started_at + chrono::Duration::milliseconds(response.duration_ms as i64);

        Ok(ProcessOutput {
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at,
            finished_at,
            duration_ms: response.duration_ms,
        })
    }
}
