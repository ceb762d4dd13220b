//! End-to-end tests of the orchestrated run against mock backends.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sigul_core::{
    ArtifactKind, ConfigOverrides, EnvSnapshot, ExitCodes, Mode, Orchestrator, Paths, PollPolicy,
    RetryPolicy, RunConfiguration, RunStage, RunSummary,
};
use sigul_runner::{MockControlPlane, MockProcessRunner, MockResponse, ServiceHealth};

const PYTEST: &str = "python3 -m pytest";

struct Harness {
    _dir: tempfile::TempDir,
    root: PathBuf,
    out: PathBuf,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        std::fs::create_dir_all(root.join("tests/integration")).unwrap();
        std::fs::write(root.join("docker-compose.sigul.yml"), "services: {}\n").unwrap();
        std::fs::write(root.join("tests/integration/test_sigul_stack.py"), "").unwrap();
        let out = dir.path().join("artifacts");
        Self { _dir: dir, root, out }
    }

    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            mode: Some(Mode::Ci),
            project_root: Some(self.root.clone()),
            output_dir: Some(self.out.clone()),
            ..Default::default()
        }
    }

    fn orchestrator(
        &self,
        overrides: ConfigOverrides,
        env: EnvSnapshot,
        plane: &MockControlPlane,
        process: &MockProcessRunner,
    ) -> Orchestrator {
        let config = RunConfiguration::resolve(&overrides, &env).unwrap();
        let paths = Paths::resolve(&overrides, &env);
        Orchestrator::new(config, paths, env, Arc::new(plane.clone()), Arc::new(process.clone()))
            .with_poll_policy(PollPolicy {
                interval: Duration::ZERO,
                ..Default::default()
            })
            .with_retry_policy(RetryPolicy {
                backoff: Duration::ZERO,
            })
    }

    fn reports(&self, prefix: &str) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = std::fs::read_dir(self.out.join("reports"))
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.path())
                    .filter(|p| file_name(p).starts_with(prefix))
                    .collect()
            })
            .unwrap_or_default();
        found.sort();
        found
    }
}

fn file_name(path: &Path) -> String {
    path.file_name().unwrap().to_string_lossy().to_string()
}

/// Teardowns issued after the stack was started (the pre-clean before
/// `up` does not count).
fn teardowns_after_start(plane: &MockControlPlane) -> usize {
    let calls = plane.get_calls();
    let start = calls
        .iter()
        .rposition(|c| c.method == "up")
        .map(|i| i + 1)
        .unwrap_or(0);
    calls[start..]
        .iter()
        .filter(|c| c.method == "down" || c.method == "down_blocking")
        .count()
}

fn pytest_passes() -> MockResponse {
    MockResponse::success("1 passed").creates_files_from("--junitxml=")
}

fn pytest_fails(code: i32) -> MockResponse {
    MockResponse::failure(code, "1 failed").creates_files_from("--junitxml=")
}

#[tokio::test]
async fn test_healthy_first_poll_runs_once_with_one_report() {
    let h = Harness::new();
    let plane = MockControlPlane::new();
    let process = MockProcessRunner::new()
        .respond("python3 -c 'import pytest_html'", MockResponse::failure(1, ""))
        .respond("python3 -c 'import pytest_cov'", MockResponse::failure(1, ""))
        .respond(PYTEST, pytest_passes());
    let overrides = ConfigOverrides {
        category: Some("infrastructure".to_string()),
        retry_count: Some(0),
        ..h.overrides()
    };

    let report = h
        .orchestrator(overrides, EnvSnapshot::default(), &plane, &process)
        .run_until(std::future::pending())
        .await;

    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.stage, RunStage::Complete);
    // one poll, then the status snapshot
    assert_eq!(plane.get_method_calls("health").len(), 4);

    let runs = process.specs_matching(PYTEST);
    assert_eq!(runs.len(), 1);
    let k = runs[0].args.iter().position(|a| a == "-k").unwrap();
    assert_eq!(runs[0].args[k + 1], "TestInfrastructure");

    assert_eq!(h.reports("results_").len(), 1);
    assert!(h.reports("report_").is_empty());
    let junit_reports = report
        .artifacts
        .iter()
        .filter(|a| a.kind == ArtifactKind::TestReport && a.name.starts_with("results_"))
        .count();
    assert_eq!(junit_reports, 1);
    assert_eq!(teardowns_after_start(&plane), 1);
}

#[tokio::test]
async fn test_unhealthy_service_fails_fast_and_still_cleans_up() {
    let h = Harness::new();
    let plane = MockControlPlane::new().health_sequence(
        "sigul-server",
        vec![ServiceHealth::Starting, ServiceHealth::Starting, ServiceHealth::Unhealthy],
    );
    let process = MockProcessRunner::new();

    let report = h
        .orchestrator(h.overrides(), EnvSnapshot::default(), &plane, &process)
        .run_until(std::future::pending())
        .await;

    assert_eq!(report.exit_code(), ExitCodes::INFRASTRUCTURE_ERROR);
    assert_eq!(report.stage, RunStage::HealthCheck);
    // three polls of two services, then the status snapshot
    assert_eq!(plane.get_method_calls("health").len(), 8);

    let tails: Vec<_> = plane
        .get_method_calls("logs")
        .into_iter()
        .filter(|c| c.args == vec!["20".to_string()])
        .collect();
    assert_eq!(tails.len(), 2);
    assert!(tails.iter().any(|c| c.service.as_deref() == Some("sigul-bridge")));
    assert!(tails.iter().any(|c| c.service.as_deref() == Some("sigul-server")));

    assert!(process.specs_matching(PYTEST).is_empty());
    assert_eq!(teardowns_after_start(&plane), 1);
}

#[tokio::test]
async fn test_retry_recovers_and_keeps_both_attempts() {
    let h = Harness::new();
    let plane = MockControlPlane::new();
    let process = MockProcessRunner::new()
        .respond(PYTEST, pytest_fails(1))
        .respond(PYTEST, pytest_passes());
    let overrides = ConfigOverrides {
        retry_count: Some(2),
        ..h.overrides()
    };

    let report = h
        .orchestrator(overrides, EnvSnapshot::default(), &plane, &process)
        .run_until(std::future::pending())
        .await;

    assert_eq!(report.exit_code(), 0);
    assert_eq!(process.specs_matching(PYTEST).len(), 2);

    let results = h.reports("results_");
    assert_eq!(results.len(), 2);
    assert!(file_name(&results[0]).ends_with("_attempt1.xml"));
    assert!(file_name(&results[1]).ends_with("_attempt2.xml"));
    assert_eq!(teardowns_after_start(&plane), 1);
}

#[tokio::test]
async fn test_retries_exhausted_report_last_exit_code() {
    let h = Harness::new();
    let plane = MockControlPlane::new();
    let process = MockProcessRunner::new()
        .respond(PYTEST, pytest_fails(1))
        .respond(PYTEST, pytest_fails(2));
    let overrides = ConfigOverrides {
        retry_count: Some(1),
        ..h.overrides()
    };

    let report = h
        .orchestrator(overrides, EnvSnapshot::default(), &plane, &process)
        .run_until(std::future::pending())
        .await;

    assert_eq!(report.exit_code(), 2);
    assert_eq!(process.specs_matching(PYTEST).len(), 2);
    assert_eq!(teardowns_after_start(&plane), 1);
}

#[tokio::test]
async fn test_no_cleanup_leaves_stack_running() {
    let h = Harness::new();
    let plane = MockControlPlane::new();
    let process = MockProcessRunner::new().respond(PYTEST, pytest_fails(1));
    let overrides = ConfigOverrides {
        no_cleanup: true,
        ..h.overrides()
    };

    let report = h
        .orchestrator(overrides, EnvSnapshot::default(), &plane, &process)
        .run_until(std::future::pending())
        .await;

    assert_eq!(report.exit_code(), 1);
    assert_eq!(teardowns_after_start(&plane), 0);
    assert_eq!(
        report.teardown_hint.as_deref(),
        Some("docker compose -f docker-compose.sigul.yml -p mock down -v --remove-orphans")
    );
}

#[tokio::test]
async fn test_configuration_error_still_cleans_up() {
    let h = Harness::new();
    std::fs::remove_file(h.root.join("docker-compose.sigul.yml")).unwrap();
    let plane = MockControlPlane::new();
    let process = MockProcessRunner::new();

    let report = h
        .orchestrator(h.overrides(), EnvSnapshot::default(), &plane, &process)
        .run_until(std::future::pending())
        .await;

    assert_eq!(report.exit_code(), ExitCodes::CONFIGURATION_ERROR);
    assert_eq!(report.stage, RunStage::Preflight);
    assert!(!plane.was_called("up"));
    assert_eq!(process.call_count(), 0);
    assert_eq!(plane.teardown_count(), 1);
    assert!(report.artifacts.is_empty());
}

#[tokio::test]
async fn test_provisioning_error_stops_before_stack() {
    let h = Harness::new();
    let plane = MockControlPlane::new();
    let process = MockProcessRunner::new().respond(
        "python3 -c 'import pytest, docker, requests'",
        MockResponse::failure(1, "ModuleNotFoundError: No module named 'docker'"),
    );

    let report = h
        .orchestrator(h.overrides(), EnvSnapshot::default(), &plane, &process)
        .run_until(std::future::pending())
        .await;

    assert_eq!(report.exit_code(), ExitCodes::PROVISIONING_ERROR);
    assert!(!plane.was_called("up"));
    assert_eq!(plane.teardown_count(), 1);
}

#[tokio::test]
async fn test_interrupt_during_health_polling_cleans_up() {
    let h = Harness::new();
    let plane = MockControlPlane::new().health_sequence("sigul-bridge", vec![ServiceHealth::Starting]);
    let process = MockProcessRunner::new();
    let orchestrator = h
        .orchestrator(h.overrides(), EnvSnapshot::default(), &plane, &process)
        .with_poll_policy(PollPolicy {
            interval: Duration::from_millis(20),
            max_attempts: 1000,
            log_tail_lines: 20,
        });

    let report = orchestrator
        .run_until(tokio::time::sleep(Duration::from_millis(100)))
        .await;

    assert_eq!(report.exit_code(), ExitCodes::INTERRUPTED);
    assert_eq!(report.stage, RunStage::HealthCheck);
    assert!(process.specs_matching(PYTEST).is_empty());
    assert_eq!(teardowns_after_start(&plane), 1);
}

#[tokio::test]
async fn test_interrupt_during_tests_cleans_up() {
    let h = Harness::new();
    let plane = MockControlPlane::new();
    let process = MockProcessRunner::new().respond(PYTEST, pytest_fails(1));
    let overrides = ConfigOverrides {
        retry_count: Some(5),
        ..h.overrides()
    };
    let orchestrator = h
        .orchestrator(overrides, EnvSnapshot::default(), &plane, &process)
        .with_retry_policy(RetryPolicy {
            backoff: Duration::from_secs(10),
        });

    let report = orchestrator
        .run_until(tokio::time::sleep(Duration::from_millis(100)))
        .await;

    assert_eq!(report.exit_code(), ExitCodes::INTERRUPTED);
    assert_eq!(report.stage, RunStage::Tests);
    assert_eq!(process.specs_matching(PYTEST).len(), 1);
    assert_eq!(teardowns_after_start(&plane), 1);
}

#[test]
fn test_relative_output_dir_is_resolved_against_working_directory() {
    let harness = Harness::new();
    let plane = MockControlPlane::new();
    let process = MockProcessRunner::new();
    let overrides = ConfigOverrides {
        output_dir: Some(PathBuf::from("sigul-artifacts")),
        ..harness.overrides()
    };
    let orchestrator = harness.orchestrator(overrides, EnvSnapshot::default(), &plane, &process);

    let output_dir = &orchestrator.config().output_dir;
    assert!(output_dir.is_absolute());
    assert_eq!(*output_dir, std::env::current_dir().unwrap().join("sigul-artifacts"));
    assert!(!output_dir.starts_with(&harness.root));
}

#[tokio::test]
async fn test_category_filter_selection() {
    let h = Harness::new();

    for (category, expected) in [("certificates", Some("TestCertificates")), ("all", None)] {
        let plane = MockControlPlane::new();
        let process = MockProcessRunner::new().respond(PYTEST, pytest_passes());
        let overrides = ConfigOverrides {
            category: Some(category.to_string()),
            ..h.overrides()
        };

        h.orchestrator(overrides, EnvSnapshot::default(), &plane, &process)
            .run_until(std::future::pending())
            .await;

        let args = process.specs_matching(PYTEST)[0].args.clone();
        let selector = args
            .iter()
            .position(|a| a == "-k")
            .map(|i| args[i + 1].as_str());
        assert_eq!(selector, expected, "category {}", category);
    }
}

#[tokio::test]
async fn test_build_runs_before_start_without_cache() {
    let h = Harness::new();
    let plane = MockControlPlane::new();
    let process = MockProcessRunner::new();
    let overrides = ConfigOverrides {
        build: true,
        ..h.overrides()
    };
    let env = EnvSnapshot::from_pairs([("SIGUL_BUILD_NO_CACHE", "1")]);

    h.orchestrator(overrides, env, &plane, &process)
        .run_until(std::future::pending())
        .await;

    let methods: Vec<String> = plane.get_calls().into_iter().map(|c| c.method).collect();
    let build = methods.iter().position(|m| m == "build").unwrap();
    let up = methods.iter().position(|m| m == "up").unwrap();
    assert!(build < up);
    assert!(plane.get_method_calls("build")[0]
        .args
        .contains(&"--no-cache".to_string()));
}

#[tokio::test]
async fn test_artifacts_collected_before_cleanup() {
    let h = Harness::new();
    let plane = MockControlPlane::new();
    let process = MockProcessRunner::new().respond(PYTEST, pytest_fails(1));

    let report = h
        .orchestrator(h.overrides(), EnvSnapshot::default(), &plane, &process)
        .run_until(std::future::pending())
        .await;

    let calls = plane.get_calls();
    let last_inspect = calls.iter().rposition(|c| c.method == "inspect").unwrap();
    let last_down = calls.iter().rposition(|c| c.method == "down").unwrap();
    assert!(last_inspect < last_down);

    assert!(h.out.join("logs/sigul-bridge.log").exists());
    assert!(h.out.join("logs/stack_status.txt").exists());
    assert!(report
        .artifacts
        .iter()
        .any(|a| a.kind == ArtifactKind::RuntimeVersion));
}

#[tokio::test]
async fn test_run_summary_records_attempts() {
    let h = Harness::new();
    let plane = MockControlPlane::new();
    let process = MockProcessRunner::new()
        .respond(PYTEST, pytest_fails(1))
        .respond(PYTEST, pytest_passes());
    let overrides = ConfigOverrides {
        retry_count: Some(1),
        ..h.overrides()
    };

    let report = h
        .orchestrator(overrides, EnvSnapshot::default(), &plane, &process)
        .run_until(std::future::pending())
        .await;

    let path = report.summary_path.clone().unwrap();
    let summary: RunSummary = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(summary.exit_code, 0);
    assert_eq!(summary.stage, RunStage::Complete);
    assert_eq!(summary.attempts.len(), 2);
    assert_eq!(summary.attempts[0].exit_code, 1);
    assert!(summary.capabilities.is_some());
    assert!(summary.error.is_none());
}
