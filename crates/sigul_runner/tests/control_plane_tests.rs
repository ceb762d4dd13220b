//! Integration tests for the stack control plane layer.
//!
//! These tests drive the compose wrapper and the mocks through the public
//! traits, without requiring Docker.

use std::sync::Arc;

use sigul_runner::{
    ComposeCli, ComposeConfig, ComposeFlavor, MockControlPlane, MockProcessRunner, MockResponse,
    ProcessRunner, ProcessSpec, RunnerError, ServiceHealth, StackControlPlane, TrackedService,
};

/// Compose verbs carry the stack identity and the image overrides.
#[tokio::test]
async fn test_compose_up_uses_stack_identity() {
    let process = MockProcessRunner::new();
    let config = ComposeConfig::new("docker-compose.sigul.yml", "sigul-sign-docker")
        .project_dir("/srv/sigul")
        .env("SIGUL_SERVER_IMAGE", "server-linux-amd64-image:test");
    let cli = ComposeCli::new(ComposeFlavor::Plugin, config, Arc::new(process.clone()));

    let services = vec!["sigul-bridge".to_string(), "sigul-server".to_string()];
    cli.run(&["up", "-d"], &services).await.unwrap();

    let specs = process.get_specs();
    assert_eq!(specs.len(), 1);
    let spec = &specs[0];
    assert_eq!(
        spec.command_line(),
        "docker compose -f docker-compose.sigul.yml -p sigul-sign-docker up -d sigul-bridge sigul-server"
    );
    assert_eq!(spec.workdir.as_deref(), Some(std::path::Path::new("/srv/sigul")));
    assert_eq!(
        spec.env.get("SIGUL_SERVER_IMAGE").map(String::as_str),
        Some("server-linux-amd64-image:test")
    );
}

/// A failing compose command surfaces its stderr.
#[tokio::test]
async fn test_compose_failure_carries_stderr() {
    let process = MockProcessRunner::new()
        .respond("docker compose", MockResponse::failure(17, "build failed: no Dockerfile"));
    let cli = ComposeCli::new(
        ComposeFlavor::Plugin,
        ComposeConfig::new("c.yml", "p"),
        Arc::new(process),
    );

    let err = cli.run(&["build"], &[]).await.unwrap_err();
    assert!(err.to_string().contains("no Dockerfile"));
}

/// The mock records every verb in order.
#[tokio::test]
async fn test_mock_plane_records_lifecycle() {
    let plane = MockControlPlane::new();
    let services = vec![TrackedService::bridge().service, TrackedService::server().service];

    plane.down(true).await.unwrap();
    plane.build(&services, true).await.unwrap();
    plane.up(&services).await.unwrap();
    plane.health("sigul-bridge").await.unwrap();
    plane.down(true).await.unwrap();

    let methods: Vec<String> = plane.get_calls().into_iter().map(|c| c.method).collect();
    assert_eq!(methods, vec!["down", "build", "up", "health", "down"]);
    assert_eq!(plane.teardown_count(), 2);
    assert!(plane.get_method_calls("build")[0].args.contains(&"--no-cache".to_string()));
}

/// Health scripts are independent per service.
#[tokio::test]
async fn test_mock_plane_independent_health() {
    let plane = MockControlPlane::new()
        .health_sequence("sigul-bridge", vec![ServiceHealth::Healthy])
        .health_sequence(
            "sigul-server",
            vec![ServiceHealth::Unknown, ServiceHealth::Starting, ServiceHealth::Unhealthy],
        );

    for expected in [ServiceHealth::Unknown, ServiceHealth::Starting, ServiceHealth::Unhealthy] {
        assert_eq!(plane.health("sigul-bridge").await.unwrap(), ServiceHealth::Healthy);
        assert_eq!(plane.health("sigul-server").await.unwrap(), expected);
    }
}

/// Simulated timeouts are reported as timeouts.
#[tokio::test]
async fn test_mock_process_timeout() {
    let process = MockProcessRunner::new().respond("python3 -m pytest", MockResponse::timeout());
    let spec = ProcessSpec::new("python3").args(["-m", "pytest"]).timeout(600);

    let err = process.run(&spec).await.unwrap_err();
    assert!(matches!(err, RunnerError::Timeout(600)));
    assert!(err.is_timeout());
}
