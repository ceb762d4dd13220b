//! sigul-itest - Main entry point.
//!
//! Exit codes:
//! - 0: All tests passed
//! - N: Exit code of the final test attempt
//! - 64: Configuration or usage error
//! - 65: Dependency provisioning failed
//! - 66: Stack infrastructure failure
//! - 130: Interrupted

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sigul_core::{CoreError, EnvSnapshot, ExitCodes, Orchestrator, Paths, RunConfiguration};
use sigul_runner::{ComposeConfig, DockerComposePlane, HostProcess, ProcessRunner, RunnerError};

mod args;

use args::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => to_exit_code(ExitCodes::SUCCESS),
                _ => to_exit_code(ExitCodes::CONFIGURATION_ERROR),
            };
        }
    };

    let env = EnvSnapshot::from_process();
    let overrides = cli.overrides();
    let config = RunConfiguration::resolve(&overrides, &env);
    init_logging(config.as_ref().map(|c| c.verbose).unwrap_or(cli.verbose));

    let result = match config {
        Ok(config) => {
            let paths = Paths::resolve(&overrides, &env);
            run(config, paths, env).await
        }
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(code) => to_exit_code(code),
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            to_exit_code(categorize_error(&e))
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "warn,sigul=debug" } else { "warn,sigul=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

async fn run(config: RunConfiguration, paths: Paths, env: EnvSnapshot) -> Result<i32> {
    let compose = config
        .images
        .iter()
        .fold(
            ComposeConfig::new(paths.compose_file.clone(), paths.project_name.clone())
                .project_dir(paths.project_root.clone()),
            |compose, (key, value)| compose.env(key, value),
        );
    let services = compose.service_names();

    let process: Arc<dyn ProcessRunner> = Arc::new(HostProcess::new());
    let plane = DockerComposePlane::connect(compose, process.clone())
        .await
        .map_err(|e| CoreError::Provisioning(format!("container runtime not usable: {}", e)))?;

    let orchestrator = Orchestrator::new(config, paths, env, Arc::new(plane), process).with_services(services);
    info!("Run {} ({})", orchestrator.run_id(), orchestrator.run_stamp());
    info!("Artifacts: {}", orchestrator.config().output_dir.display());

    let report = orchestrator.run_until(shutdown_signal()).await;

    if let Some(command) = &report.teardown_hint {
        eprintln!("⚠️  Warning: stack left running. Tear it down with:\n    {}", command);
    }
    if let Some(path) = &report.summary_path {
        info!("Summary: {}", path.display());
    }

    match report.outcome {
        Ok(result) => {
            if result.passed() {
                info!("✅ Tests passed (attempt {})", result.attempt_number);
            } else {
                warn!(
                    "Tests failed with exit code {} after {} attempt(s)",
                    result.exit_code, result.attempt_number
                );
            }
            Ok(result.exit_code)
        }
        Err(e) => Err(e).context("integration run failed"),
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                let name = tokio::select! {
                    _ = sigint.recv() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                };
                warn!("Received {}, shutting down", name);
                return;
            }
            _ => warn!("Could not install signal handlers; interruption will skip cleanup"),
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, shutting down");
            return;
        }
        warn!("Could not install Ctrl-C handler; interruption will skip cleanup");
    }

    std::future::pending::<()>().await
}

/// Map an error to its exit code.
fn categorize_error(e: &anyhow::Error) -> i32 {
    if let Some(core) = e.downcast_ref::<CoreError>() {
        return core.exit_code();
    }
    if let Some(RunnerError::RuntimeNotAvailable(_)) = e.downcast_ref::<RunnerError>() {
        return ExitCodes::PROVISIONING_ERROR;
    }
    ExitCodes::GENERAL_ERROR
}

/// Process exit codes are one byte; anything outside maps to a general error.
fn to_exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(ExitCodes::GENERAL_ERROR as u8))
}
