//! # sigul_core
//!
//! Orchestration of the Sigul integration-test run: configuration
//! resolution, dependency provisioning, stack bring-up with health polling,
//! test execution with bounded retries, artifact collection and guaranteed
//! teardown.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sigul_core::{ConfigOverrides, EnvSnapshot, Orchestrator, Paths, RunConfiguration};
//! use sigul_runner::{MockControlPlane, MockProcessRunner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let env = EnvSnapshot::from_process();
//!     let overrides = ConfigOverrides::default();
//!     let config = RunConfiguration::resolve(&overrides, &env)?;
//!     let paths = Paths::resolve(&overrides, &env);
//!
//!     let orchestrator = Orchestrator::new(
//!         config,
//!         paths,
//!         env,
//!         Arc::new(MockControlPlane::new()),
//!         Arc::new(MockProcessRunner::new()),
//!     );
//!     let report = orchestrator.run_until(std::future::pending()).await;
//!     std::process::exit(report.exit_code());
//! }
//! ```

pub mod artifacts;
pub mod cleanup;
pub mod config;
pub mod engine;
pub mod environment;
pub mod error;
pub mod pipeline;
pub mod provision;
pub mod stack;

pub use artifacts::{Artifact, ArtifactCollector, ArtifactKind};
pub use cleanup::CleanupGuard;
pub use config::{Category, ConfigOverrides, Mode, Paths, RunConfiguration};
pub use engine::{AttemptRecord, AttemptReports, RetryPolicy, TestEngine, TestRunResult};
pub use environment::{detect_mode, python_isolated, EnvSnapshot};
pub use error::{CoreError, CoreResult, ExitCodes};
pub use pipeline::{Orchestrator, RunReport, RunStage, RunSummary};
pub use provision::{Capabilities, Provisioner};
pub use stack::{PollPolicy, StackController, StackState};
