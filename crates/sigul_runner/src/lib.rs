//! # sigul_runner
//!
//! Container stack control and host process execution for the Sigul
//! integration harness.
//!
//! # Features
//!
//! - **Stack Control Plane**: build, start, stop and query the compose stack
//! - **Compose Detection**: `docker compose` plugin or standalone `docker-compose`
//! - **Engine API Queries**: health, logs and inspection through bollard
//! - **Host Processes**: timeout-bounded execution of the package manager and test tool
//! - **Mocks**: call-capturing implementations for testing without Docker
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sigul_runner::{ComposeConfig, DockerComposePlane, HostProcess, StackControlPlane};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ComposeConfig::new("docker-compose.sigul.yml", "sigul-sign-docker");
//!     let plane = DockerComposePlane::connect(config, Arc::new(HostProcess::new())).await?;
//!
//!     plane.up(&["sigul-bridge".to_string(), "sigul-server".to_string()]).await?;
//!     println!("bridge: {}", plane.health("sigul-bridge").await?);
//!     plane.down(true).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod docker;
pub mod error;
pub mod mock;
pub mod process;
pub mod runner;

pub use cli::{ComposeCli, ComposeFlavor, TEARDOWN_VERB};
pub use config::{ComposeConfig, ProcessSpec, TrackedService};
pub use docker::DockerComposePlane;
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockControlPlane, MockProcessRunner, MockResponse};
pub use process::HostProcess;
pub use runner::{ProcessOutput, ProcessRunner, ServiceHealth, StackControlPlane};
