//! Docker implementation of StackControlPlane.
//!
//! Lifecycle verbs (build, up, down) go through the compose CLI so the
//! compose file stays the single source of truth for the stack. Runtime
//! queries (health, logs, inspect, version, info) use the Engine API.

use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, LogOutput, LogsOptions};
use bollard::models::HealthStatusEnum;
use bollard::Docker;
use futures_util::StreamExt;
use tracing::{debug, info};

use crate::cli::{ComposeCli, ComposeFlavor, TEARDOWN_VERB};
use crate::config::ComposeConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{ProcessRunner, ServiceHealth, StackControlPlane};

/// Compose + Engine API control plane for one stack identity.
pub struct DockerComposePlane {
    compose: ComposeCli,
    client: Docker,
}

impl DockerComposePlane {
    /// Connect to the local Docker daemon and detect the compose flavour.
    pub async fn connect(
        config: ComposeConfig,
        process: Arc<dyn ProcessRunner>,
    ) -> RunnerResult<Self> {
        let client = Docker::connect_with_local_defaults()?;
        client
            .ping()
            .await
            .map_err(|e| RunnerError::RuntimeNotAvailable(e.to_string()))?;

        let flavor = ComposeFlavor::detect()?;
        Ok(Self {
            compose: ComposeCli::new(flavor, config, process),
            client,
        })
    }

    fn container(&self, service: &str) -> String {
        self.compose.config().container_for(service)
    }

    fn map_not_found(err: bollard::errors::Error, container: &str) -> RunnerError {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => RunnerError::ContainerNotFound(container.to_string()),
            other => other.into(),
        }
    }
}

#[async_trait]
impl StackControlPlane for DockerComposePlane {
    async fn build(&self, services: &[String], no_cache: bool) -> RunnerResult<()> {
        info!("Building images for {:?}", services);
        let verb: &[&str] = if no_cache {
            &["build", "--no-cache"]
        } else {
            &["build"]
        };
        self.compose.run(verb, services).await?;
        Ok(())
    }

    async fn up(&self, services: &[String]) -> RunnerResult<()> {
        info!("Starting services {:?}", services);
        self.compose.run(&["up", "-d"], services).await?;
        Ok(())
    }

    async fn down(&self, remove_volumes: bool) -> RunnerResult<()> {
        let verb: &[&str] = if remove_volumes {
            TEARDOWN_VERB
        } else {
            &["down", "--remove-orphans"]
        };
        self.compose.run(verb, &[]).await?;
        Ok(())
    }

    fn down_blocking(&self) -> RunnerResult<()> {
        self.compose.down_blocking()
    }

    async fn health(&self, service: &str) -> RunnerResult<ServiceHealth> {
        let container = self.container(service);
        let response = match self
            .client
            .inspect_container(&container, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => response,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                debug!("Container {} not created yet", container);
                return Ok(ServiceHealth::Unknown);
            }
            Err(e) => return Err(e.into()),
        };

        let status = response
            .state
            .and_then(|state| state.health)
            .and_then(|health| health.status);

        Ok(match status {
            Some(HealthStatusEnum::HEALTHY) => ServiceHealth::Healthy,
            Some(HealthStatusEnum::UNHEALTHY) => ServiceHealth::Unhealthy,
            Some(HealthStatusEnum::STARTING) => ServiceHealth::Starting,
            _ => ServiceHealth::Unknown,
        })
    }

    async fn logs(&self, service: &str, tail: Option<usize>) -> RunnerResult<String> {
        let container = self.container(service);
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string()),
            ..Default::default()
        };

        let mut output = String::new();
        let mut stream = self.client.logs(&container, Some(options));

        while let Some(result) = stream.next().await {
            match result {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    output.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => return Err(Self::map_not_found(e, &container)),
            }
        }

        Ok(output)
    }

    async fn inspect(&self, service: &str) -> RunnerResult<String> {
        let container = self.container(service);
        let response = self
            .client
            .inspect_container(&container, None::<InspectContainerOptions>)
            .await
            .map_err(|e| Self::map_not_found(e, &container))?;
        Ok(serde_json::to_string_pretty(&response)?)
    }

    async fn runtime_version(&self) -> RunnerResult<String> {
        let version = self.client.version().await?;
        Ok(serde_json::to_string_pretty(&version)?)
    }

    async fn runtime_info(&self) -> RunnerResult<String> {
        let info = self.client.info().await?;
        Ok(serde_json::to_string_pretty(&info)?)
    }

    fn teardown_command(&self) -> String {
        self.compose.teardown_command()
    }
}
