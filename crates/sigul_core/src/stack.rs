//! Stack lifecycle: build, start, health polling and teardown.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use sigul_runner::{ServiceHealth, StackControlPlane};

use crate::error::{CoreError, CoreResult};

/// Aggregate state of the tracked services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackState {
    Stopped,
    Starting,
    Healthy,
    Unhealthy,
    TimedOut,
}

impl StackState {
    /// Whether polling stops in this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Healthy | Self::Unhealthy | Self::TimedOut)
    }
}

/// Fold per-service readings into the aggregate state.
///
/// Any unhealthy reading wins over everything else; the stack is healthy
/// only when every service is.
pub fn aggregate(readings: &[ServiceHealth]) -> StackState {
    if readings.iter().any(|h| *h == ServiceHealth::Unhealthy) {
        StackState::Unhealthy
    } else if !readings.is_empty() && readings.iter().all(|h| *h == ServiceHealth::Healthy) {
        StackState::Healthy
    } else {
        StackState::Starting
    }
}

/// Health polling bounds.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Lines of each service's log shown when bring-up fails
    pub log_tail_lines: usize,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 30,
            log_tail_lines: 20,
        }
    }
}

impl PollPolicy {
    /// Longest time `await_healthy` can block.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Best-effort stack teardown, discarding ephemeral volumes.
pub async fn stop_stack(plane: &dyn StackControlPlane) {
    match plane.down(true).await {
        Ok(()) => info!("Stack stopped"),
        Err(e) => warn!("Stack teardown failed (ignored): {}", e),
    }
}

/// Drives the tracked services from `Stopped` to `Healthy`.
pub struct StackController {
    plane: Arc<dyn StackControlPlane>,
    services: Vec<String>,
    policy: PollPolicy,
    state: StackState,
}

impl StackController {
    pub fn new(plane: Arc<dyn StackControlPlane>, services: Vec<String>, policy: PollPolicy) -> Self {
        Self {
            plane,
            services,
            policy,
            state: StackState::Stopped,
        }
    }

    pub fn state(&self) -> StackState {
        self.state
    }

    /// Rebuild the service images.
    pub async fn build(&self, no_cache: bool) -> CoreResult<()> {
        info!("Building stack images{}", if no_cache { " (no cache)" } else { "" });
        self.plane
            .build(&self.services, no_cache)
            .await
            .map_err(|e| CoreError::Infrastructure(format!("image build failed: {}", e)))
    }

    /// Start the tracked services, pre-empting any stale instance.
    pub async fn start(&mut self) -> CoreResult<()> {
        debug!("Pre-cleaning any existing stack instance");
        if let Err(e) = self.plane.down(true).await {
            debug!("Pre-clean failed (ignored): {}", e);
        }

        self.plane
            .up(&self.services)
            .await
            .map_err(|e| CoreError::Infrastructure(format!("stack start failed: {}", e)))?;
        self.state = StackState::Starting;
        Ok(())
    }

    /// Poll until every service is healthy, one is unhealthy, or the budget runs out.
    pub async fn poll_health(&mut self) -> StackState {
        for attempt in 1..=self.policy.max_attempts {
            let mut readings = Vec::with_capacity(self.services.len());
            for service in &self.services {
                let health = match self.plane.health(service).await {
                    Ok(health) => health,
                    Err(e) => {
                        debug!("Health query for {} failed: {}", service, e);
                        ServiceHealth::Unknown
                    }
                };
                readings.push(health);
            }

            let summary: Vec<String> = self
                .services
                .iter()
                .zip(&readings)
                .map(|(s, h)| format!("{}={}", s, h))
                .collect();
            info!(
                "Health check {}/{}: {}",
                attempt,
                self.policy.max_attempts,
                summary.join(" ")
            );

            self.state = aggregate(&readings);
            if self.state.is_terminal() {
                return self.state;
            }
            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.interval).await;
            }
        }

        self.state = StackState::TimedOut;
        self.state
    }

    /// Wait for the stack to become healthy; on failure, dump log tails first.
    pub async fn await_healthy(&mut self) -> CoreResult<()> {
        match self.poll_health().await {
            StackState::Healthy => {
                info!("All services healthy");
                Ok(())
            }
            StackState::Unhealthy => {
                error!("A service reported unhealthy");
                self.dump_log_tails().await;
                Err(CoreError::Infrastructure(
                    "service health check reported unhealthy".to_string(),
                ))
            }
            _ => {
                error!(
                    "Services not healthy after {} checks ({:?})",
                    self.policy.max_attempts,
                    self.policy.budget()
                );
                self.dump_log_tails().await;
                Err(CoreError::Infrastructure(format!(
                    "timed out waiting for healthy services after {:?}",
                    self.policy.budget()
                )))
            }
        }
    }

    /// Print the last lines of every tracked service's log.
    pub async fn dump_log_tails(&self) {
        for service in &self.services {
            match self.plane.logs(service, Some(self.policy.log_tail_lines)).await {
                Ok(logs) => error!(
                    "Last {} log lines of {}:\n{}",
                    self.policy.log_tail_lines,
                    service,
                    logs.trim_end()
                ),
                Err(e) => warn!("Could not read logs of {}: {}", service, e),
            }
        }
    }
}
