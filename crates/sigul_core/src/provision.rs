//! Dependency provisioning and capability detection.
//!
//! Runs before the stack is touched: a missing required dependency aborts
//! the run, a missing optional plugin only disables the matching feature.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sigul_runner::{ProcessRunner, ProcessSpec, StackControlPlane};

use crate::config::{Mode, Paths, RunConfiguration};
use crate::environment::{python_isolated, EnvSnapshot};
use crate::error::{CoreError, CoreResult};

/// Packages the test suite cannot run without.
pub const REQUIRED_PACKAGES: &[&str] = &["pytest", "docker", "requests"];

/// Import names of the required packages.
const REQUIRED_MODULES: &[&str] = &["pytest", "docker", "requests"];

const INSTALL_TIMEOUT_SECONDS: u64 = 600;
const PROBE_TIMEOUT_SECONDS: u64 = 60;

/// An optional pytest plugin and the capability it unlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plugin {
    Parallel,
    HtmlReport,
    Coverage,
}

impl Plugin {
    pub fn all() -> &'static [Plugin] {
        &[Plugin::Parallel, Plugin::HtmlReport, Plugin::Coverage]
    }

    /// Package name for pip.
    pub fn package(&self) -> &'static str {
        match self {
            Self::Parallel => "pytest-xdist",
            Self::HtmlReport => "pytest-html",
            Self::Coverage => "pytest-cov",
        }
    }

    /// Module name for the import probe.
    pub fn module(&self) -> &'static str {
        match self {
            Self::Parallel => "xdist",
            Self::HtmlReport => "pytest_html",
            Self::Coverage => "pytest_cov",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Parallel => "parallel execution",
            Self::HtmlReport => "HTML report",
            Self::Coverage => "coverage report",
        }
    }
}

/// Optional test-tool capabilities, detected once and never re-probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub parallel: bool,
    pub html_report: bool,
    pub coverage: bool,
}

impl Capabilities {
    /// Every optional capability present.
    pub fn full() -> Self {
        Self {
            parallel: true,
            html_report: true,
            coverage: true,
        }
    }

    fn set(&mut self, plugin: Plugin, present: bool) {
        match plugin {
            Plugin::Parallel => self.parallel = present,
            Plugin::HtmlReport => self.html_report = present,
            Plugin::Coverage => self.coverage = present,
        }
    }
}

/// Ensures the test tool, its libraries and the container runtime are usable.
pub struct Provisioner<'a> {
    config: &'a RunConfiguration,
    paths: &'a Paths,
    env: &'a EnvSnapshot,
    process: Arc<dyn ProcessRunner>,
    plane: Arc<dyn StackControlPlane>,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        config: &'a RunConfiguration,
        paths: &'a Paths,
        env: &'a EnvSnapshot,
        process: Arc<dyn ProcessRunner>,
        plane: Arc<dyn StackControlPlane>,
    ) -> Self {
        Self {
            config,
            paths,
            env,
            process,
            plane,
        }
    }

    /// Provision dependencies and report the optional capabilities found.
    pub async fn provision(&self) -> CoreResult<Capabilities> {
        self.check_runtime().await?;

        if self.config.skip_install {
            info!("Skipping dependency installation");
        } else {
            self.install().await?;
        }

        self.probe_required().await?;
        Ok(self.probe_optional().await)
    }

    async fn check_runtime(&self) -> CoreResult<()> {
        let version = self.plane.runtime_version().await.map_err(|e| {
            CoreError::Provisioning(format!("container runtime not reachable: {}", e))
        })?;
        debug!("Container runtime: {}", version.lines().next().unwrap_or_default());
        Ok(())
    }

    fn pip_install(&self, packages: &[&str]) -> ProcessSpec {
        let mut spec = ProcessSpec::new(&self.paths.python)
            .args(["-m", "pip", "install", "--quiet"])
            .workdir(&self.paths.project_root)
            .timeout(INSTALL_TIMEOUT_SECONDS);
        if self.user_install() {
            spec = spec.arg("--user");
        }
        spec.args(packages.iter().copied())
    }

    fn user_install(&self) -> bool {
        self.config.mode == Mode::Local && !python_isolated(self.env)
    }

    async fn install(&self) -> CoreResult<()> {
        match self.config.mode {
            Mode::Local if !python_isolated(self.env) => {
                warn!(
                    "No virtualenv or conda environment detected; installing test dependencies \
                     into the user site. An isolated environment is recommended."
                );
            }
            Mode::Local => debug!("Installing into the active Python environment"),
            Mode::Ci => debug!("CI mode: installing directly"),
        }

        info!("Installing test dependencies: {}", REQUIRED_PACKAGES.join(" "));
        let output = self.process.run(&self.pip_install(REQUIRED_PACKAGES)).await.map_err(|e| {
            CoreError::Provisioning(format!("failed to run pip: {}", e))
        })?;
        if !output.success() {
            return Err(CoreError::Provisioning(format!(
                "pip install of required packages exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let plugins: Vec<&str> = Plugin::all().iter().map(Plugin::package).collect();
        match self.process.run(&self.pip_install(&plugins)).await {
            Ok(output) if output.success() => {}
            Ok(output) => warn!(
                "Optional plugins could not be installed (exit {}); continuing without them",
                output.exit_code
            ),
            Err(e) => warn!("Optional plugins could not be installed: {}", e),
        }
        Ok(())
    }

    fn import_probe(&self, modules: &[&str]) -> ProcessSpec {
        ProcessSpec::new(&self.paths.python)
            .arg("-c")
            .arg(format!("import {}", modules.join(", ")))
            .workdir(&self.paths.project_root)
            .timeout(PROBE_TIMEOUT_SECONDS)
    }

    async fn probe_required(&self) -> CoreResult<()> {
        let output = self
            .process
            .run(&self.import_probe(REQUIRED_MODULES))
            .await
            .map_err(|e| CoreError::Provisioning(format!("failed to run {}: {}", self.paths.python, e)))?;
        if !output.success() {
            return Err(CoreError::Provisioning(format!(
                "required test dependencies missing: {}",
                output.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn probe_optional(&self) -> Capabilities {
        let mut capabilities = Capabilities::default();
        for plugin in Plugin::all() {
            let present = matches!(
                self.process.run(&self.import_probe(&[plugin.module()])).await,
                Ok(output) if output.success()
            );
            if !present {
                warn!(
                    "{} not available; {} disabled",
                    plugin.package(),
                    plugin.describe()
                );
            }
            capabilities.set(*plugin, present);
        }
        info!(
            "Capabilities: parallel={} html={} coverage={}",
            capabilities.parallel, capabilities.html_report, capabilities.coverage
        );
        capabilities
    }
}
