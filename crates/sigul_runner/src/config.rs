//! Stack and process configuration types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A service of the compose stack whose health gates the test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedService {
    /// Compose service name
    pub service: String,
    /// Container name the service runs as
    pub container: String,
}

impl TrackedService {
    pub fn new(service: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            container: container.into(),
        }
    }

    /// The signing bridge.
    pub fn bridge() -> Self {
        Self::new("sigul-bridge", "sigul-bridge")
    }

    /// The signing server.
    pub fn server() -> Self {
        Self::new("sigul-server", "sigul-server")
    }
}

/// Compose stack configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeConfig {
    /// Compose file passed with `-f`
    pub compose_file: PathBuf,
    /// Project name passed with `-p`; identifies the stack instance
    pub project_name: String,
    /// Directory compose commands run from
    pub project_dir: PathBuf,
    /// Services started, polled and collected
    pub services: Vec<TrackedService>,
    /// Extra environment for compose invocations (image overrides)
    pub env: BTreeMap<String, String>,
}

impl ComposeConfig {
    pub fn new(compose_file: impl Into<PathBuf>, project_name: impl Into<String>) -> Self {
        Self {
            compose_file: compose_file.into(),
            project_name: project_name.into(),
            project_dir: PathBuf::from("."),
            services: vec![TrackedService::bridge(), TrackedService::server()],
            env: BTreeMap::new(),
        }
    }

    pub fn project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    pub fn services(mut self, services: Vec<TrackedService>) -> Self {
        self.services = services;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Look up the container name of a compose service.
    ///
    /// Services not in the tracked list are assumed to run under their own name.
    pub fn container_for(&self, service: &str) -> String {
        self.services
            .iter()
            .find(|s| s.service == service)
            .map(|s| s.container.clone())
            .unwrap_or_else(|| service.to_string())
    }

    /// Names of the tracked compose services.
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.service.clone()).collect()
    }
}

/// Host process invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessSpec {
    /// Program to execute
    pub program: String,
    /// Arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Working directory
    pub workdir: Option<PathBuf>,
    /// Wall-clock budget in seconds (0 = no timeout)
    pub timeout_seconds: u64,
    /// Inherit stdout/stderr instead of capturing them
    pub stream_output: bool,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn stream_output(mut self, stream: bool) -> Self {
        self.stream_output = stream;
        self
    }

    /// Render the command line for logs and operator hints.
    pub fn command_line(&self) -> String {
        let mut cmd = self.program.clone();
        for arg in &self.args {
            if arg.contains(' ') || arg.is_empty() {
                cmd.push_str(&format!(" '{}'", arg));
            } else {
                cmd.push(' ');
                cmd.push_str(arg);
            }
        }
        cmd
    }
}
