//! Diagnostic artifact collection.
//!
//! Every step is best-effort: a failed step is logged and skipped, and the
//! collector never replaces a file that already exists.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sigul_runner::{ServiceHealth, StackControlPlane};

use crate::engine::TestRunResult;
use crate::error::CoreResult;

/// Directory under the output dir holding stack diagnostics.
pub const LOGS_DIR: &str = "logs";

/// Kind of a collected artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    ServiceLog,
    ServiceInspect,
    RuntimeVersion,
    RuntimeInfo,
    StackStatus,
    TestReport,
}

/// A file produced by the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    fn new(kind: ArtifactKind, path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            name,
            kind,
            path,
            created_at: Utc::now(),
        }
    }
}

/// Gathers stack diagnostics into the output directory.
pub struct ArtifactCollector<'a> {
    plane: &'a dyn StackControlPlane,
    services: &'a [String],
    output_dir: PathBuf,
}

impl<'a> ArtifactCollector<'a> {
    pub fn new(plane: &'a dyn StackControlPlane, services: &'a [String], output_dir: impl Into<PathBuf>) -> Self {
        Self {
            plane,
            services,
            output_dir: output_dir.into(),
        }
    }

    fn logs_dir(&self) -> PathBuf {
        self.output_dir.join(LOGS_DIR)
    }

    /// Collect stack diagnostics, plus the reports of a test run if one happened.
    pub async fn collect(&self, test_run: Option<&TestRunResult>) -> Vec<Artifact> {
        let mut artifacts = Vec::new();

        if let Err(e) = std::fs::create_dir_all(self.logs_dir()) {
            warn!("Could not create {}: {}", self.logs_dir().display(), e);
            return artifacts;
        }

        let mut statuses = Vec::with_capacity(self.services.len());
        for service in self.services {
            match self.plane.logs(service, None).await {
                Ok(logs) => self.save(&mut artifacts, ArtifactKind::ServiceLog, &format!("{}.log", service), &logs),
                Err(e) => warn!("Could not collect logs of {}: {}", service, e),
            }
            match self.plane.inspect(service).await {
                Ok(json) => self.save(
                    &mut artifacts,
                    ArtifactKind::ServiceInspect,
                    &format!("{}_inspect.json", service),
                    &json,
                ),
                Err(e) => warn!("Could not inspect {}: {}", service, e),
            }
            let health = self.plane.health(service).await.unwrap_or(ServiceHealth::Unknown);
            statuses.push(format!("{}: {}", service, health));
        }

        match self.plane.runtime_version().await {
            Ok(v) => self.save(&mut artifacts, ArtifactKind::RuntimeVersion, "docker_version.txt", &v),
            Err(e) => warn!("Could not collect runtime version: {}", e),
        }
        match self.plane.runtime_info().await {
            Ok(i) => self.save(&mut artifacts, ArtifactKind::RuntimeInfo, "docker_info.txt", &i),
            Err(e) => warn!("Could not collect runtime info: {}", e),
        }

        let status = format!(
            "Collected at {}\n{}\n",
            Utc::now().to_rfc3339(),
            statuses.join("\n")
        );
        self.save(&mut artifacts, ArtifactKind::StackStatus, "stack_status.txt", &status);

        if let Some(run) = test_run {
            for attempt in &run.attempts {
                for path in attempt.reports.paths() {
                    if path.exists() {
                        artifacts.push(Artifact::new(ArtifactKind::TestReport, path.to_path_buf()));
                    } else {
                        debug!("Report not produced: {}", path.display());
                    }
                }
            }
        }

        info!(
            "Collected {} artifact(s) in {}",
            artifacts.len(),
            self.output_dir.display()
        );
        artifacts
    }

    fn save(&self, artifacts: &mut Vec<Artifact>, kind: ArtifactKind, file_name: &str, content: &str) {
        match write_unique(&self.logs_dir(), file_name, content) {
            Ok(path) => {
                debug!("Saved {}", path.display());
                artifacts.push(Artifact::new(kind, path));
            }
            Err(e) => warn!("Could not save {}: {}", file_name, e),
        }
    }
}

/// Write `content` to `dir/file_name`, adding `_1`, `_2`, ... before the
/// extension when the name is taken. Existing files are never replaced.
pub fn write_unique(dir: &Path, file_name: &str, content: &str) -> CoreResult<PathBuf> {
    let (stem, ext) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (file_name, None),
    };

    let mut n = 0u32;
    loop {
        let candidate = match (n, ext) {
            (0, _) => file_name.to_string(),
            (_, Some(ext)) => format!("{}_{}.{}", stem, n, ext),
            (_, None) => format!("{}_{}", stem, n),
        };
        let path = dir.join(candidate);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(content.as_bytes())?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
