//! Process environment snapshot and execution-context detection.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::config::Mode;
use crate::error::{CoreError, CoreResult};

/// Variables whose presence marks a CI execution context.
pub const CI_INDICATORS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "JENKINS_URL",
    "BUILDKITE",
    "CIRCLECI",
    "TRAVIS",
    "TF_BUILD",
];

/// Variables whose presence marks an isolated Python environment.
pub const ISOLATION_INDICATORS: &[&str] = &["VIRTUAL_ENV", "CONDA_PREFIX"];

/// Immutable copy of the environment, captured once at startup.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        Self::from_pairs(std::env::vars())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Value of a variable; empty values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Parse a boolean variable.
    pub fn flag(&self, key: &str) -> CoreResult<Option<bool>> {
        self.get(key)
            .map(|v| {
                parse_bool(v).ok_or_else(|| {
                    CoreError::Configuration(format!(
                        "{} must be a boolean (true/false/1/0/yes/no), got '{}'",
                        key, v
                    ))
                })
            })
            .transpose()
    }

    /// Parse a numeric variable.
    pub fn number<T: FromStr>(&self, key: &str) -> CoreResult<Option<T>> {
        self.get(key)
            .map(|v| {
                v.trim().parse::<T>().map_err(|_| {
                    CoreError::Configuration(format!("{} must be a non-negative integer, got '{}'", key, v))
                })
            })
            .transpose()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Decide the execution context from well-known CI indicators.
///
/// An indicator explicitly set to a false value (`CI=false`) does not count.
pub fn detect_mode(env: &EnvSnapshot) -> Mode {
    let is_ci = CI_INDICATORS
        .iter()
        .filter_map(|key| env.get(key))
        .any(|value| parse_bool(value) != Some(false));

    if is_ci {
        Mode::Ci
    } else {
        Mode::Local
    }
}

/// Whether a virtualenv or conda environment is active.
pub fn python_isolated(env: &EnvSnapshot) -> bool {
    ISOLATION_INDICATORS.iter().any(|key| env.get(key).is_some())
}
