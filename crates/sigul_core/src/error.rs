//! Error types for the core module.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// CI-friendly exit codes.
///
/// Test failures are not listed: the final attempt's exit code is
/// propagated verbatim.
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL_ERROR: i32 = 1;
    pub const CONFIGURATION_ERROR: i32 = 64;
    pub const PROVISIONING_ERROR: i32 = 65;
    pub const INFRASTRUCTURE_ERROR: i32 = 66;
    pub const TEST_TIMEOUT: i32 = 124;
    pub const INTERRUPTED: i32 = 130;
}

/// Errors that can occur during an orchestrated run.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Infrastructure failure: {0}")]
    Infrastructure(String),

    #[error("Interrupted before the run completed")]
    Interrupted,

    #[error("Runner error: {0}")]
    Runner(#[from] sigul_runner::RunnerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => ExitCodes::CONFIGURATION_ERROR,
            Self::Provisioning(_) => ExitCodes::PROVISIONING_ERROR,
            Self::Infrastructure(_) => ExitCodes::INFRASTRUCTURE_ERROR,
            Self::Interrupted => ExitCodes::INTERRUPTED,
            Self::Runner(_) | Self::Io(_) => ExitCodes::GENERAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_stage() {
        let codes = [
            CoreError::Configuration("x".into()).exit_code(),
            CoreError::Provisioning("x".into()).exit_code(),
            CoreError::Infrastructure("x".into()).exit_code(),
            CoreError::Interrupted.exit_code(),
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(codes.iter().all(|c| *c != 0));
    }
}
