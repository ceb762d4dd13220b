//! Run configuration resolution.
//!
//! Precedence for every field is: explicit CLI flag, then environment
//! variable, then built-in default. Resolution is a pure function of the
//! parsed overrides and an [`EnvSnapshot`]; nothing here reads the process
//! environment or touches the filesystem.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::environment::{detect_mode, EnvSnapshot};
use crate::error::{CoreError, CoreResult};

pub const ENV_MODE: &str = "SIGUL_TEST_MODE";
pub const ENV_TIMEOUT: &str = "SIGUL_TEST_TIMEOUT";
pub const ENV_PARALLEL: &str = "SIGUL_TEST_PARALLEL";
pub const ENV_VERBOSE: &str = "SIGUL_TEST_VERBOSE";
pub const ENV_OUTPUT_DIR: &str = "SIGUL_TEST_OUTPUT_DIR";
pub const ENV_RETRY_COUNT: &str = "SIGUL_TEST_RETRY_COUNT";
pub const ENV_NO_CACHE: &str = "SIGUL_BUILD_NO_CACHE";
pub const ENV_PYTHON: &str = "SIGUL_PYTHON";

/// Image overrides forwarded to compose and to the test process.
pub const IMAGE_VARIABLES: &[&str] = &[
    "SIGUL_BRIDGE_IMAGE",
    "SIGUL_SERVER_IMAGE",
    "SIGUL_CLIENT_IMAGE",
];

pub const DEFAULT_OUTPUT_DIR: &str = "test-artifacts";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 600;
pub const DEFAULT_COMPOSE_FILE: &str = "docker-compose.sigul.yml";
pub const DEFAULT_PROJECT_NAME: &str = "sigul-sign-docker";
pub const DEFAULT_TEST_PATH: &str = "tests/integration/test_sigul_stack.py";
pub const DEFAULT_PYTHON: &str = "python3";

/// Execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Local,
    Ci,
}

impl FromStr for Mode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "ci" => Ok(Self::Ci),
            other => Err(CoreError::Configuration(format!(
                "unknown mode '{}' (expected local or ci)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Ci => write!(f, "ci"),
        }
    }
}

/// Closed set of test categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    All,
    Infrastructure,
    Certificates,
    Communication,
    Authentication,
    Functional,
}

impl Category {
    /// Get all category variants.
    pub fn all() -> &'static [Category] {
        &[
            Category::All,
            Category::Infrastructure,
            Category::Certificates,
            Category::Communication,
            Category::Authentication,
            Category::Functional,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Infrastructure => "infrastructure",
            Self::Certificates => "certificates",
            Self::Communication => "communication",
            Self::Authentication => "authentication",
            Self::Functional => "functional",
        }
    }

    /// Test class grouping this category's tests, `None` when every test runs.
    pub fn selector(&self) -> Option<&'static str> {
        match self {
            Self::All => None,
            Self::Infrastructure => Some("TestInfrastructure"),
            Self::Certificates => Some("TestCertificates"),
            Self::Communication => Some("TestCommunication"),
            Self::Authentication => Some("TestAuthentication"),
            Self::Functional => Some("TestFunctional"),
        }
    }

    /// Whether a test identifier (`path::Class::test`) belongs to this category.
    ///
    /// Only the class segment counts, so a test elsewhere whose name merely
    /// mentions the category is not selected.
    pub fn selects(&self, test_id: &str) -> bool {
        match self.selector() {
            None => true,
            Some(class) => test_id.split("::").any(|segment| segment == class),
        }
    }
}

impl FromStr for Category {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Category::all().iter().map(|c| c.as_str()).collect();
                CoreError::Configuration(format!(
                    "invalid category '{}' (expected one of: {})",
                    s,
                    valid.join(", ")
                ))
            })
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Values supplied explicitly on the command line.
///
/// Boolean switches can only turn a behaviour on; `false` means "not given".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub mode: Option<Mode>,
    pub build: bool,
    pub no_cleanup: bool,
    pub verbose: bool,
    pub parallel: bool,
    pub skip_install: bool,
    pub category: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub timeout_seconds: Option<u64>,
    pub retry_count: Option<u32>,
    pub project_root: Option<PathBuf>,
    pub compose_file: Option<PathBuf>,
    pub project_name: Option<String>,
    pub test_path: Option<PathBuf>,
}

/// Immutable configuration of one orchestrated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub mode: Mode,
    pub build_containers: bool,
    pub cleanup_after: bool,
    pub verbose: bool,
    pub parallel: bool,
    pub category: Category,
    pub output_dir: PathBuf,
    pub timeout_seconds: u64,
    pub retry_count: u32,
    /// Disable the image build cache
    pub no_cache: bool,
    /// Skip package installation, keep capability probes
    pub skip_install: bool,
    /// Image overrides (`SIGUL_*_IMAGE`)
    pub images: BTreeMap<String, String>,
}

impl RunConfiguration {
    /// Resolve the run configuration.
    pub fn resolve(overrides: &ConfigOverrides, env: &EnvSnapshot) -> CoreResult<Self> {
        let mode = match overrides.mode {
            Some(mode) => mode,
            None => match env.get(ENV_MODE) {
                Some(value) => value.parse()?,
                None => detect_mode(env),
            },
        };

        let category = match &overrides.category {
            Some(name) => name.parse()?,
            None => Category::All,
        };

        let timeout_seconds = match overrides.timeout_seconds {
            Some(t) => t,
            None => env.number(ENV_TIMEOUT)?.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
        };
        if timeout_seconds == 0 {
            return Err(CoreError::Configuration(
                "timeout must be a positive number of seconds".to_string(),
            ));
        }

        let retry_count = match overrides.retry_count {
            Some(n) => n,
            None => env.number(ENV_RETRY_COUNT)?.unwrap_or(0),
        };

        let output_dir = overrides
            .output_dir
            .clone()
            .or_else(|| env.get(ENV_OUTPUT_DIR).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let images = IMAGE_VARIABLES
            .iter()
            .filter_map(|key| env.get(key).map(|v| (key.to_string(), v.to_string())))
            .collect();

        Ok(Self {
            mode,
            build_containers: overrides.build,
            cleanup_after: !overrides.no_cleanup,
            verbose: overrides.verbose || env.flag(ENV_VERBOSE)?.unwrap_or(false),
            parallel: overrides.parallel || env.flag(ENV_PARALLEL)?.unwrap_or(false),
            category,
            output_dir,
            timeout_seconds,
            retry_count,
            no_cache: env.flag(ENV_NO_CACHE)?.unwrap_or(false),
            skip_install: overrides.skip_install,
            images,
        })
    }

    /// Re-root a relative output directory at `base`.
    ///
    /// The test tool runs from the project root while artifacts are written
    /// from the caller's directory; an absolute path keeps both in one place.
    pub fn anchored_at(mut self, base: &Path) -> Self {
        if self.output_dir.is_relative() {
            self.output_dir = base.join(&self.output_dir);
        }
        self
    }

    /// Total attempts the test phase may make.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

/// Filesystem locations and stack identity, resolved once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    /// Directory compose and the test tool run from
    pub project_root: PathBuf,
    /// Compose file, relative to the project root unless absolute
    pub compose_file: PathBuf,
    /// Compose project name identifying the stack instance
    pub project_name: String,
    /// Test-suite entry point, relative to the project root unless absolute
    pub test_path: PathBuf,
    /// Python interpreter used for pip and pytest
    pub python: String,
}

impl Paths {
    pub fn resolve(overrides: &ConfigOverrides, env: &EnvSnapshot) -> Self {
        Self {
            project_root: overrides
                .project_root
                .clone()
                .unwrap_or_else(|| PathBuf::from(".")),
            compose_file: overrides
                .compose_file
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_COMPOSE_FILE)),
            project_name: overrides
                .project_name
                .clone()
                .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string()),
            test_path: overrides
                .test_path
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TEST_PATH)),
            python: env.get(ENV_PYTHON).unwrap_or(DEFAULT_PYTHON).to_string(),
        }
    }

    fn rooted(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    pub fn compose_file_path(&self) -> PathBuf {
        self.rooted(&self.compose_file)
    }

    pub fn test_path_full(&self) -> PathBuf {
        self.rooted(&self.test_path)
    }

    /// Check that the compose file and test entry point exist.
    pub fn validate(&self) -> CoreResult<()> {
        for (what, path) in [
            ("compose file", self.compose_file_path()),
            ("test suite", self.test_path_full()),
        ] {
            if !path.exists() {
                return Err(CoreError::Configuration(format!(
                    "{} not found: {}",
                    what,
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> EnvSnapshot {
        EnvSnapshot::from_pairs(pairs.iter().map(|(k, v)| (*k, *v)))
    }

    #[test]
    fn test_defaults() {
        let config = RunConfiguration::resolve(&ConfigOverrides::default(), &env(&[])).unwrap();
        assert_eq!(config.mode, Mode::Local);
        assert!(!config.build_containers);
        assert!(config.cleanup_after);
        assert!(!config.verbose);
        assert!(!config.parallel);
        assert_eq!(config.category, Category::All);
        assert_eq!(config.output_dir, PathBuf::from(DEFAULT_OUTPUT_DIR));
        assert_eq!(config.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(config.retry_count, 0);
    }

    #[test]
    fn test_flag_beats_env_beats_default() {
        let e = env(&[(ENV_TIMEOUT, "90"), (ENV_RETRY_COUNT, "2"), ("CI", "true")]);

        let from_env = RunConfiguration::resolve(&ConfigOverrides::default(), &e).unwrap();
        assert_eq!(from_env.timeout_seconds, 90);
        assert_eq!(from_env.retry_count, 2);
        assert_eq!(from_env.mode, Mode::Ci);

        let overrides = ConfigOverrides {
            timeout_seconds: Some(30),
            retry_count: Some(0),
            mode: Some(Mode::Local),
            ..Default::default()
        };
        let from_flags = RunConfiguration::resolve(&overrides, &e).unwrap();
        assert_eq!(from_flags.timeout_seconds, 30);
        assert_eq!(from_flags.retry_count, 0);
        assert_eq!(from_flags.mode, Mode::Local);
    }

    #[test]
    fn test_mode_env_beats_detection() {
        let e = env(&[(ENV_MODE, "local"), ("GITHUB_ACTIONS", "true")]);
        let config = RunConfiguration::resolve(&ConfigOverrides::default(), &e).unwrap();
        assert_eq!(config.mode, Mode::Local);
    }

    #[test]
    fn test_env_switches() {
        let e = env(&[(ENV_PARALLEL, "1"), (ENV_VERBOSE, "yes"), (ENV_NO_CACHE, "true")]);
        let config = RunConfiguration::resolve(&ConfigOverrides::default(), &e).unwrap();
        assert!(config.parallel);
        assert!(config.verbose);
        assert!(config.no_cache);
    }

    #[test]
    fn test_invalid_category_fails() {
        let overrides = ConfigOverrides {
            category: Some("everything".to_string()),
            ..Default::default()
        };
        let err = RunConfiguration::resolve(&overrides, &env(&[])).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
        assert!(err.to_string().contains("certificates"));
    }

    #[test]
    fn test_zero_timeout_fails() {
        let overrides = ConfigOverrides {
            timeout_seconds: Some(0),
            ..Default::default()
        };
        assert!(RunConfiguration::resolve(&overrides, &env(&[])).is_err());
    }

    #[test]
    fn test_malformed_env_number_fails() {
        let e = env(&[(ENV_TIMEOUT, "soon")]);
        assert!(RunConfiguration::resolve(&ConfigOverrides::default(), &e).is_err());
    }

    #[test]
    fn test_no_cleanup_flag() {
        let overrides = ConfigOverrides {
            no_cleanup: true,
            ..Default::default()
        };
        let config = RunConfiguration::resolve(&overrides, &env(&[])).unwrap();
        assert!(!config.cleanup_after);
    }

    #[test]
    fn test_image_overrides_collected() {
        let e = env(&[("SIGUL_BRIDGE_IMAGE", "bridge:ci"), ("SIGUL_UNRELATED", "x")]);
        let config = RunConfiguration::resolve(&ConfigOverrides::default(), &e).unwrap();
        assert_eq!(config.images.len(), 1);
        assert_eq!(config.images["SIGUL_BRIDGE_IMAGE"], "bridge:ci");
    }

    #[test]
    fn test_category_selection() {
        assert!(Category::Certificates.selects("TestCertificates::test_certificate_validity"));
        assert!(Category::Certificates.selects(
            "tests/integration/test_sigul_stack.py::TestCertificates::test_nss_database_exists"
        ));
        assert!(!Category::Certificates.selects("TestInfrastructure::test_containers_running"));
        assert!(!Category::Certificates.selects("TestErrorConditions::test_missing_certificates_handling"));
        assert!(!Category::Authentication.selects(
            "TestFunctional::test_client_certificate_authentication_attempt"
        ));
        assert!(Category::All.selects("TestFunctional::test_admin_user_creation"));
        assert!(Category::All.selects("TestErrorConditions::test_missing_certificates_handling"));
        assert_eq!(Category::All.selector(), None);
        assert_eq!(Category::Certificates.selector(), Some("TestCertificates"));
    }

    #[test]
    fn test_category_parse_is_exact() {
        assert_eq!("functional".parse::<Category>().unwrap(), Category::Functional);
        assert!("Functional".parse::<Category>().is_err());
    }

    #[test]
    fn test_max_attempts_saturates() {
        let overrides = ConfigOverrides {
            retry_count: Some(u32::MAX),
            ..Default::default()
        };
        let config = RunConfiguration::resolve(&overrides, &env(&[])).unwrap();
        assert_eq!(config.max_attempts(), u32::MAX);

        let config = RunConfiguration::resolve(&ConfigOverrides::default(), &env(&[])).unwrap();
        assert_eq!(config.max_attempts(), 1);
    }

    #[test]
    fn test_relative_output_dir_is_anchored() {
        let config = RunConfiguration::resolve(&ConfigOverrides::default(), &env(&[]))
            .unwrap()
            .anchored_at(Path::new("/home/ci/work"));
        assert_eq!(config.output_dir, PathBuf::from("/home/ci/work/test-artifacts"));

        let overrides = ConfigOverrides {
            output_dir: Some(PathBuf::from("/var/artifacts")),
            ..Default::default()
        };
        let config = RunConfiguration::resolve(&overrides, &env(&[]))
            .unwrap()
            .anchored_at(Path::new("/home/ci/work"));
        assert_eq!(config.output_dir, PathBuf::from("/var/artifacts"));
    }

    #[test]
    fn test_paths_rooting() {
        let overrides = ConfigOverrides {
            project_root: Some(PathBuf::from("/srv/sigul")),
            ..Default::default()
        };
        let paths = Paths::resolve(&overrides, &env(&[(ENV_PYTHON, "python3.12")]));
        assert_eq!(
            paths.compose_file_path(),
            PathBuf::from("/srv/sigul/docker-compose.sigul.yml")
        );
        assert_eq!(paths.project_name, DEFAULT_PROJECT_NAME);
        assert_eq!(paths.python, "python3.12");
    }

    #[test]
    fn test_paths_validate_missing_compose_file() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = ConfigOverrides {
            project_root: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let paths = Paths::resolve(&overrides, &env(&[]));
        let err = paths.validate().unwrap_err();
        assert!(err.to_string().contains("compose file"));
    }
}
