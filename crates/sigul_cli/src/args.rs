//! Command-line surface.

use std::path::PathBuf;

use clap::builder::PossibleValuesParser;
use clap::Parser;

use sigul_core::{Category, ConfigOverrides, Mode};

/// sigul-itest - Sigul stack integration test runner
#[derive(Parser, Debug)]
#[command(name = "sigul-itest")]
#[command(version, about = "Build, start and test the Sigul signing stack")]
#[command(long_about = r#"
Brings up the Sigul bridge and server containers, waits for both to report
healthy, runs the integration test suite against them, collects logs and
reports, and tears the stack down again.

Every option falls back to an environment variable and then to a default:
  SIGUL_TEST_MODE, SIGUL_TEST_TIMEOUT, SIGUL_TEST_PARALLEL,
  SIGUL_TEST_VERBOSE, SIGUL_TEST_OUTPUT_DIR, SIGUL_TEST_RETRY_COUNT,
  SIGUL_BUILD_NO_CACHE, SIGUL_PYTHON, SIGUL_*_IMAGE

EXIT CODES:
  0   - All tests passed
  N   - Exit code of the final test attempt
  64  - Configuration or usage error
  65  - Dependency provisioning failed
  66  - Stack failed to build, start or become healthy
  124 - Final test attempt timed out
  130 - Interrupted
  1   - Unexpected internal error
"#)]
pub struct Cli {
    /// Run in local mode (user-site installs when no virtualenv is active)
    #[arg(long, conflicts_with = "ci")]
    pub local: bool,

    /// Run in CI mode (default when a CI environment is detected)
    #[arg(long)]
    pub ci: bool,

    /// Rebuild the service images before starting the stack
    #[arg(long)]
    pub build: bool,

    /// Leave the stack running after the run
    #[arg(long)]
    pub no_cleanup: bool,

    /// Verbose test output and debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Run tests in parallel when the plugin is available
    #[arg(long)]
    pub parallel: bool,

    /// Skip dependency installation (capabilities are still probed)
    #[arg(long)]
    pub skip_install: bool,

    /// Test category to run
    #[arg(long, value_parser = PossibleValuesParser::new(category_names()))]
    pub category: Option<String>,

    /// Directory for logs and reports
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Per-attempt timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Extra attempts after a failed test run
    #[arg(long)]
    pub retry_count: Option<u32>,

    /// Repository root the stack and tests run from
    #[arg(long)]
    pub project_root: Option<PathBuf>,

    /// Compose file, relative to the project root
    #[arg(long)]
    pub compose_file: Option<PathBuf>,

    /// Compose project name
    #[arg(long)]
    pub project_name: Option<String>,

    /// Test-suite entry point, relative to the project root
    #[arg(long)]
    pub test_path: Option<PathBuf>,
}

fn category_names() -> Vec<&'static str> {
    Category::all().iter().map(Category::as_str).collect()
}

impl Cli {
    pub fn mode(&self) -> Option<Mode> {
        if self.ci {
            Some(Mode::Ci)
        } else if self.local {
            Some(Mode::Local)
        } else {
            None
        }
    }

    /// Explicit settings for the configuration resolver.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            mode: self.mode(),
            build: self.build,
            no_cleanup: self.no_cleanup,
            verbose: self.verbose,
            parallel: self.parallel,
            skip_install: self.skip_install,
            category: self.category.clone(),
            output_dir: self.output_dir.clone(),
            timeout_seconds: self.timeout,
            retry_count: self.retry_count,
            project_root: self.project_root.clone(),
            compose_file: self.compose_file.clone(),
            project_name: self.project_name.clone(),
            test_path: self.test_path.clone(),
        }
    }
}
