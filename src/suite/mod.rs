//! Invocation boundary of the external test runner.
//!
//! The runner receives every provisioned host as `user@dns`, the SSH client
//! configuration, and the report destinations. The tests themselves live
//! outside this crate; only their command line and exit code matter here.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::info;

use crate::files::{self, FileError};
use crate::instance::{HandoffError, Instances, hosts_with_users};
use crate::process::{CommandRunner, RunnerError, render_command_line};
use crate::spec::CloudProvider;

/// Errors raised while running the test suite.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SuiteError {
    /// Raised when the host list cannot be rendered.
    #[error(transparent)]
    Handoff(#[from] HandoffError),
    /// Raised when a stale report cannot be removed.
    #[error(transparent)]
    File(#[from] FileError),
    /// Raised when the runner cannot be launched.
    #[error(transparent)]
    Launch(#[from] RunnerError),
    /// Raised when the runner terminated without an exit code.
    #[error("{program} terminated without an exit code")]
    MissingExitCode {
        /// Runner program.
        program: String,
    },
}

/// Parallelism and retry policy handed to the runner in parallel mode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RerunPolicy {
    /// Upper bound on worker processes.
    pub max_workers: u32,
    /// Reruns allowed for a failing test.
    pub reruns: u32,
    /// Seconds to wait between reruns.
    pub reruns_delay: u32,
    /// Failure output pattern that makes a test eligible for rerun.
    pub pattern: String,
}

impl RerunPolicy {
    /// Default worker cap.
    pub const DEFAULT_MAX_WORKERS: u32 = 40;
    /// Default rerun count.
    pub const DEFAULT_RERUNS: u32 = 3;
    /// Default delay between reruns, in seconds.
    pub const DEFAULT_RERUNS_DELAY: u32 = 5;
    /// Transient connection failures worth retrying.
    pub const DEFAULT_PATTERN: &'static str = "refused|timeout|NoValidConnectionsError";
}

impl Default for RerunPolicy {
    fn default() -> Self {
        Self {
            max_workers: Self::DEFAULT_MAX_WORKERS,
            reruns: Self::DEFAULT_RERUNS,
            reruns_delay: Self::DEFAULT_RERUNS_DELAY,
            pattern: Self::DEFAULT_PATTERN.to_owned(),
        }
    }
}

/// Composes and runs the test runner command for a set of instances.
#[derive(Clone, Debug)]
pub struct SuiteRunner<R: CommandRunner> {
    runner: R,
    program: String,
    provider: CloudProvider,
    instances: Instances,
    ssh_config_file: Utf8PathBuf,
    suite_dir: Utf8PathBuf,
    parallel: bool,
    debug: bool,
    policy: RerunPolicy,
}

impl<R: CommandRunner> SuiteRunner<R> {
    /// Relative path of the suite run against every provider.
    pub const GENERIC_SUITE: &'static str = "generic/test_generic.py";
    /// Relative path of the AWS-specific suite.
    pub const AWS_SUITE: &'static str = "cloud/test_aws.py";

    /// Creates a runner for `instances` provisioned on `provider`.
    #[must_use]
    pub fn new(
        runner: R,
        program: impl Into<String>,
        provider: CloudProvider,
        instances: Instances,
        ssh_config_file: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            provider,
            instances,
            ssh_config_file: ssh_config_file.into(),
            suite_dir: Utf8PathBuf::new(),
            parallel: false,
            debug: false,
            policy: RerunPolicy::default(),
        }
    }

    /// Sets the directory the suite paths are relative to.
    #[must_use]
    pub fn with_suite_dir(mut self, suite_dir: impl Into<Utf8PathBuf>) -> Self {
        self.suite_dir = suite_dir.into();
        self
    }

    /// Enables one worker per instance with the rerun policy.
    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Enables verbose runner output.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Replaces the rerun policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RerunPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Suite files to run: the generic suite always, plus the provider's own
    /// suite when one exists.
    #[must_use]
    pub fn test_suite_paths(&self) -> Vec<Utf8PathBuf> {
        let mut paths = vec![self.suite_dir.join(Self::GENERIC_SUITE)];
        if self.provider == CloudProvider::Aws {
            paths.push(self.suite_dir.join(Self::AWS_SUITE));
        }
        paths
    }

    /// Builds the runner arguments writing JUnit XML to `output` and an HTML
    /// report beside it.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteError::Handoff`] when any instance lacks a username or
    /// public DNS name.
    pub fn compose_command(
        &self,
        output: &Utf8Path,
        filter: Option<&str>,
    ) -> Result<Vec<OsString>, SuiteError> {
        let hosts = hosts_with_users(&self.instances)?;
        let mut args: Vec<OsString> = self
            .test_suite_paths()
            .into_iter()
            .map(|path| OsString::from(path.into_string()))
            .collect();

        args.push(format!("--hosts={hosts}").into());
        args.push("--ssh-config".into());
        args.push(self.ssh_config_file.as_str().into());
        args.push("--junit-xml".into());
        args.push(output.as_str().into());
        args.push("--html".into());
        args.push(output.with_extension("html").into_string().into());

        if let Some(filter) = filter.filter(|filter| !filter.trim().is_empty()) {
            args.push("-k".into());
            args.push(filter.into());
        }

        if self.parallel {
            args.push(format!("--numprocesses={}", self.instances.len()).into());
            args.push(format!("--maxprocesses={}", self.policy.max_workers).into());
            args.push(format!("--only-rerun={}", self.policy.pattern).into());
            args.push("--reruns".into());
            args.push(self.policy.reruns.to_string().into());
            args.push("--reruns-delay".into());
            args.push(self.policy.reruns_delay.to_string().into());
        }

        if self.debug {
            args.push("-v".into());
        }
        Ok(args)
    }

    /// Removes any stale report at `output`, runs the suite, and returns the
    /// runner's exit code.
    ///
    /// # Errors
    ///
    /// Returns [`SuiteError`] when the command cannot be composed or launched,
    /// or terminates without an exit code.
    pub fn run_tests(&self, output: &Utf8Path, filter: Option<&str>) -> Result<i32, SuiteError> {
        files::remove(output)?;
        let args = self.compose_command(output, filter)?;

        info!(
            instances = self.instances.len(),
            command = %render_command_line(&self.program, &args),
            "running test suite"
        );
        let result = self.runner.run(&self.program, &args)?;
        result.code.ok_or_else(|| SuiteError::MissingExitCode {
            program: self.program.clone(),
        })
    }
}
