//! End-to-end validation runs.
//!
//! A run synthesises the Terraform configuration, provisions the instances,
//! writes the hand-off artifact, runs the test suite against every host, and
//! tears everything down. Teardown is attempted whatever happened before it;
//! when it fails after an earlier failure, the teardown error is appended to
//! the primary message so neither is lost.

use std::fmt::Display;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::builder::HostnameSource;
use crate::config::ValidatorConfig;
use crate::instance::{self, HandoffError};
use crate::process::CommandRunner;
use crate::suite::{SuiteError, SuiteRunner};
use crate::terraform::{LifecycleError, SynthesisError, TerraformConfigurator, TerraformController};

/// Errors surfaced by a validation run.
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// Raised when the configuration cannot be synthesised.
    #[error("failed to configure infrastructure: {message}")]
    Configure {
        /// Human-readable description of the failure.
        message: String,
        /// Underlying synthesis error.
        #[source]
        source: SynthesisError,
    },
    /// Raised when provisioning or instance extraction fails.
    #[error("failed to deploy infrastructure: {message}")]
    Deploy {
        /// Human-readable description of the failure.
        message: String,
        /// Underlying lifecycle error.
        #[source]
        source: LifecycleError,
    },
    /// Raised when the hand-off artifact cannot be written.
    #[error("failed to hand off instances: {message}")]
    Handoff {
        /// Human-readable description of the failure.
        message: String,
        /// Underlying hand-off error.
        #[source]
        source: HandoffError,
    },
    /// Raised when the test suite cannot be run.
    #[error("failed to run tests: {message}")]
    Suite {
        /// Human-readable description of the failure.
        message: String,
        /// Underlying suite error.
        #[source]
        source: SuiteError,
    },
    /// Raised when infrastructure cannot be destroyed.
    #[error("failed to destroy infrastructure: {0}")]
    Teardown(#[source] LifecycleError),
    /// Raised when generated files cannot be removed.
    #[error("failed to remove generated files: {0}")]
    Cleanup(String),
}

impl ValidatorError {
    fn with_teardown_note(self, teardown: &Self) -> Self {
        match self {
            Self::Configure { message, source } => Self::Configure {
                message: append_teardown_note(message, Some(teardown)),
                source,
            },
            Self::Deploy { message, source } => Self::Deploy {
                message: append_teardown_note(message, Some(teardown)),
                source,
            },
            Self::Handoff { message, source } => Self::Handoff {
                message: append_teardown_note(message, Some(teardown)),
                source,
            },
            Self::Suite { message, source } => Self::Suite {
                message: append_teardown_note(message, Some(teardown)),
                source,
            },
            other @ (Self::Teardown(_) | Self::Cleanup(_)) => other,
        }
    }
}

/// Inputs of a single validation run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationRequest {
    /// Resource specification document.
    pub resources_file: Utf8PathBuf,
    /// JUnit XML report destination; the HTML report is written beside it.
    pub output_file: Utf8PathBuf,
    /// Test selection expression passed to the runner.
    pub filter: Option<String>,
    /// Run one worker per instance with retries.
    pub parallel: bool,
    /// Verbose runner output; keeps the hand-off artifact after the run.
    pub debug: bool,
}

/// Runs validation end to end with separate runners for Terraform and the
/// test suite.
pub struct CloudImageValidator<T, S> {
    config: ValidatorConfig,
    terraform_runner: T,
    suite_runner: S,
    hostnames: Option<Rc<dyn HostnameSource>>,
}

impl<T, S> CloudImageValidator<T, S>
where
    T: CommandRunner + Clone,
    S: CommandRunner + Clone,
{
    /// Creates a validator.
    #[must_use]
    pub const fn new(config: ValidatorConfig, terraform_runner: T, suite_runner: S) -> Self {
        Self {
            config,
            terraform_runner,
            suite_runner,
            hostnames: None,
        }
    }

    /// Replaces the hostname source used for generated VM names.
    #[must_use]
    pub fn with_hostnames(mut self, hostnames: Rc<dyn HostnameSource>) -> Self {
        self.hostnames = Some(hostnames);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    fn configurator(&self) -> TerraformConfigurator {
        let configurator = TerraformConfigurator::new(
            self.config.workdir_path(),
            Utf8PathBuf::from(&self.config.ssh_public_key_file),
        );
        match &self.hostnames {
            Some(hostnames) => configurator.with_hostnames(Rc::clone(hostnames)),
            None => configurator,
        }
    }

    fn instances_json(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.config.instances_json)
    }

    /// Runs a validation and returns the test runner's exit code.
    ///
    /// Cleanup always runs once configuration has been attempted.
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorError`] when any phase fails. When cleanup also
    /// fails, its error is appended to the primary message.
    pub fn execute(&self, request: &ValidationRequest) -> Result<i32, ValidatorError> {
        info!(resources = %request.resources_file, "configuring infrastructure");
        let mut configurator = self.configurator();
        if let Err(err) = configurator.configure_from_resources_json(&request.resources_file) {
            let failure = ValidatorError::Configure {
                message: err.to_string(),
                source: err,
            };
            return Err(match remove_configuration(&configurator) {
                Ok(()) => failure,
                Err(cleanup) => failure.with_teardown_note(&cleanup),
            });
        }
        if request.debug {
            if let Err(err) = configurator.print_configuration() {
                warn!(error = %err, "could not print terraform configuration");
            }
        }

        let mut controller = TerraformController::new(
            configurator,
            self.terraform_runner.clone(),
            self.config.terraform_bin.clone(),
        );
        let outcome = self.deploy_and_test(&mut controller, request);
        let cleanup = self.cleanup(&mut controller, request.debug);

        match (outcome, cleanup) {
            (Ok(code), Ok(())) => Ok(code),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(teardown)) => Err(err.with_teardown_note(&teardown)),
        }
    }

    /// Destroys whatever an earlier run left in the working directory and
    /// removes the generated files.
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorError::Teardown`] when Terraform fails to destroy,
    /// or [`ValidatorError::Cleanup`] when files cannot be removed.
    pub fn destroy(&self) -> Result<(), ValidatorError> {
        let mut controller = TerraformController::resume(
            self.configurator(),
            self.terraform_runner.clone(),
            self.config.terraform_bin.clone(),
        );
        self.cleanup(&mut controller, false)
    }

    fn deploy_and_test(
        &self,
        controller: &mut TerraformController<T>,
        request: &ValidationRequest,
    ) -> Result<i32, ValidatorError> {
        info!("deploying infrastructure");
        controller.create_infra().map_err(deploy_error)?;
        let instances = controller.get_instances().map_err(deploy_error)?;
        let provider = controller
            .configurator()
            .cloud_provider()
            .ok_or_else(|| deploy_error(LifecycleError::NotConfigured))?;

        instance::write_instances_json(&self.instances_json(), &instances).map_err(|err| {
            ValidatorError::Handoff {
                message: err.to_string(),
                source: err,
            }
        })?;

        info!(provider = %provider, instances = instances.len(), "running tests");
        let suite = SuiteRunner::new(
            self.suite_runner.clone(),
            self.config.test_runner_bin.clone(),
            provider,
            instances,
            Utf8PathBuf::from(&self.config.ssh_config_file),
        )
        .with_suite_dir(Utf8PathBuf::from(&self.config.suite_dir))
        .parallel(request.parallel)
        .debug(request.debug)
        .with_policy(self.config.rerun_policy());

        suite
            .run_tests(&request.output_file, request.filter.as_deref())
            .map_err(|err| ValidatorError::Suite {
                message: err.to_string(),
                source: err,
            })
    }

    fn cleanup(
        &self,
        controller: &mut TerraformController<T>,
        keep_handoff: bool,
    ) -> Result<(), ValidatorError> {
        info!("cleaning up");
        controller.destroy_infra().map_err(ValidatorError::Teardown)?;
        remove_configuration(controller.configurator())?;
        if !keep_handoff {
            remove_handoff(&self.instances_json())?;
        }
        Ok(())
    }
}

impl<T, S> std::fmt::Debug for CloudImageValidator<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudImageValidator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn deploy_error(err: LifecycleError) -> ValidatorError {
    ValidatorError::Deploy {
        message: err.to_string(),
        source: err,
    }
}

fn remove_configuration(configurator: &TerraformConfigurator) -> Result<(), ValidatorError> {
    configurator
        .remove_configuration()
        .map_err(|err| ValidatorError::Cleanup(err.to_string()))
}

fn remove_handoff(path: &Utf8Path) -> Result<(), ValidatorError> {
    instance::remove_instances_json(path)
        .map(|_| ())
        .map_err(|err| ValidatorError::Cleanup(err.to_string()))
}

fn append_teardown_note<E: Display>(message: String, teardown_error: Option<&E>) -> String {
    if let Some(teardown) = teardown_error {
        format!("{message} (teardown also failed: {teardown})")
    } else {
        message
    }
}

#[cfg(test)]
mod tests;
