//! Drives Terraform through init, apply, show and destroy.

use std::ffi::OsString;
use std::fmt;

use tracing::{debug, info, warn};

use super::state::{TerraformState, extract_aws_instances, extract_azure_instances};
use super::{ExtractionError, LifecycleError, TerraformConfigurator};
use crate::instance::Instances;
use crate::process::{CommandOutput, CommandRunner, RunnerError, render_command_line};
use crate::spec::CloudProvider;

/// Per-run lifecycle of the provisioned infrastructure.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    /// No configuration has been synthesised.
    Uninitialized,
    /// Configuration files exist; nothing has been applied.
    Configured,
    /// `apply` succeeded.
    Applied,
    /// Instance descriptors were extracted from state.
    Extracted,
    /// Everything was destroyed.
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Configured => "configured",
            Self::Applied => "applied",
            Self::Extracted => "extracted",
            Self::Destroyed => "destroyed",
        })
    }
}

/// Terraform subcommands issued by the controller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TerraformPhase {
    /// `terraform init`.
    Init,
    /// `terraform apply -auto-approve`.
    Apply,
    /// `terraform show --json`.
    Show,
    /// `terraform destroy -auto-approve`.
    Destroy,
    /// `terraform destroy -auto-approve -target=<id>`.
    DestroyTarget,
}

impl fmt::Display for TerraformPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Init => "init",
            Self::Apply => "apply",
            Self::Show => "show",
            Self::Destroy => "destroy",
            Self::DestroyTarget => "targeted destroy",
        })
    }
}

/// Typed result of one Terraform invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PhaseOutcome {
    /// The tool exited with status zero.
    Succeeded(CommandOutput),
    /// The tool ran and reported an error.
    Failed {
        /// Exit code, when the process reported one.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// The tool could not be started.
    LaunchFailed {
        /// Launch failure.
        message: String,
    },
}

impl From<Result<CommandOutput, RunnerError>> for PhaseOutcome {
    fn from(result: Result<CommandOutput, RunnerError>) -> Self {
        match result {
            Ok(output) if output.is_success() => Self::Succeeded(output),
            Ok(output) => Self::Failed {
                status: output.code,
                stderr: output.stderr,
            },
            Err(err) => Self::LaunchFailed {
                message: err.to_string(),
            },
        }
    }
}

impl PhaseOutcome {
    /// Converts the outcome into the output of a successful phase.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::PhaseFailed`] or [`LifecycleError::Launch`]
    /// for unsuccessful outcomes.
    pub fn into_result(self, phase: TerraformPhase) -> Result<CommandOutput, LifecycleError> {
        match self {
            Self::Succeeded(output) => Ok(output),
            Self::Failed { status, stderr } => Err(LifecycleError::PhaseFailed {
                phase,
                status_text: status
                    .map_or_else(|| String::from("unknown"), |code| code.to_string()),
                stderr: stderr.trim().to_owned(),
            }),
            Self::LaunchFailed { message } => Err(LifecycleError::Launch { phase, message }),
        }
    }
}

/// Runs Terraform against a synthesised configuration and extracts instance
/// descriptors from its state.
#[derive(Debug)]
pub struct TerraformController<R: CommandRunner> {
    configurator: TerraformConfigurator,
    runner: R,
    terraform_bin: String,
    state: LifecycleState,
    initialized: bool,
}

impl<R: CommandRunner> TerraformController<R> {
    /// Creates a controller for a fresh run. The controller starts in
    /// [`LifecycleState::Configured`] when `configurator` has synthesised
    /// files and [`LifecycleState::Uninitialized`] otherwise.
    #[must_use]
    pub fn new(
        configurator: TerraformConfigurator,
        runner: R,
        terraform_bin: impl Into<String>,
    ) -> Self {
        let state = if configurator.is_configured() {
            LifecycleState::Configured
        } else {
            LifecycleState::Uninitialized
        };
        Self {
            configurator,
            runner,
            terraform_bin: terraform_bin.into(),
            state,
            initialized: false,
        }
    }

    /// Creates a controller for a working directory applied by an earlier
    /// run, so its infrastructure can be torn down.
    #[must_use]
    pub fn resume(
        configurator: TerraformConfigurator,
        runner: R,
        terraform_bin: impl Into<String>,
    ) -> Self {
        Self {
            state: LifecycleState::Applied,
            initialized: true,
            ..Self::new(configurator, runner, terraform_bin)
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }

    /// Configurator owning the synthesised files.
    #[must_use]
    pub const fn configurator(&self) -> &TerraformConfigurator {
        &self.configurator
    }

    /// Runs `init` then `apply -auto-approve`. Either failing aborts the run.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] unless the controller is
    /// configured, or the failure of the first phase that did not succeed.
    pub fn create_infra(&mut self) -> Result<(), LifecycleError> {
        self.require(&[LifecycleState::Configured], "create infrastructure")?;

        info!(workdir = %self.configurator.workdir(), "initialising terraform");
        self.run_phase(TerraformPhase::Init, &["init"])?;
        self.initialized = true;

        info!(workdir = %self.configurator.workdir(), "applying terraform configuration");
        self.run_phase(TerraformPhase::Apply, &["apply", "-auto-approve"])?;
        self.state = LifecycleState::Applied;
        Ok(())
    }

    /// Queries state with `show --json` and extracts a descriptor for every
    /// instance of the active provider.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] before a successful
    /// apply, a phase error when `show` fails, or
    /// [`LifecycleError::Extraction`] when the state cannot be normalised.
    pub fn get_instances(&mut self) -> Result<Instances, LifecycleError> {
        self.require(
            &[LifecycleState::Applied, LifecycleState::Extracted],
            "extract instances",
        )?;
        let provider = self
            .configurator
            .cloud_provider()
            .ok_or(ExtractionError::UnsupportedProvider)?;

        let output = self.run_phase(TerraformPhase::Show, &["show", "--json"])?;
        let state = TerraformState::parse(&output.stdout)?;
        let resources = state.resources();
        let instances = match provider {
            CloudProvider::Aws => extract_aws_instances(resources, |name| {
                self.configurator.get_username_by_instance_name(name)
            })?,
            CloudProvider::Azure => extract_azure_instances(resources)?,
        };

        info!(provider = %provider, instances = instances.len(), "extracted instances");
        self.state = LifecycleState::Extracted;
        Ok(instances)
    }

    /// Destroys a single resource by address.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] unless infrastructure
    /// has been applied, or a phase error when the destroy fails.
    pub fn destroy_resource(&mut self, resource_id: &str) -> Result<(), LifecycleError> {
        self.require(
            &[LifecycleState::Applied, LifecycleState::Extracted],
            "destroy a resource",
        )?;
        info!(resource = resource_id, "destroying resource");
        let target = format!("-target={resource_id}");
        self.run_phase(
            TerraformPhase::DestroyTarget,
            &["destroy", "-auto-approve", target.as_str()],
        )?;
        Ok(())
    }

    /// Destroys everything in the working directory. Reachable from every
    /// state; when Terraform never ran there is nothing to destroy and no
    /// command is issued.
    ///
    /// # Errors
    ///
    /// Returns a phase error when the destroy fails. The controller then
    /// stays in its previous state so the caller can retry.
    pub fn destroy_infra(&mut self) -> Result<(), LifecycleError> {
        if self.state == LifecycleState::Destroyed || !self.initialized {
            debug!(state = %self.state, "nothing to destroy");
            self.state = LifecycleState::Destroyed;
            return Ok(());
        }

        info!(workdir = %self.configurator.workdir(), "destroying infrastructure");
        if let Err(err) = self.run_phase(TerraformPhase::Destroy, &["destroy", "-auto-approve"]) {
            warn!(error = %err, "terraform destroy failed; resources may still exist");
            return Err(err);
        }
        self.state = LifecycleState::Destroyed;
        Ok(())
    }

    fn require(
        &self,
        allowed: &[LifecycleState],
        operation: &'static str,
    ) -> Result<(), LifecycleError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(LifecycleError::InvalidTransition {
                from: self.state,
                operation,
            })
        }
    }

    fn run_phase(
        &self,
        phase: TerraformPhase,
        args: &[&str],
    ) -> Result<CommandOutput, LifecycleError> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(OsString::from(format!("-chdir={}", self.configurator.workdir())));
        argv.extend(args.iter().map(|arg| OsString::from(*arg)));

        debug!(
            phase = %phase,
            command = %render_command_line(&self.terraform_bin, &argv),
            "running terraform"
        );
        let output =
            PhaseOutcome::from(self.runner.run(&self.terraform_bin, &argv)).into_result(phase)?;
        if !output.stdout.is_empty() && phase != TerraformPhase::Show {
            debug!(phase = %phase, "{}", output.stdout.trim_end());
        }
        Ok(output)
    }
}
