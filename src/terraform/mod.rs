//! Terraform configuration synthesis and lifecycle control.
//!
//! [`TerraformConfigurator`] turns a resource specification into the three
//! `*.tf.json` fragments Terraform reads from its working directory.
//! [`TerraformController`] then drives `init`, `apply`, `show` and `destroy`
//! against that directory and normalises the resulting state into
//! [`InstanceDescriptor`](crate::instance::InstanceDescriptor) records.

use thiserror::Error;

use crate::builder::BuildError;
use crate::files::FileError;
use crate::spec::{CloudProvider, SpecError};

mod configurator;
mod controller;
mod state;

pub use configurator::{TerraformConfigurator, default_username};
pub use controller::{LifecycleState, PhaseOutcome, TerraformController, TerraformPhase};
pub use state::{
    StateModule, StateResource, StateValues, TerraformState, azure_image, extract_aws_instances,
    extract_azure_instances,
};

/// Module descriptor file name.
pub const MAIN_FILE: &str = "main.tf.json";
/// Provider graph file name.
pub const PROVIDERS_FILE: &str = "providers.tf.json";
/// Resource graph file name.
pub const RESOURCES_FILE: &str = "resources.tf.json";
/// Terraform version constraint written into the module descriptor.
pub const TERRAFORM_REQUIRED_VERSION: &str = ">= 0.14.9";

/// Errors raised while synthesising or removing configuration files.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Raised when the resource specification is invalid.
    #[error(transparent)]
    Spec(#[from] SpecError),
    /// Raised when the selected builder cannot compile the specification.
    #[error(transparent)]
    Build(#[from] BuildError),
    /// Raised when a configuration file cannot be written, read or removed.
    #[error(transparent)]
    File(#[from] FileError),
    /// Raised when a document cannot be serialised.
    #[error("failed to serialise {file}: {message}")]
    Serialize {
        /// File being rendered.
        file: &'static str,
        /// Serializer error message.
        message: String,
    },
    /// Raised when the invocation directory needed to anchor a relative
    /// public key path cannot be determined.
    #[error("cannot resolve relative SSH public key path {path}: {message}")]
    KeyPath {
        /// Configured key path.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Raised when an operation needs a specification but none was loaded.
    #[error("no resource specification has been configured")]
    NotConfigured,
    /// Raised when a reverse lookup names an instance absent from the
    /// specification.
    #[error("instance '{name}' is not declared in the resource specification")]
    UnknownInstance {
        /// Logical name that was looked up.
        name: String,
    },
}

/// Errors raised while extracting instance descriptors from Terraform state.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ExtractionError {
    /// Raised when `terraform show -json` output is not valid state JSON.
    #[error("failed to parse terraform state: {message}")]
    Parse {
        /// Parser error message.
        message: String,
    },
    /// Raised when a state resource lacks a field the hand-off requires.
    #[error("state resource {address} is missing required field '{field}'")]
    MissingField {
        /// Resource address.
        address: String,
        /// Missing field.
        field: &'static str,
    },
    /// Raised when the username of an instance cannot be recovered.
    #[error("cannot resolve username for {name}: {message}")]
    UnknownInstance {
        /// Logical resource name.
        name: String,
        /// Lookup failure.
        message: String,
    },
    /// Raised when the state contains no instances for the active provider.
    #[error("terraform state contains no {provider} instances")]
    NoInstances {
        /// Active provider.
        provider: CloudProvider,
    },
    /// Raised when no provider is active at extraction time.
    #[error("no cloud provider is configured; cannot extract instances")]
    UnsupportedProvider,
}

/// Errors raised while driving the Terraform lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Raised when an operation is attempted from a state that forbids it.
    #[error("cannot {operation} while infrastructure is {from}")]
    InvalidTransition {
        /// Current lifecycle state.
        from: LifecycleState,
        /// Attempted operation.
        operation: &'static str,
    },
    /// Raised when Terraform exits with a non-zero status.
    #[error("terraform {phase} failed with status {status_text}: {stderr}")]
    PhaseFailed {
        /// Failed phase.
        phase: TerraformPhase,
        /// Rendered exit status.
        status_text: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when Terraform cannot be launched at all.
    #[error("terraform {phase} could not be launched: {message}")]
    Launch {
        /// Phase that was being launched.
        phase: TerraformPhase,
        /// Launch failure.
        message: String,
    },
    /// Raised when instance descriptors cannot be extracted.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// Raised when the controller has no synthesised configuration.
    #[error("terraform configuration has not been synthesised")]
    NotConfigured,
}

#[cfg(test)]
mod tests;
