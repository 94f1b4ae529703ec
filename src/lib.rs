//! Core library for the cloudval image validation tool.
//!
//! A JSON resource specification names a cloud provider and the instances to
//! boot. The crate compiles it into Terraform JSON configuration, drives
//! Terraform through init, apply, show and destroy, normalises the resulting
//! state into instance descriptors, and hands those to an external test
//! runner (validate → synthesise → apply → extract → test → destroy).

pub mod builder;
pub mod config;
pub mod files;
pub mod graph;
pub mod instance;
pub mod process;
pub mod spec;
pub mod suite;
pub mod terraform;
pub mod test_support;
pub mod validator;

pub use builder::{
    AwsConfigBuilder, AzureConfigBuilder, BuildContext, BuildError, BuilderRegistry,
    ConfigBuilder, HostnameSource, RandomHostnames,
};
pub use config::{ConfigError, ValidatorConfig};
pub use graph::{GraphError, ProviderGraph, Resource, ResourceGraph, ResourceRef};
pub use instance::{HandoffError, InstanceDescriptor, Instances, ProviderDetails};
pub use process::{
    CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError, StreamingCommandRunner,
};
pub use spec::{CloudProvider, InstanceSpec, ResourceSpec, SpecError};
pub use suite::{RerunPolicy, SuiteError, SuiteRunner};
pub use terraform::{
    ExtractionError, LifecycleError, LifecycleState, SynthesisError, TerraformConfigurator,
    TerraformController,
};
pub use validator::{CloudImageValidator, ValidationRequest, ValidatorError};
