//! Provider-specific configuration builders.
//!
//! A [`ConfigBuilder`] compiles a [`ResourceSpec`] into a [`ProviderGraph`]
//! and a [`ResourceGraph`]. Builders are selected through a
//! [`BuilderRegistry`] keyed on [`CloudProvider`], so adding a cloud means
//! registering a factory rather than editing the synthesiser.

use std::collections::BTreeMap;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::graph::{GraphError, ProviderGraph, ResourceGraph};
use crate::spec::{CloudProvider, ResourceSpec, SpecError};

mod aws;
mod azure;

pub use aws::AwsConfigBuilder;
pub use azure::{AZURE_DNS_SUFFIX, AzureConfigBuilder, AzureNetworkResource, normalize_location};

/// Errors raised while compiling resource graphs.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BuildError {
    /// Raised when the specification is inconsistent with the builder.
    #[error(transparent)]
    Spec(#[from] SpecError),
    /// Raised when the resulting graph would violate an invariant.
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Raised when an instance targets a region with no provider block.
    #[error("instance '{instance}' targets {plugin} region '{region}' which has no provider entry")]
    MissingProvider {
        /// Instance name.
        instance: String,
        /// Provider plugin name.
        plugin: String,
        /// Region or normalised location.
        region: String,
    },
    /// Raised when no builder is registered for a provider.
    #[error("no configuration builder registered for provider {provider}")]
    UnsupportedProvider {
        /// Provider without a builder.
        provider: CloudProvider,
    },
    /// Raised when a builder receives a specification for another provider.
    #[error("{builder} builder cannot compile a {provider} specification")]
    ProviderMismatch {
        /// Builder's provider.
        builder: CloudProvider,
        /// Specification's provider.
        provider: CloudProvider,
    },
}

/// Plugin source and version pinned in the `required_providers` block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProviderRequirement {
    /// Local plugin name, for example `aws`.
    pub name: &'static str,
    /// Registry source, for example `hashicorp/aws`.
    pub source: &'static str,
    /// Version constraint.
    pub version: &'static str,
}

/// Compiles a resource specification into provider-native graphs.
pub trait ConfigBuilder: std::fmt::Debug {
    /// Provider this builder targets.
    fn provider(&self) -> CloudProvider;

    /// Plugin requirement for the top-level module descriptor.
    fn requirement(&self) -> ProviderRequirement;

    /// Emits one provider block per distinct region or location.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError`] when a region cannot be used as an alias.
    fn build_providers(&self) -> Result<ProviderGraph, BuildError>;

    /// Emits every resource needed to make each instance reachable.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::MissingProvider`] when an instance targets a
    /// region absent from `providers`, or [`BuildError::Graph`] when the graph
    /// would become inconsistent.
    fn build_resources(&self, providers: &ProviderGraph) -> Result<ResourceGraph, BuildError>;
}

/// Source of VM hostnames for providers that generate them.
pub trait HostnameSource {
    /// Returns a fresh hostname.
    fn next_hostname(&self) -> String;
}

/// Generates `az-<6 random characters>-vm` hostnames.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomHostnames;

impl RandomHostnames {
    /// Number of random characters in each hostname.
    pub const RANDOM_LENGTH: usize = 6;
}

impl HostnameSource for RandomHostnames {
    fn next_hostname(&self) -> String {
        let random: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(Self::RANDOM_LENGTH)
            .collect();
        format!("az-{random}-vm").to_lowercase()
    }
}

/// Inputs shared by every builder besides the specification itself.
#[derive(Clone)]
pub struct BuildContext {
    ssh_public_key_file: Utf8PathBuf,
    hostnames: Rc<dyn HostnameSource>,
}

impl BuildContext {
    /// Creates a context using random hostnames.
    #[must_use]
    pub fn new(ssh_public_key_file: impl Into<Utf8PathBuf>) -> Self {
        Self {
            ssh_public_key_file: ssh_public_key_file.into(),
            hostnames: Rc::new(RandomHostnames),
        }
    }

    /// Replaces the hostname source.
    #[must_use]
    pub fn with_hostnames(mut self, hostnames: Rc<dyn HostnameSource>) -> Self {
        self.hostnames = hostnames;
        self
    }

    /// Public key installed on every instance.
    #[must_use]
    pub fn ssh_public_key_file(&self) -> &Utf8Path {
        &self.ssh_public_key_file
    }

    /// Returns a copy whose relative public key path is joined onto `base`.
    /// Terraform resolves `file()` paths against its `-chdir` directory, not
    /// the directory the tool was started from.
    #[must_use]
    pub fn anchored_at(&self, base: &Utf8Path) -> Self {
        if self.ssh_public_key_file.is_absolute() {
            return self.clone();
        }
        Self {
            ssh_public_key_file: base.join(&self.ssh_public_key_file),
            hostnames: Rc::clone(&self.hostnames),
        }
    }

    /// Hostname source for generated VM names.
    #[must_use]
    pub fn hostnames(&self) -> Rc<dyn HostnameSource> {
        Rc::clone(&self.hostnames)
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("ssh_public_key_file", &self.ssh_public_key_file)
            .finish_non_exhaustive()
    }
}

/// Constructs a builder for a validated specification.
pub type BuilderFactory =
    fn(&ResourceSpec, &BuildContext) -> Result<Box<dyn ConfigBuilder>, BuildError>;

/// Registry of builder factories keyed by provider.
#[derive(Clone)]
pub struct BuilderRegistry {
    factories: BTreeMap<CloudProvider, BuilderFactory>,
}

impl BuilderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registers or replaces the factory for `provider`.
    #[must_use]
    pub fn register(mut self, provider: CloudProvider, factory: BuilderFactory) -> Self {
        self.factories.insert(provider, factory);
        self
    }

    /// Returns `true` when a factory is registered for `provider`.
    #[must_use]
    pub fn supports(&self, provider: CloudProvider) -> bool {
        self.factories.contains_key(&provider)
    }

    /// Builds the configuration builder for the specification's provider.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::UnsupportedProvider`] when no factory is
    /// registered, or any error raised by the factory.
    pub fn select(
        &self,
        spec: &ResourceSpec,
        context: &BuildContext,
    ) -> Result<Box<dyn ConfigBuilder>, BuildError> {
        let factory =
            self.factories
                .get(&spec.provider())
                .ok_or(BuildError::UnsupportedProvider {
                    provider: spec.provider(),
                })?;
        factory(spec, context)
    }
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        Self::empty()
            .register(CloudProvider::Aws, aws_factory)
            .register(CloudProvider::Azure, azure_factory)
    }
}

impl std::fmt::Debug for BuilderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

fn aws_factory(
    spec: &ResourceSpec,
    context: &BuildContext,
) -> Result<Box<dyn ConfigBuilder>, BuildError> {
    Ok(Box::new(AwsConfigBuilder::new(spec, context)?))
}

fn azure_factory(
    spec: &ResourceSpec,
    context: &BuildContext,
) -> Result<Box<dyn ConfigBuilder>, BuildError> {
    Ok(Box::new(AzureConfigBuilder::new(spec, context)?))
}

fn ensure_provider(builder: CloudProvider, spec: &ResourceSpec) -> Result<(), BuildError> {
    if spec.provider() == builder {
        Ok(())
    } else {
        Err(BuildError::ProviderMismatch {
            builder,
            provider: spec.provider(),
        })
    }
}

fn file_interpolation(path: &Utf8Path) -> String {
    format!("${{file(\"{path}\")}}")
}

#[cfg(test)]
mod tests;
