//! Synthesises the on-disk Terraform configuration.

use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{
    MAIN_FILE, PROVIDERS_FILE, RESOURCES_FILE, SynthesisError, TERRAFORM_REQUIRED_VERSION,
};
use crate::builder::{
    AwsConfigBuilder, AzureConfigBuilder, BuildContext, BuilderRegistry, HostnameSource,
    ProviderRequirement,
};
use crate::files;
use crate::spec::{CloudProvider, ResourceSpec};

/// Selects a builder for the declared provider and writes the module
/// descriptor, provider graph and resource graph into a working directory.
#[derive(Clone, Debug)]
pub struct TerraformConfigurator {
    workdir: Utf8PathBuf,
    context: BuildContext,
    registry: BuilderRegistry,
    spec: Option<ResourceSpec>,
}

impl TerraformConfigurator {
    /// Creates a configurator writing into `workdir` and installing the
    /// public key at `ssh_public_key_file` on every instance.
    #[must_use]
    pub fn new(
        workdir: impl Into<Utf8PathBuf>,
        ssh_public_key_file: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            workdir: workdir.into(),
            context: BuildContext::new(ssh_public_key_file),
            registry: BuilderRegistry::default(),
            spec: None,
        }
    }

    /// Replaces the builder registry.
    #[must_use]
    pub fn with_registry(mut self, registry: BuilderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Replaces the hostname source used by builders that generate names.
    #[must_use]
    pub fn with_hostnames(mut self, hostnames: Rc<dyn HostnameSource>) -> Self {
        self.context = self.context.with_hostnames(hostnames);
        self
    }

    /// Directory receiving the configuration files.
    #[must_use]
    pub fn workdir(&self) -> &Utf8Path {
        &self.workdir
    }

    /// Loaded specification, once configured.
    #[must_use]
    pub const fn spec(&self) -> Option<&ResourceSpec> {
        self.spec.as_ref()
    }

    /// Provider of the loaded specification, once configured.
    #[must_use]
    pub fn cloud_provider(&self) -> Option<CloudProvider> {
        self.spec.as_ref().map(ResourceSpec::provider)
    }

    /// Returns `true` once a configuration has been synthesised.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.spec.is_some()
    }

    /// Paths of the module descriptor, provider graph and resource graph.
    #[must_use]
    pub fn config_paths(&self) -> [Utf8PathBuf; 3] {
        [MAIN_FILE, PROVIDERS_FILE, RESOURCES_FILE].map(|name| self.workdir.join(name))
    }

    /// Loads the resource specification at `path` and synthesises the
    /// configuration for it.
    ///
    /// # Errors
    ///
    /// Returns [`SynthesisError::Spec`] when the document is invalid,
    /// [`SynthesisError::Build`] when no builder can compile it, and
    /// [`SynthesisError::File`] when a file cannot be written.
    pub fn configure_from_resources_json(
        &mut self,
        path: &Utf8Path,
    ) -> Result<(), SynthesisError> {
        let spec = ResourceSpec::load(path)?;
        self.configure_from_spec(spec)
    }

    /// Synthesises the configuration for an already validated specification.
    ///
    /// Nothing is written unless both graphs build successfully.
    ///
    /// # Errors
    ///
    /// Returns [`SynthesisError::KeyPath`] when a relative public key path
    /// cannot be anchored, [`SynthesisError::Build`] when the builder fails, and
    /// [`SynthesisError::File`] or [`SynthesisError::Serialize`] when a file
    /// cannot be rendered or written.
    pub fn configure_from_spec(&mut self, spec: ResourceSpec) -> Result<(), SynthesisError> {
        let context = self.anchored_context()?;
        let builder = self.registry.select(&spec, &context)?;
        let providers = builder.build_providers()?;
        let resources = builder.build_resources(&providers)?;
        let main = module_descriptor(builder.requirement());

        info!(
            provider = %spec.provider(),
            instances = spec.instances().len(),
            resources = resources.len(),
            workdir = %self.workdir,
            "synthesised terraform configuration"
        );

        let [main_path, providers_path, resources_path] = self.config_paths();
        write_document(&main_path, MAIN_FILE, &main)?;
        write_document(&providers_path, PROVIDERS_FILE, &providers.to_document())?;
        write_document(&resources_path, RESOURCES_FILE, &resources.to_document())?;

        self.spec = Some(spec);
        Ok(())
    }

    fn anchored_context(&self) -> Result<BuildContext, SynthesisError> {
        let key = self.context.ssh_public_key_file();
        if key.is_absolute() {
            return Ok(self.context.clone());
        }
        let key_path_error = |message: String| SynthesisError::KeyPath {
            path: key.to_string(),
            message,
        };
        let cwd = std::env::current_dir().map_err(|err| key_path_error(err.to_string()))?;
        let cwd = Utf8PathBuf::from_path_buf(cwd).map_err(|path| {
            key_path_error(format!("{} is not valid UTF-8", path.display()))
        })?;
        Ok(self.context.anchored_at(&cwd))
    }

    /// Recovers the login user of the instance whose name or resource key is
    /// `name`, falling back to the provider's default user.
    ///
    /// # Errors
    ///
    /// Returns [`SynthesisError::NotConfigured`] before configuration, or
    /// [`SynthesisError::UnknownInstance`] when no instance matches.
    pub fn get_username_by_instance_name(&self, name: &str) -> Result<String, SynthesisError> {
        let spec = self.spec.as_ref().ok_or(SynthesisError::NotConfigured)?;
        let instance = spec
            .find_instance(name)
            .ok_or_else(|| SynthesisError::UnknownInstance {
                name: name.to_owned(),
            })?;
        Ok(instance
            .username()
            .unwrap_or_else(|| default_username(spec.provider()))
            .to_owned())
    }

    /// Removes the synthesised files. Missing files are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`SynthesisError::File`] when an existing file cannot be
    /// removed.
    pub fn remove_configuration(&self) -> Result<(), SynthesisError> {
        for path in self.config_paths() {
            if files::remove(&path)? {
                debug!(path = %path, "removed terraform configuration file");
            }
        }
        Ok(())
    }

    /// Logs each synthesised document at debug level.
    ///
    /// # Errors
    ///
    /// Returns [`SynthesisError::File`] when a file cannot be read.
    pub fn print_configuration(&self) -> Result<(), SynthesisError> {
        for path in self.config_paths() {
            let contents = files::read_to_string(&path)?;
            debug!(path = %path, "{contents}");
        }
        Ok(())
    }
}

/// Login user assumed for instances that do not name one.
#[must_use]
pub const fn default_username(provider: CloudProvider) -> &'static str {
    match provider {
        CloudProvider::Aws => AwsConfigBuilder::DEFAULT_USERNAME,
        CloudProvider::Azure => AzureConfigBuilder::DEFAULT_ADMIN_USERNAME,
    }
}

fn module_descriptor(requirement: ProviderRequirement) -> Value {
    let mut required = serde_json::Map::new();
    required.insert(
        requirement.name.to_owned(),
        json!({ "source": requirement.source, "version": requirement.version }),
    );
    json!({
        "terraform": {
            "required_version": TERRAFORM_REQUIRED_VERSION,
            "required_providers": required,
        }
    })
}

fn write_document(
    path: &Utf8Path,
    file: &'static str,
    document: &Value,
) -> Result<(), SynthesisError> {
    let rendered = serde_json::to_string_pretty(document).map_err(|err| {
        SynthesisError::Serialize {
            file,
            message: err.to_string(),
        }
    })?;
    files::write(path, &rendered)?;
    Ok(())
}
