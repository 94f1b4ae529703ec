//! AWS configuration builder.

use camino::Utf8PathBuf;
use serde_json::{Map, Value, json};

use super::{
    BuildContext, BuildError, ConfigBuilder, ProviderRequirement, ensure_provider,
    file_interpolation,
};
use crate::graph::{ProviderGraph, Resource, ResourceGraph, ResourceRef};
use crate::spec::{CloudProvider, InstanceSpec, ResourceSpec};

/// Builds `aws` provider blocks plus one key pair per region and one
/// `aws_instance` per requested instance.
#[derive(Clone, Debug)]
pub struct AwsConfigBuilder {
    instances: Vec<InstanceSpec>,
    ssh_public_key_file: Utf8PathBuf,
}

impl AwsConfigBuilder {
    /// Provider plugin name.
    pub const PLUGIN: &'static str = "aws";
    /// Registry source of the provider plugin.
    pub const PLUGIN_SOURCE: &'static str = "hashicorp/aws";
    /// Provider plugin version constraint.
    pub const PLUGIN_VERSION: &'static str = "~> 3.27";
    /// Prefix applied to names created in the AWS account.
    pub const RESOURCE_PREFIX: &'static str = "cloudimgval";
    /// Instance type used when an instance does not request one.
    pub const DEFAULT_INSTANCE_TYPE: &'static str = "t3.micro";
    /// Login user assumed when an instance does not name one.
    pub const DEFAULT_USERNAME: &'static str = "ec2-user";
    /// Terraform type of key pairs.
    pub const KEY_PAIR: &'static str = "aws_key_pair";
    /// Terraform type of compute instances.
    pub const INSTANCE: &'static str = "aws_instance";

    /// Creates a builder for an AWS specification.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ProviderMismatch`] for non-AWS specifications.
    pub fn new(spec: &ResourceSpec, context: &BuildContext) -> Result<Self, BuildError> {
        ensure_provider(CloudProvider::Aws, spec)?;
        Ok(Self {
            instances: spec.instances().to_vec(),
            ssh_public_key_file: context.ssh_public_key_file().to_path_buf(),
        })
    }

    /// Resource key of the key pair shared by every instance in `region`.
    #[must_use]
    pub fn key_pair_key(region: &str) -> String {
        format!("{}-key", region.trim())
    }

    fn region(instance: &InstanceSpec) -> &str {
        instance.region.trim()
    }

    fn new_key_pair(&self, region: &str, provider: &str) -> Resource {
        Resource::new(Self::KEY_PAIR, Self::key_pair_key(region))
            .attribute("provider", provider)
            .attribute(
                "key_name",
                format!("{}-{region}-key", Self::RESOURCE_PREFIX),
            )
            .attribute(
                "public_key",
                file_interpolation(&self.ssh_public_key_file),
            )
    }

    fn new_instance(
        instance: &InstanceSpec,
        key_pair: &ResourceRef,
        provider: &str,
    ) -> Result<Resource, BuildError> {
        let ami = instance.ami()?;
        let instance_type = instance
            .instance_type()
            .unwrap_or(Self::DEFAULT_INSTANCE_TYPE);

        Ok(Resource::new(Self::INSTANCE, instance.resource_key())
            .attribute("provider", provider)
            .attribute("ami", ami)
            .attribute("instance_type", instance_type)
            .attribute("key_name", key_pair.interpolate("key_name"))
            .attribute("tags", json!({ "Name": instance.name }))
            .embeds(key_pair)
            .depends_on(key_pair))
    }
}

impl ConfigBuilder for AwsConfigBuilder {
    fn provider(&self) -> CloudProvider {
        CloudProvider::Aws
    }

    fn requirement(&self) -> ProviderRequirement {
        ProviderRequirement {
            name: Self::PLUGIN,
            source: Self::PLUGIN_SOURCE,
            version: Self::PLUGIN_VERSION,
        }
    }

    fn build_providers(&self) -> Result<ProviderGraph, BuildError> {
        let mut providers = ProviderGraph::new(Self::PLUGIN);
        for instance in &self.instances {
            let region = Self::region(instance);
            let mut settings = Map::new();
            settings.insert(String::from("region"), Value::from(region));
            providers.push(region, settings)?;
        }
        Ok(providers)
    }

    fn build_resources(&self, providers: &ProviderGraph) -> Result<ResourceGraph, BuildError> {
        let mut graph = ResourceGraph::new();
        for instance in &self.instances {
            let region = Self::region(instance);
            let provider =
                providers
                    .provider_ref(region)
                    .ok_or_else(|| BuildError::MissingProvider {
                        instance: instance.name.clone(),
                        plugin: Self::PLUGIN.to_owned(),
                        region: region.to_owned(),
                    })?;

            let key_pair = graph.ensure(Self::KEY_PAIR, &Self::key_pair_key(region), || {
                self.new_key_pair(region, &provider)
            })?;
            graph.insert(Self::new_instance(instance, &key_pair, &provider)?)?;
        }
        Ok(graph)
    }
}
