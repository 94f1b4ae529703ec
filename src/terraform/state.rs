//! Parsing of `terraform show -json` output into instance descriptors.

use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::ExtractionError;
use crate::builder::{AZURE_DNS_SUFFIX, AwsConfigBuilder, AzureConfigBuilder};
use crate::instance::{InstanceDescriptor, Instances, ProviderDetails};
use crate::spec::CloudProvider;

/// Top-level state document.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TerraformState {
    /// Absent when nothing has been applied yet.
    #[serde(default)]
    pub values: Option<StateValues>,
}

/// State values wrapper.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct StateValues {
    /// Root module of the configuration.
    #[serde(default)]
    pub root_module: StateModule,
}

/// A module and its nested modules.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct StateModule {
    /// Resources declared directly in the module.
    #[serde(default)]
    pub resources: Vec<StateResource>,
    /// Nested modules.
    #[serde(default)]
    pub child_modules: Vec<StateModule>,
}

/// One resource instance in state.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct StateResource {
    /// Fully qualified address, including any module path.
    #[serde(default)]
    pub address: String,
    /// Resource type.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Resource name within its type.
    #[serde(default)]
    pub name: String,
    /// Attribute values.
    #[serde(default)]
    pub values: Map<String, Value>,
}

impl TerraformState {
    /// Parses `terraform show -json` output.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractionError::Parse`] when the output is not state JSON.
    pub fn parse(json: &str) -> Result<Self, ExtractionError> {
        serde_json::from_str(json).map_err(|err| ExtractionError::Parse {
            message: err.to_string(),
        })
    }

    /// Every resource in the root module and its descendants, depth first.
    #[must_use]
    pub fn resources(&self) -> Vec<&StateResource> {
        let mut collected = Vec::new();
        if let Some(values) = &self.values {
            collect_resources(&values.root_module, &mut collected);
        }
        collected
    }
}

fn collect_resources<'a>(module: &'a StateModule, collected: &mut Vec<&'a StateResource>) {
    collected.extend(module.resources.iter());
    for child in &module.child_modules {
        collect_resources(child, collected);
    }
}

impl StateResource {
    fn required_str(&self, field: &'static str) -> Result<String, ExtractionError> {
        self.values
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| ExtractionError::MissingField {
                address: self.address.clone(),
                field,
            })
    }
}

/// Builds descriptors for every `aws_instance` in `resources`.
///
/// The username is not echoed back by state, so `username_for` is asked for
/// it using the resource name.
///
/// # Errors
///
/// Returns [`ExtractionError::MissingField`] when an instance lacks an
/// identifier, address or DNS name, [`ExtractionError::UnknownInstance`]
/// when the username lookup fails, and [`ExtractionError::NoInstances`] when
/// no instance is found.
pub fn extract_aws_instances<'a, F, E>(
    resources: impl IntoIterator<Item = &'a StateResource>,
    username_for: F,
) -> Result<Instances, ExtractionError>
where
    F: Fn(&str) -> Result<String, E>,
    E: fmt::Display,
{
    let mut instances = Instances::new();
    for resource in resources
        .into_iter()
        .filter(|resource| resource.kind == AwsConfigBuilder::INSTANCE)
    {
        let username = username_for(&resource.name).map_err(|err| {
            ExtractionError::UnknownInstance {
                name: resource.name.clone(),
                message: err.to_string(),
            }
        })?;
        let descriptor = InstanceDescriptor {
            address: resource.address.clone(),
            name: resource.name.clone(),
            instance_id: resource.required_str("id")?,
            public_ip: resource.required_str("public_ip")?,
            public_dns: resource.required_str("public_dns")?,
            username,
            details: ProviderDetails::Aws {
                availability_zone: resource.required_str("availability_zone")?,
                ami: resource.required_str("ami")?,
            },
        };
        instances.insert(descriptor.address.clone(), descriptor);
    }
    non_empty(instances, CloudProvider::Aws)
}

/// Builds descriptors for every `azurerm_linux_virtual_machine` in
/// `resources`. The public DNS name is derived as
/// `<computer_name>.<location>.cloudapp.azure.com`.
///
/// # Errors
///
/// Returns [`ExtractionError::MissingField`] when a VM lacks a required
/// field or an image, and [`ExtractionError::NoInstances`] when no VM is
/// found.
pub fn extract_azure_instances<'a>(
    resources: impl IntoIterator<Item = &'a StateResource>,
) -> Result<Instances, ExtractionError> {
    let mut instances = Instances::new();
    for resource in resources
        .into_iter()
        .filter(|resource| resource.kind == AzureConfigBuilder::VIRTUAL_MACHINE)
    {
        let computer_name = resource.required_str("computer_name")?;
        let location = resource.required_str("location")?;
        let descriptor = InstanceDescriptor {
            address: resource.address.clone(),
            name: resource.name.clone(),
            instance_id: resource.required_str("id")?,
            public_ip: resource.required_str("public_ip_address")?,
            public_dns: format!("{computer_name}.{location}.{AZURE_DNS_SUFFIX}"),
            username: resource.required_str("admin_username")?,
            details: ProviderDetails::Azure {
                image: azure_image(resource)?,
                location,
            },
        };
        instances.insert(descriptor.address.clone(), descriptor);
    }
    non_empty(instances, CloudProvider::Azure)
}

/// Image of an Azure VM: `source_image_id` when set, otherwise a non-empty
/// `source_image_reference`.
///
/// # Errors
///
/// Returns [`ExtractionError::MissingField`] when neither is present.
pub fn azure_image(resource: &StateResource) -> Result<Value, ExtractionError> {
    if let Some(id) = resource
        .values
        .get("source_image_id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
    {
        return Ok(Value::from(id));
    }
    resource
        .values
        .get("source_image_reference")
        .filter(|reference| !is_empty_value(reference))
        .cloned()
        .ok_or_else(|| ExtractionError::MissingField {
            address: resource.address.clone(),
            field: "source_image_id or source_image_reference",
        })
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::String(text) => text.trim().is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn non_empty(instances: Instances, provider: CloudProvider) -> Result<Instances, ExtractionError> {
    if instances.is_empty() {
        Err(ExtractionError::NoInstances { provider })
    } else {
        Ok(instances)
    }
}
