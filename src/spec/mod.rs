//! Provider-agnostic resource specification.
//!
//! The specification is read once from a JSON document, validated as a whole,
//! and treated as immutable afterwards. Every structural problem (unknown
//! provider, missing image, duplicate names) is reported here, before any
//! builder or external tool runs.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::files::{self, FileError};
use crate::graph::sanitize_key;

/// Errors raised while loading or validating a resource specification.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SpecError {
    /// Raised when the specification file cannot be read.
    #[error("failed to read resource specification: {0}")]
    Io(#[from] FileError),
    /// Raised when the document is not valid JSON for the expected schema.
    #[error("failed to parse resource specification {path}: {message}")]
    Parse {
        /// Path of the document, or `<inline>` for in-memory input.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when `provider` is not one of the supported clouds.
    #[error("unsupported provider '{value}': expected one of aws, azure")]
    UnsupportedProvider {
        /// Provider value found in the document.
        value: String,
    },
    /// Raised when the document declares no instances.
    #[error("resource specification declares no instances")]
    NoInstances,
    /// Raised when a required top-level field is missing or blank.
    #[error("missing {field} for provider {provider}")]
    MissingAccountField {
        /// Provider requiring the field.
        provider: CloudProvider,
        /// Field name.
        field: &'static str,
    },
    /// Raised when an instance is missing a required field.
    #[error("instance '{instance}' is missing {field}")]
    MissingField {
        /// Instance name, or its position when the name itself is missing.
        instance: String,
        /// Field name.
        field: &'static str,
    },
    /// Raised when an Azure instance sets both image fields.
    #[error("instance '{instance}' sets both image_uri and image_definition; choose one")]
    AmbiguousImage {
        /// Instance name.
        instance: String,
    },
    /// Raised when two instances map onto the same resource key.
    #[error("instance name '{name}' is declared more than once (resource key '{key}')")]
    DuplicateInstance {
        /// Second instance name that collides.
        name: String,
        /// Resource key both names map to.
        key: String,
    },
}

/// Supported cloud platforms.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// Amazon Web Services.
    Aws,
    /// Microsoft Azure.
    Azure,
}

impl CloudProvider {
    /// Every provider with a configuration builder.
    pub const ALL: [Self; 2] = [Self::Aws, Self::Azure];

    /// Lower-case provider name as used in resource specifications.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudProvider {
    type Err = SpecError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalised = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str() == normalised)
            .ok_or_else(|| SpecError::UnsupportedProvider {
                value: value.to_owned(),
            })
    }
}

/// Marketplace image coordinates for Azure virtual machines.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ImageDefinition {
    /// Image publisher, for example `Canonical`.
    pub publisher: String,
    /// Image offer.
    pub offer: String,
    /// Image SKU.
    pub sku: String,
    /// Image version, usually `latest`.
    pub version: String,
}

/// Boot image resolved for a specific provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImageReference {
    /// AWS AMI identifier.
    Ami(String),
    /// Azure managed image or gallery image URI.
    AzureUri(String),
    /// Azure marketplace image.
    AzureDefinition(ImageDefinition),
}

/// One requested virtual machine.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct InstanceSpec {
    /// Instance name; AWS resource keys are derived from it.
    #[serde(default)]
    pub name: String,
    /// AWS region or Azure location. Both `region` and `location` are
    /// accepted in the document.
    #[serde(rename = "region", alias = "location", default)]
    pub region: String,
    /// AWS AMI identifier.
    pub ami: Option<String>,
    /// Azure image URI.
    pub image_uri: Option<String>,
    /// Azure marketplace image definition.
    pub image_definition: Option<ImageDefinition>,
    /// Instance type or VM size; builders fall back to their default SKU.
    pub instance_type: Option<String>,
    /// Login user; builders fall back to their default username.
    pub username: Option<String>,
}

impl InstanceSpec {
    /// Instance type when set and non-blank.
    #[must_use]
    pub fn instance_type(&self) -> Option<&str> {
        non_blank(self.instance_type.as_deref())
    }

    /// Username when set and non-blank.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        non_blank(self.username.as_deref())
    }

    /// Resource key derived from the instance name.
    #[must_use]
    pub fn resource_key(&self) -> String {
        sanitize_key(&self.name)
    }

    /// AWS AMI identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::MissingField`] when `ami` is absent or blank.
    pub fn ami(&self) -> Result<&str, SpecError> {
        non_blank(self.ami.as_deref()).ok_or_else(|| self.missing("ami"))
    }

    /// Resolves the boot image for `provider`.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::MissingField`] when no image is set for the
    /// provider, or [`SpecError::AmbiguousImage`] when an Azure instance sets
    /// both `image_uri` and `image_definition`.
    pub fn image(&self, provider: CloudProvider) -> Result<ImageReference, SpecError> {
        match provider {
            CloudProvider::Aws => self.ami().map(|ami| ImageReference::Ami(ami.to_owned())),
            CloudProvider::Azure => {
                match (non_blank(self.image_uri.as_deref()), &self.image_definition) {
                    (Some(_), Some(_)) => Err(SpecError::AmbiguousImage {
                        instance: self.name.clone(),
                    }),
                    (Some(uri), None) => Ok(ImageReference::AzureUri(uri.to_owned())),
                    (None, Some(definition)) => {
                        Ok(ImageReference::AzureDefinition(definition.clone()))
                    }
                    (None, None) => Err(self.missing("image_uri or image_definition")),
                }
            }
        }
    }

    fn missing(&self, field: &'static str) -> SpecError {
        SpecError::MissingField {
            instance: self.name.clone(),
            field,
        }
    }
}

/// Azure subscription scope shared by every Azure resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AzureAccount {
    /// Subscription identifier.
    pub subscription_id: String,
    /// Resource group receiving every resource.
    pub resource_group: String,
}

#[derive(Debug, Deserialize)]
struct RawResourceSpec {
    #[serde(default)]
    provider: String,
    #[serde(default)]
    instances: Vec<InstanceSpec>,
    subscription_id: Option<String>,
    resource_group: Option<String>,
}

/// Validated resource specification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceSpec {
    provider: CloudProvider,
    instances: Vec<InstanceSpec>,
    azure: Option<AzureAccount>,
}

impl ResourceSpec {
    /// Loads and validates a specification document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] when the file cannot be read, parsed, or
    /// validated.
    pub fn load(path: &Utf8Path) -> Result<Self, SpecError> {
        let contents = files::read_to_string(path)?;
        Self::parse(path, &contents)
    }

    /// Parses and validates an in-memory specification document.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] when the document cannot be parsed or validated.
    pub fn from_json(contents: &str) -> Result<Self, SpecError> {
        Self::parse(Utf8Path::new("<inline>"), contents)
    }

    fn parse(path: &Utf8Path, contents: &str) -> Result<Self, SpecError> {
        let raw: RawResourceSpec =
            serde_json::from_str(contents).map_err(|err| SpecError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawResourceSpec) -> Result<Self, SpecError> {
        let provider: CloudProvider = raw.provider.parse()?;
        let azure = match provider {
            CloudProvider::Aws => None,
            CloudProvider::Azure => Some(AzureAccount {
                subscription_id: require_account(
                    provider,
                    raw.subscription_id.as_deref(),
                    "subscription_id",
                )?,
                resource_group: require_account(
                    provider,
                    raw.resource_group.as_deref(),
                    "resource_group",
                )?,
            }),
        };
        let spec = Self {
            provider,
            instances: raw.instances,
            azure,
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), SpecError> {
        if self.instances.is_empty() {
            return Err(SpecError::NoInstances);
        }

        let mut keys = BTreeSet::new();
        for (index, instance) in self.instances.iter().enumerate() {
            if instance.name.trim().is_empty() {
                return Err(SpecError::MissingField {
                    instance: format!("#{index}"),
                    field: "name",
                });
            }
            if instance.region.trim().is_empty() {
                return Err(instance.missing(match self.provider {
                    CloudProvider::Aws => "region",
                    CloudProvider::Azure => "location",
                }));
            }
            instance.image(self.provider)?;

            let key = instance.resource_key();
            if !keys.insert(key.clone()) {
                return Err(SpecError::DuplicateInstance {
                    name: instance.name.clone(),
                    key,
                });
            }
        }
        Ok(())
    }

    /// Selected provider.
    #[must_use]
    pub const fn provider(&self) -> CloudProvider {
        self.provider
    }

    /// Requested instances in declaration order.
    #[must_use]
    pub fn instances(&self) -> &[InstanceSpec] {
        &self.instances
    }

    /// Azure subscription scope, present only for Azure specifications.
    #[must_use]
    pub const fn azure_account(&self) -> Option<&AzureAccount> {
        self.azure.as_ref()
    }

    /// Finds the instance whose name, or name-derived resource key, equals
    /// `logical_name`.
    #[must_use]
    pub fn find_instance(&self, logical_name: &str) -> Option<&InstanceSpec> {
        self.instances
            .iter()
            .find(|instance| instance.name == logical_name)
            .or_else(|| {
                self.instances
                    .iter()
                    .find(|instance| instance.resource_key() == logical_name)
            })
    }
}

fn require_account(
    provider: CloudProvider,
    value: Option<&str>,
    field: &'static str,
) -> Result<String, SpecError> {
    non_blank(value)
        .map(str::to_owned)
        .ok_or(SpecError::MissingAccountField { provider, field })
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Converts an [`ImageDefinition`] into the JSON object Terraform expects.
#[must_use]
pub fn image_definition_value(definition: &ImageDefinition) -> Value {
    serde_json::json!({
        "publisher": definition.publisher,
        "offer": definition.offer,
        "sku": definition.sku,
        "version": definition.version,
    })
}
