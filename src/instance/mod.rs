//! Provider-agnostic instance descriptors and the hand-off artifact.
//!
//! The hand-off is a JSON object mapping each Terraform resource address to
//! its [`InstanceDescriptor`]. It is replaced wholesale on every run and
//! removed during cleanup.

use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::files::{self, FileError};

/// Errors raised while rendering or persisting the hand-off artifact.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum HandoffError {
    /// Raised when the artifact cannot be written, read or removed.
    #[error(transparent)]
    File(#[from] FileError),
    /// Raised when the artifact cannot be serialised or parsed.
    #[error("failed to encode instance hand-off: {message}")]
    Encode {
        /// Serializer error message.
        message: String,
    },
    /// Raised when a descriptor lacks a field the test runner needs.
    #[error("instance {address} has an empty {field}")]
    IncompleteDescriptor {
        /// Address of the incomplete descriptor.
        address: String,
        /// Empty field.
        field: &'static str,
    },
    /// Raised when there are no instances to hand off.
    #[error("no instances to hand off")]
    Empty,
}

/// Provider-specific descriptor fields.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProviderDetails {
    /// AWS placement and image.
    Aws {
        /// Availability zone the instance runs in.
        availability_zone: String,
        /// AMI the instance booted from.
        ami: String,
    },
    /// Azure placement and image.
    Azure {
        /// Normalised location.
        location: String,
        /// Image URI or marketplace reference, as reported in state.
        image: Value,
    },
}

/// Normalised view of one deployed virtual machine.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstanceDescriptor {
    /// Terraform resource address, unique per run.
    pub address: String,
    /// Logical resource name.
    pub name: String,
    /// Provider instance identifier.
    pub instance_id: String,
    /// Public IPv4 address.
    pub public_ip: String,
    /// Public DNS name.
    pub public_dns: String,
    /// Login user.
    pub username: String,
    /// Provider-specific fields.
    #[serde(flatten)]
    pub details: ProviderDetails,
}

impl InstanceDescriptor {
    /// `user@public_dns` target for the test runner.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::IncompleteDescriptor`] when either part is
    /// blank.
    pub fn host_with_user(&self) -> Result<String, HandoffError> {
        for (field, value) in [("username", &self.username), ("public_dns", &self.public_dns)] {
            if value.trim().is_empty() {
                return Err(HandoffError::IncompleteDescriptor {
                    address: self.address.clone(),
                    field,
                });
            }
        }
        Ok(format!("{}@{}", self.username, self.public_dns))
    }
}

/// Descriptors keyed by resource address.
pub type Instances = BTreeMap<String, InstanceDescriptor>;

/// Renders `user1@host1,user2@host2,...` in address order.
///
/// # Errors
///
/// Returns [`HandoffError::Empty`] for an empty set, or
/// [`HandoffError::IncompleteDescriptor`] when any descriptor lacks a
/// username or public DNS name.
pub fn hosts_with_users(instances: &Instances) -> Result<String, HandoffError> {
    if instances.is_empty() {
        return Err(HandoffError::Empty);
    }
    let hosts = instances
        .values()
        .map(InstanceDescriptor::host_with_user)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hosts.join(","))
}

/// Writes the hand-off artifact, replacing any previous one.
///
/// # Errors
///
/// Returns [`HandoffError`] when the set is empty, cannot be encoded, or
/// cannot be written.
pub fn write_instances_json(path: &Utf8Path, instances: &Instances) -> Result<(), HandoffError> {
    if instances.is_empty() {
        return Err(HandoffError::Empty);
    }
    let rendered = serde_json::to_string_pretty(instances).map_err(|err| HandoffError::Encode {
        message: err.to_string(),
    })?;
    files::write(path, &rendered)?;
    Ok(())
}

/// Reads a previously written hand-off artifact.
///
/// # Errors
///
/// Returns [`HandoffError`] when the file cannot be read or parsed.
pub fn read_instances_json(path: &Utf8Path) -> Result<Instances, HandoffError> {
    let contents = files::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|err| HandoffError::Encode {
        message: err.to_string(),
    })
}

/// Removes the hand-off artifact. Returns `false` when it did not exist.
///
/// # Errors
///
/// Returns [`HandoffError::File`] when an existing file cannot be removed.
pub fn remove_instances_json(path: &Utf8Path) -> Result<bool, HandoffError> {
    Ok(files::remove(path)?)
}
