//! Configuration loading via `ortho-config`.

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::suite::RerunPolicy;

/// Tool locations, artifact paths and test runner policy, merged from
/// defaults, `cloudval.toml` and `CLOUDVAL_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CLOUDVAL",
    discovery(
        app_name = "cloudval",
        env_var = "CLOUDVAL_CONFIG_PATH",
        config_file_name = "cloudval.toml",
        dotfile_name = ".cloudval.toml",
        project_file_name = "cloudval.toml"
    )
)]
pub struct ValidatorConfig {
    /// Path to the `terraform` executable.
    #[ortho_config(default = "terraform".to_owned())]
    pub terraform_bin: String,
    /// Directory receiving the synthesised configuration and Terraform state.
    #[ortho_config(default = ".".to_owned())]
    pub workdir: String,
    /// Public key installed on every instance.
    #[ortho_config(default = "/tmp/ssh_key.pub".to_owned())]
    pub ssh_public_key_file: String,
    /// SSH client configuration handed to the test runner.
    #[ortho_config(default = "/tmp/ssh_config".to_owned())]
    pub ssh_config_file: String,
    /// Hand-off artifact listing the provisioned instances.
    #[ortho_config(default = "/tmp/instances.json".to_owned())]
    pub instances_json: String,
    /// Test runner executable.
    #[ortho_config(default = "py.test".to_owned())]
    pub test_runner_bin: String,
    /// Directory holding the test suites.
    #[ortho_config(default = "test_suite".to_owned())]
    pub suite_dir: String,
    /// Upper bound on parallel test workers.
    #[ortho_config(default = RerunPolicy::DEFAULT_MAX_WORKERS)]
    pub max_workers: u32,
    /// Reruns allowed for tests failing with a transient error.
    #[ortho_config(default = RerunPolicy::DEFAULT_RERUNS)]
    pub reruns: u32,
    /// Seconds between reruns.
    #[ortho_config(default = RerunPolicy::DEFAULT_RERUNS_DELAY)]
    pub reruns_delay: u32,
    /// Failure pattern that qualifies a test for a rerun.
    #[ortho_config(default = RerunPolicy::DEFAULT_PATTERN.to_owned())]
    pub rerun_pattern: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl ValidatorConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to cloudval.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("cloudval")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages name
    /// the environment variable and configuration key to set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// or [`ConfigError::Invalid`] when the worker cap is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.terraform_bin,
                FieldMetadata::new(
                    "terraform executable",
                    "CLOUDVAL_TERRAFORM_BIN",
                    "terraform_bin",
                ),
            ),
            (
                &self.workdir,
                FieldMetadata::new("terraform working directory", "CLOUDVAL_WORKDIR", "workdir"),
            ),
            (
                &self.ssh_public_key_file,
                FieldMetadata::new(
                    "SSH public key file",
                    "CLOUDVAL_SSH_PUBLIC_KEY_FILE",
                    "ssh_public_key_file",
                ),
            ),
            (
                &self.ssh_config_file,
                FieldMetadata::new(
                    "SSH config file",
                    "CLOUDVAL_SSH_CONFIG_FILE",
                    "ssh_config_file",
                ),
            ),
            (
                &self.instances_json,
                FieldMetadata::new(
                    "instance hand-off path",
                    "CLOUDVAL_INSTANCES_JSON",
                    "instances_json",
                ),
            ),
            (
                &self.test_runner_bin,
                FieldMetadata::new(
                    "test runner executable",
                    "CLOUDVAL_TEST_RUNNER_BIN",
                    "test_runner_bin",
                ),
            ),
            (
                &self.rerun_pattern,
                FieldMetadata::new("rerun pattern", "CLOUDVAL_RERUN_PATTERN", "rerun_pattern"),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid(String::from(
                "max_workers must be at least 1: set CLOUDVAL_MAX_WORKERS or max_workers in cloudval.toml",
            )));
        }
        Ok(())
    }

    /// Working directory as a path.
    #[must_use]
    pub fn workdir_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.workdir)
    }

    /// Rerun policy for parallel test runs.
    #[must_use]
    pub fn rerun_policy(&self) -> RerunPolicy {
        RerunPolicy {
            max_workers: self.max_workers,
            reruns: self.reruns,
            reruns_delay: self.reruns_delay,
            pattern: self.rerun_pattern.clone(),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn config() -> ValidatorConfig {
        ValidatorConfig {
            terraform_bin: String::from("terraform"),
            workdir: String::from("/work"),
            ssh_public_key_file: String::from("/tmp/ssh_key.pub"),
            ssh_config_file: String::from("/tmp/ssh_config"),
            instances_json: String::from("/tmp/instances.json"),
            test_runner_bin: String::from("py.test"),
            suite_dir: String::from("test_suite"),
            max_workers: 40,
            reruns: 3,
            reruns_delay: 5,
            rerun_pattern: String::from(RerunPolicy::DEFAULT_PATTERN),
        }
    }

    #[rstest]
    fn complete_config_validates(config: ValidatorConfig) {
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.rerun_policy(), RerunPolicy::default());
        assert_eq!(config.workdir_path(), Utf8PathBuf::from("/work"));
    }

    #[rstest]
    fn blank_terraform_bin_names_env_var(mut config: ValidatorConfig) {
        config.terraform_bin = String::from("  ");
        let err = config.validate().expect_err("blank binary");
        assert!(
            err.to_string().contains("CLOUDVAL_TERRAFORM_BIN"),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn blank_public_key_names_toml_key(mut config: ValidatorConfig) {
        config.ssh_public_key_file = String::new();
        let err = config.validate().expect_err("blank key");
        assert!(matches!(
            err,
            ConfigError::MissingField(ref message) if message.contains("ssh_public_key_file")
        ));
    }

    #[rstest]
    fn zero_workers_are_rejected(mut config: ValidatorConfig) {
        config.max_workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
