//! Tests for the configuration builders and their registry.

use std::rc::Rc;

use rstest::rstest;

use super::*;
use crate::test_support::SequentialHostnames;

mod aws;

fn spec(document: &str) -> ResourceSpec {
    ResourceSpec::from_json(document).unwrap_or_else(|err| panic!("spec should parse: {err}"))
}

fn context() -> BuildContext {
    BuildContext::new("/keys/id_rsa.pub").with_hostnames(Rc::new(SequentialHostnames::default()))
}

const AWS_ONE: &str = r#"{"provider": "aws", "instances": [
    {"name": "web.1", "region": "us-east-1", "ami": "ami-123"}
]}"#;

const AZURE_ONE: &str = r#"{"provider": "azure", "subscription_id": "sub-1", "resource_group": "rg-1",
    "instances": [{"name": "vm", "location": "eastus", "image_uri": "/img"}]}"#;

#[test]
fn default_registry_supports_every_provider() {
    let registry = BuilderRegistry::default();
    for provider in CloudProvider::ALL {
        assert!(registry.supports(provider), "{provider} should be registered");
    }
}

#[test]
fn registry_selects_builder_for_spec_provider() {
    let registry = BuilderRegistry::default();
    let builder = registry
        .select(&spec(AZURE_ONE), &context())
        .expect("azure builder should be selected");
    assert_eq!(builder.provider(), CloudProvider::Azure);
    assert_eq!(builder.requirement().source, "hashicorp/azurerm");
}

#[test]
fn empty_registry_rejects_provider() {
    let err = BuilderRegistry::empty()
        .select(&spec(AWS_ONE), &context())
        .expect_err("nothing registered");
    assert_eq!(
        err,
        BuildError::UnsupportedProvider {
            provider: CloudProvider::Aws
        }
    );
}

#[test]
fn builders_reject_specs_for_other_providers() {
    let err = AwsConfigBuilder::new(&spec(AZURE_ONE), &context())
        .expect_err("aws builder cannot take azure spec");
    assert_eq!(
        err,
        BuildError::ProviderMismatch {
            builder: CloudProvider::Aws,
            provider: CloudProvider::Azure,
        }
    );
}

#[test]
fn random_hostnames_follow_the_azure_pattern() {
    let hostname = RandomHostnames.next_hostname();
    assert!(hostname.starts_with("az-"), "{hostname}");
    assert!(hostname.ends_with("-vm"), "{hostname}");
    assert_eq!(hostname.len(), "az--vm".len() + RandomHostnames::RANDOM_LENGTH);
    assert_eq!(hostname, hostname.to_lowercase());
}

#[test]
fn file_interpolation_wraps_path() {
    assert_eq!(
        file_interpolation(Utf8Path::new("/keys/id_rsa.pub")),
        "${file(\"/keys/id_rsa.pub\")}"
    );
}

#[rstest]
#[case("keys/id.pub", "/home/ci/keys/id.pub")]
#[case("/keys/id_rsa.pub", "/keys/id_rsa.pub")]
fn public_key_paths_are_anchored_when_relative(#[case] key: &str, #[case] expected: &str) {
    let anchored = BuildContext::new(key).anchored_at(Utf8Path::new("/home/ci"));
    assert_eq!(anchored.ssh_public_key_file(), Utf8Path::new(expected));
}
