//! Configuration synthesis.

use rstest::rstest;
use serde_json::{Value, json};

use super::*;
use crate::builder::BuilderRegistry;
use crate::files;
use crate::spec::CloudProvider;

fn read_json(path: &camino::Utf8Path) -> Value {
    let contents = files::read_to_string(path).unwrap_or_else(|err| panic!("read: {err}"));
    serde_json::from_str(&contents).unwrap_or_else(|err| panic!("json: {err}"))
}

#[test]
fn writes_three_documents_for_aws() {
    let (_tmp, configurator) = configured(AWS_SPEC);
    let [main, providers, resources] = configurator.config_paths();

    assert_eq!(
        read_json(&main),
        json!({"terraform": {
            "required_version": ">= 0.14.9",
            "required_providers": {"aws": {"source": "hashicorp/aws", "version": "~> 3.27"}}
        }})
    );
    assert_eq!(
        read_json(&providers),
        json!({"provider": {"aws": [{"alias": "us-east-1", "region": "us-east-1"}]}})
    );
    let resources = read_json(&resources);
    assert_eq!(
        resources["resource"]["aws_instance"]["web-1"]["depends_on"],
        json!(["aws_key_pair.us-east-1-key"])
    );
    assert!(resources["resource"]["aws_instance"]["db"].is_object());
    assert_eq!(configurator.cloud_provider(), Some(CloudProvider::Aws));
}

#[test]
fn writes_azure_requirement() {
    let (_tmp, configurator) = configured(AZURE_SPEC);
    let [main, _, resources] = configurator.config_paths();

    assert_eq!(
        read_json(&main)["terraform"]["required_providers"],
        json!({"azurerm": {"source": "hashicorp/azurerm", "version": "~> 3.0.2"}})
    );
    assert!(read_json(&resources)["resource"]["azurerm_linux_virtual_machine"]["vm-1"].is_object());
}

#[test]
fn configures_from_resources_file() {
    let (_tmp, path) = workdir();
    let spec_path = path.join("resources.json");
    files::write(&spec_path, AWS_SPEC).unwrap_or_else(|err| panic!("write: {err}"));

    let mut configurator = configurator(&path);
    configurator
        .configure_from_resources_json(&spec_path)
        .unwrap_or_else(|err| panic!("configure: {err}"));

    assert!(configurator.is_configured());
    assert!(configurator.config_paths().iter().all(|path| path.exists()));
}

#[test]
fn relative_public_key_is_resolved_from_the_invocation_directory() {
    let (_tmp, path) = workdir();
    let workdir = path.join("work");
    let mut configurator = TerraformConfigurator::new(workdir, "keys/id.pub")
        .with_hostnames(Rc::new(SequentialHostnames::default()));
    let spec = crate::spec::ResourceSpec::from_json(AWS_SPEC)
        .unwrap_or_else(|err| panic!("spec should parse: {err}"));
    configurator
        .configure_from_spec(spec)
        .unwrap_or_else(|err| panic!("configure: {err}"));

    let cwd = std::env::current_dir().unwrap_or_else(|err| panic!("cwd: {err}"));
    let expected = format!("${{file(\"{}\")}}", cwd.join("keys/id.pub").display());
    let [_, _, resources] = configurator.config_paths();
    assert_eq!(
        read_json(&resources)["resource"]["aws_key_pair"]["us-east-1-key"]["public_key"],
        json!(expected)
    );
}

#[test]
fn unsupported_provider_fails_before_writing() {
    let (_tmp, path) = workdir();
    let spec_path = path.join("resources.json");
    files::write(&spec_path, r#"{"provider": "gcp", "instances": []}"#)
        .unwrap_or_else(|err| panic!("write: {err}"));

    let mut configurator = configurator(&path);
    let err = configurator
        .configure_from_resources_json(&spec_path)
        .expect_err("gcp is unsupported");

    assert!(err.to_string().contains("'gcp'"), "{err}");
    assert!(!configurator.is_configured());
    assert!(configurator.config_paths().iter().all(|path| !path.exists()));
}

#[test]
fn unregistered_provider_fails_before_writing() {
    let (_tmp, path) = workdir();
    let mut configurator = configurator(&path).with_registry(BuilderRegistry::empty());
    let spec = crate::spec::ResourceSpec::from_json(AWS_SPEC)
        .unwrap_or_else(|err| panic!("spec: {err}"));

    let err = configurator
        .configure_from_spec(spec)
        .expect_err("no builder registered");

    assert!(matches!(
        err,
        SynthesisError::Build(crate::builder::BuildError::UnsupportedProvider { .. })
    ));
    assert!(configurator.config_paths().iter().all(|path| !path.exists()));
}

#[rstest]
#[case("web.1", "ec2-user")]
#[case("web-1", "ec2-user")]
#[case("db", "fedora")]
fn username_lookup_resolves_names_and_keys(#[case] name: &str, #[case] expected: &str) {
    let (_tmp, configurator) = configured(AWS_SPEC);
    assert_eq!(
        configurator
            .get_username_by_instance_name(name)
            .unwrap_or_else(|err| panic!("lookup: {err}")),
        expected
    );
}

#[test]
fn username_lookup_fails_for_unknown_instance() {
    let (_tmp, configurator) = configured(AWS_SPEC);
    let err = configurator
        .get_username_by_instance_name("cache")
        .expect_err("cache is not declared");
    assert!(matches!(err, SynthesisError::UnknownInstance { ref name } if name == "cache"));
}

#[test]
fn username_lookup_requires_configuration() {
    let (_tmp, path) = workdir();
    let err = configurator(&path)
        .get_username_by_instance_name("web.1")
        .expect_err("not configured");
    assert!(matches!(err, SynthesisError::NotConfigured));
}

#[test]
fn remove_configuration_deletes_files_and_tolerates_absence() {
    let (_tmp, configurator) = configured(AWS_SPEC);
    configurator
        .print_configuration()
        .unwrap_or_else(|err| panic!("print: {err}"));

    configurator
        .remove_configuration()
        .unwrap_or_else(|err| panic!("remove: {err}"));
    assert!(configurator.config_paths().iter().all(|path| !path.exists()));

    configurator
        .remove_configuration()
        .unwrap_or_else(|err| panic!("second remove: {err}"));
}

#[rstest]
#[case(CloudProvider::Aws, "ec2-user")]
#[case(CloudProvider::Azure, "azure")]
fn default_usernames_follow_builders(#[case] provider: CloudProvider, #[case] expected: &str) {
    assert_eq!(default_username(provider), expected);
}
