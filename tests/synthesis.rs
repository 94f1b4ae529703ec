//! Configuration synthesis through the public API, from a resource file on
//! disk to the three Terraform JSON documents.

use std::fs;
use std::rc::Rc;

use camino::Utf8PathBuf;
use cloudval::test_support::SequentialHostnames;
use cloudval::{AzureConfigBuilder, CloudProvider, SynthesisError, TerraformConfigurator};
use rstest::{fixture, rstest};
use serde_json::Value;
use tempfile::TempDir;

struct Workspace {
    _tmp: TempDir,
    root: Utf8PathBuf,
}

impl Workspace {
    fn write_spec(&self, contents: &str) -> Utf8PathBuf {
        let path = self.root.join("resources.json");
        fs::write(&path, contents).expect("write resources");
        path
    }

    fn configurator(&self) -> TerraformConfigurator {
        TerraformConfigurator::new(self.root.join("work"), "/keys/id_rsa.pub")
            .with_hostnames(Rc::new(SequentialHostnames::default()))
    }

    fn document(&self, name: &str) -> Value {
        let contents =
            fs::read_to_string(self.root.join("work").join(name)).expect("read document");
        serde_json::from_str(&contents).expect("document should be JSON")
    }
}

#[fixture]
fn workspace() -> Workspace {
    let tmp = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 tempdir");
    Workspace { _tmp: tmp, root }
}

#[rstest]
fn azure_spec_synthesises_full_network_chain(workspace: Workspace) {
    let path = workspace.write_spec(
        r#"{"provider": "azure", "subscription_id": "sub-1", "resource_group": "rg-1",
            "instances": [
                {"name": "ubuntu", "location": "East US",
                 "image_definition": {"publisher": "Canonical", "offer": "UbuntuServer",
                                      "sku": "18.04-LTS", "version": "latest"}}
            ]}"#,
    );
    let mut configurator = workspace.configurator();
    configurator
        .configure_from_resources_json(&path)
        .expect("configure");

    assert_eq!(configurator.cloud_provider(), Some(CloudProvider::Azure));
    let main = workspace.document("main.tf.json");
    assert_eq!(
        main["terraform"]["required_providers"]["azurerm"]["source"],
        "hashicorp/azurerm"
    );

    let resources = workspace.document("resources.tf.json");
    for kind in [
        AzureConfigBuilder::VIRTUAL_NETWORK,
        AzureConfigBuilder::SUBNET,
        AzureConfigBuilder::PUBLIC_IP,
        AzureConfigBuilder::NETWORK_INTERFACE,
        AzureConfigBuilder::VIRTUAL_MACHINE,
    ] {
        assert!(
            resources["resource"][kind].is_object(),
            "missing {kind} in {resources}"
        );
    }
    let vm = &resources["resource"][AzureConfigBuilder::VIRTUAL_MACHINE]["vm-1"];
    assert_eq!(vm["provider"], "azurerm.eastus");
    assert_eq!(vm["source_image_reference"]["publisher"], "Canonical");
}

#[rstest]
fn usernames_resolve_by_name_or_resource_key(workspace: Workspace) {
    let path = workspace.write_spec(
        r#"{"provider": "aws", "instances": [
            {"name": "web.1", "region": "us-east-1", "ami": "ami-1", "username": "fedora"},
            {"name": "db", "region": "us-west-2", "ami": "ami-2"}
        ]}"#,
    );
    let mut configurator = workspace.configurator();
    configurator
        .configure_from_resources_json(&path)
        .expect("configure");

    assert_eq!(
        configurator.get_username_by_instance_name("web.1").expect("by name"),
        "fedora"
    );
    assert_eq!(
        configurator.get_username_by_instance_name("web-1").expect("by key"),
        "fedora"
    );
    assert_eq!(
        configurator.get_username_by_instance_name("db").expect("default"),
        "ec2-user"
    );
    assert!(matches!(
        configurator.get_username_by_instance_name("cache"),
        Err(SynthesisError::UnknownInstance { .. })
    ));
}

#[rstest]
fn rejected_spec_writes_nothing(workspace: Workspace) {
    let path = workspace.write_spec(r#"{"provider": "aws", "instances": [{"name": "web"}]}"#);
    let mut configurator = workspace.configurator();

    let err = configurator
        .configure_from_resources_json(&path)
        .expect_err("missing region and ami");

    assert!(matches!(err, SynthesisError::Spec(_)), "unexpected error: {err}");
    assert!(!configurator.is_configured());
    assert!(!workspace.root.join("work").exists());
}

#[rstest]
fn removing_configuration_is_idempotent(workspace: Workspace) {
    let path = workspace.write_spec(
        r#"{"provider": "aws", "instances": [{"name": "web", "region": "us-east-1", "ami": "ami-1"}]}"#,
    );
    let mut configurator = workspace.configurator();
    configurator
        .configure_from_resources_json(&path)
        .expect("configure");

    configurator.remove_configuration().expect("first removal");
    configurator.remove_configuration().expect("second removal");
    assert!(
        configurator
            .config_paths()
            .iter()
            .all(|path| !path.exists())
    );
}
