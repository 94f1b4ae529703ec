//! Tests for configuration synthesis, lifecycle control and state
//! extraction.

use std::rc::Rc;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use super::*;
use crate::test_support::SequentialHostnames;

mod configurator;

const AWS_SPEC: &str = r#"{"provider": "aws", "instances": [
    {"name": "web.1", "region": "us-east-1", "ami": "ami-123"},
    {"name": "db", "region": "us-east-1", "ami": "ami-123", "username": "fedora"}
]}"#;

const AZURE_SPEC: &str = r#"{"provider": "azure", "subscription_id": "sub-1", "resource_group": "rg-1",
    "instances": [{"name": "vm", "location": "East US", "image_uri": "/img"}]}"#;

fn workdir() -> (TempDir, Utf8PathBuf) {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("utf8 path: {}", path.display()));
    (tmp, path)
}

fn configurator(workdir: &Utf8PathBuf) -> TerraformConfigurator {
    TerraformConfigurator::new(workdir.clone(), "/keys/id_rsa.pub")
        .with_hostnames(Rc::new(SequentialHostnames::default()))
}

fn configured(document: &str) -> (TempDir, TerraformConfigurator) {
    let (tmp, path) = workdir();
    let mut configurator = configurator(&path);
    let spec = crate::spec::ResourceSpec::from_json(document)
        .unwrap_or_else(|err| panic!("spec should parse: {err}"));
    configurator
        .configure_from_spec(spec)
        .unwrap_or_else(|err| panic!("configure: {err}"));
    (tmp, configurator)
}
