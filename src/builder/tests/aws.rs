//! AWS builder graph shape.

use rstest::rstest;
use serde_json::json;

use super::*;
use crate::graph::ResourceRef;

fn build(document: &str) -> (ProviderGraph, ResourceGraph) {
    let builder = AwsConfigBuilder::new(&spec(document), &context()).expect("aws builder");
    let providers = builder.build_providers().expect("providers");
    let resources = builder.build_resources(&providers).expect("resources");
    (providers, resources)
}

#[test]
fn single_instance_yields_provider_key_pair_and_instance() {
    let (providers, resources) = build(AWS_ONE);

    assert_eq!(
        providers.to_document(),
        json!({"provider": {"aws": [{"alias": "us-east-1", "region": "us-east-1"}]}})
    );

    let key_pair = resources
        .get(AwsConfigBuilder::KEY_PAIR, "us-east-1-key")
        .expect("key pair");
    assert_eq!(key_pair.get("provider"), Some(&json!("aws.us-east-1")));
    assert_eq!(
        key_pair.get("key_name"),
        Some(&json!("cloudimgval-us-east-1-key"))
    );
    assert_eq!(
        key_pair.get("public_key"),
        Some(&json!("${file(\"/keys/id_rsa.pub\")}"))
    );

    let instance = resources
        .get(AwsConfigBuilder::INSTANCE, "web-1")
        .expect("instance keyed by sanitised name");
    assert_eq!(instance.get("ami"), Some(&json!("ami-123")));
    assert_eq!(instance.get("instance_type"), Some(&json!("t3.micro")));
    assert_eq!(
        instance.get("key_name"),
        Some(&json!("${aws_key_pair.us-east-1-key.key_name}"))
    );
    assert_eq!(instance.get("tags"), Some(&json!({"Name": "web.1"})));
    assert_eq!(
        instance.dependencies(),
        [ResourceRef::new("aws_key_pair", "us-east-1-key")]
    );
}

#[rstest]
#[case(1)]
#[case(3)]
fn instances_in_one_region_share_a_key_pair(#[case] count: usize) {
    let instances: Vec<String> = (0..count)
        .map(|n| {
            format!(
                r#"{{"name": "node{n}", "region": "eu-west-1", "ami": "ami-9", "instance_type": "t3.large"}}"#
            )
        })
        .collect();
    let document = format!(
        r#"{{"provider": "aws", "instances": [{}]}}"#,
        instances.join(",")
    );
    let (providers, resources) = build(&document);

    assert_eq!(providers.aliases(), ["eu-west-1"]);
    assert_eq!(resources.count(AwsConfigBuilder::KEY_PAIR), 1);
    assert_eq!(resources.count(AwsConfigBuilder::INSTANCE), count);
    for instance in resources.resources_of(AwsConfigBuilder::INSTANCE) {
        assert_eq!(instance.get("instance_type"), Some(&json!("t3.large")));
        assert_eq!(
            instance.dependencies(),
            [ResourceRef::new("aws_key_pair", "eu-west-1-key")]
        );
    }
}

#[test]
fn each_region_gets_provider_and_key_pair() {
    let (providers, resources) = build(
        r#"{"provider": "aws", "instances": [
            {"name": "a", "region": "us-east-1", "ami": "ami-1"},
            {"name": "b", "region": "eu-west-1", "ami": "ami-2"},
            {"name": "c", "region": "us-east-1", "ami": "ami-3"}
        ]}"#,
    );
    assert_eq!(providers.aliases(), ["us-east-1", "eu-west-1"]);
    assert_eq!(resources.count(AwsConfigBuilder::KEY_PAIR), 2);
    let c = resources.get(AwsConfigBuilder::INSTANCE, "c").expect("c");
    assert_eq!(c.get("provider"), Some(&json!("aws.us-east-1")));
}

#[test]
fn missing_provider_entry_is_reported() {
    let builder = AwsConfigBuilder::new(&spec(AWS_ONE), &context()).expect("aws builder");
    let err = builder
        .build_resources(&ProviderGraph::new(AwsConfigBuilder::PLUGIN))
        .expect_err("no provider for us-east-1");
    assert_eq!(
        err,
        BuildError::MissingProvider {
            instance: String::from("web.1"),
            plugin: String::from("aws"),
            region: String::from("us-east-1"),
        }
    );
}

#[test]
fn resource_document_emits_depends_on() {
    let (_, resources) = build(AWS_ONE);
    let document = resources.to_document();
    assert_eq!(
        document["resource"]["aws_instance"]["web-1"]["depends_on"],
        json!(["aws_key_pair.us-east-1-key"])
    );
    assert!(
        document["resource"]["aws_key_pair"]["us-east-1-key"]
            .get("depends_on")
            .is_none()
    );
}
