//! Tests for end-to-end validation runs.

use std::rc::Rc;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::files;
use crate::suite::RerunPolicy;
use crate::terraform::{MAIN_FILE, PROVIDERS_FILE, RESOURCES_FILE};
use crate::test_support::{ScriptedRunner, SequentialHostnames, aws_instance_state, state_document};

const AWS_SPEC: &str = r#"{"provider": "aws", "instances": [
    {"name": "web", "region": "us-east-1", "ami": "ami-123"}
]}"#;

struct Harness {
    _tmp: TempDir,
    root: Utf8PathBuf,
    runner: ScriptedRunner,
    validator: CloudImageValidator<ScriptedRunner, ScriptedRunner>,
}

impl Harness {
    fn request(&self) -> ValidationRequest {
        ValidationRequest {
            resources_file: self.root.join("resources.json"),
            output_file: self.root.join("reports/junit.xml"),
            filter: None,
            parallel: false,
            debug: false,
        }
    }

    fn commands(&self) -> Vec<String> {
        self.runner
            .invocations()
            .iter()
            .map(|invocation| match invocation.args.get(1) {
                Some(subcommand) if invocation.program == "terraform" => {
                    format!("terraform {}", subcommand.to_string_lossy())
                }
                _ => invocation.program.clone(),
            })
            .collect()
    }

    fn config_files_exist(&self) -> bool {
        [MAIN_FILE, PROVIDERS_FILE, RESOURCES_FILE]
            .iter()
            .any(|name| self.root.join("work").join(name).exists())
    }
}

#[fixture]
fn harness() -> Harness {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("utf8 path: {}", path.display()));
    files::write(&root.join("resources.json"), AWS_SPEC)
        .unwrap_or_else(|err| panic!("write spec: {err}"));

    let config = ValidatorConfig {
        terraform_bin: String::from("terraform"),
        workdir: root.join("work").into_string(),
        ssh_public_key_file: String::from("/keys/id_rsa.pub"),
        ssh_config_file: root.join("ssh_config").into_string(),
        instances_json: root.join("instances.json").into_string(),
        test_runner_bin: String::from("py.test"),
        suite_dir: String::from("test_suite"),
        max_workers: RerunPolicy::DEFAULT_MAX_WORKERS,
        reruns: RerunPolicy::DEFAULT_RERUNS,
        reruns_delay: RerunPolicy::DEFAULT_RERUNS_DELAY,
        rerun_pattern: String::from(RerunPolicy::DEFAULT_PATTERN),
    };
    let runner = ScriptedRunner::new();
    let validator = CloudImageValidator::new(config, runner.clone(), runner.clone())
        .with_hostnames(Rc::new(SequentialHostnames::default()));
    Harness {
        _tmp: tmp,
        root,
        runner,
        validator,
    }
}

fn script_until_tests(runner: &ScriptedRunner) {
    runner.push_success();
    runner.push_success();
    runner.push_stdout(state_document(&[aws_instance_state("web", "i-1", "10.0.0.1")]));
}

#[rstest]
fn successful_run_returns_suite_exit_code_and_cleans_up(harness: Harness) {
    script_until_tests(&harness.runner);
    harness.runner.push_output(Some(0), "", "");
    harness.runner.push_success();

    let code = harness
        .validator
        .execute(&harness.request())
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    assert_eq!(code, 0);
    assert_eq!(
        harness.commands(),
        vec![
            "terraform init",
            "terraform apply",
            "terraform show",
            "py.test",
            "terraform destroy",
        ]
    );
    assert!(!harness.config_files_exist());
    assert!(!harness.root.join("instances.json").exists());
}

#[rstest]
fn failing_tests_still_tear_down(harness: Harness) {
    script_until_tests(&harness.runner);
    harness.runner.push_output(Some(1), "", "");
    harness.runner.push_success();

    let code = harness
        .validator
        .execute(&harness.request())
        .unwrap_or_else(|err| panic!("run should complete: {err}"));

    assert_eq!(code, 1);
    assert_eq!(harness.commands().last().map(String::as_str), Some("terraform destroy"));
}

#[rstest]
fn debug_run_keeps_handoff_artifact(harness: Harness) {
    script_until_tests(&harness.runner);
    harness.runner.push_output(Some(0), "", "");
    harness.runner.push_success();
    let request = ValidationRequest {
        debug: true,
        ..harness.request()
    };

    harness
        .validator
        .execute(&request)
        .unwrap_or_else(|err| panic!("run should succeed: {err}"));

    let instances = instance::read_instances_json(&harness.root.join("instances.json"))
        .unwrap_or_else(|err| panic!("handoff should remain: {err}"));
    assert!(instances.contains_key("aws_instance.web"));
}

#[rstest]
fn apply_failure_destroys_and_reports_deploy_error(harness: Harness) {
    harness.runner.push_success();
    harness.runner.push_failure(1, "quota exceeded");
    harness.runner.push_success();

    let err = harness
        .validator
        .execute(&harness.request())
        .expect_err("apply failure");

    assert!(matches!(err, ValidatorError::Deploy { .. }), "unexpected error: {err}");
    assert!(err.to_string().contains("quota exceeded"), "unexpected error: {err}");
    assert_eq!(
        harness.commands(),
        vec!["terraform init", "terraform apply", "terraform destroy"]
    );
    assert!(!harness.config_files_exist());
}

#[rstest]
fn teardown_failure_is_appended_to_primary_error(harness: Harness) {
    harness.runner.push_success();
    harness.runner.push_failure(1, "quota exceeded");
    harness.runner.push_failure(1, "still in use");

    let err = harness
        .validator
        .execute(&harness.request())
        .expect_err("apply failure");

    let message = err.to_string();
    assert!(message.contains("quota exceeded"), "unexpected error: {message}");
    assert!(
        message.contains("(teardown also failed:") && message.contains("still in use"),
        "unexpected error: {message}"
    );
    assert!(harness.config_files_exist(), "config is kept for a later destroy");
}

#[rstest]
fn teardown_failure_after_passing_tests_is_reported(harness: Harness) {
    script_until_tests(&harness.runner);
    harness.runner.push_output(Some(0), "", "");
    harness.runner.push_failure(1, "still in use");

    let err = harness
        .validator
        .execute(&harness.request())
        .expect_err("destroy failure");

    assert!(matches!(err, ValidatorError::Teardown(_)), "unexpected error: {err}");
}

#[rstest]
fn invalid_spec_runs_no_commands(harness: Harness) {
    files::write(&harness.root.join("resources.json"), r#"{"provider": "gcp", "instances": []}"#)
        .unwrap_or_else(|err| panic!("write spec: {err}"));

    let err = harness
        .validator
        .execute(&harness.request())
        .expect_err("invalid spec");

    assert!(matches!(err, ValidatorError::Configure { .. }), "unexpected error: {err}");
    assert!(harness.runner.invocations().is_empty());
    assert!(!harness.config_files_exist());
}

#[rstest]
fn destroy_tears_down_previous_run(harness: Harness) {
    files::write(&harness.root.join("work").join(MAIN_FILE), "{}")
        .unwrap_or_else(|err| panic!("write main: {err}"));
    harness.runner.push_success();

    harness
        .validator
        .destroy()
        .unwrap_or_else(|err| panic!("destroy should succeed: {err}"));

    assert_eq!(harness.commands(), vec!["terraform destroy"]);
    assert!(!harness.config_files_exist());
}

#[rstest]
#[case(None, "primary")]
#[case(Some("boom"), "primary (teardown also failed: boom)")]
fn teardown_note_is_appended_only_when_present(
    #[case] teardown: Option<&str>,
    #[case] expected: &str,
) {
    assert_eq!(
        append_teardown_note(String::from("primary"), teardown.as_ref()),
        expected
    );
}
