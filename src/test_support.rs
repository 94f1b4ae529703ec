//! Test support utilities shared across unit and integration tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::rc::Rc;

use serde_json::{Value, json};

use crate::builder::HostnameSource;
use crate::process::{CommandOutput, CommandRunner, RunnerError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<Result<CommandOutput, RunnerError>>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns `true` when any argument equals `needle`.
    #[must_use]
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|arg| arg == needle)
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful exit status with stdout text.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes a response that fails before the program starts.
    pub fn push_spawn_failure(&self, message: impl Into<String>) {
        self.responses.borrow_mut().push_back(Err(RunnerError::Spawn {
            program: String::from("scripted"),
            message: message.into(),
        }));
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(Ok(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }));
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| {
                Err(RunnerError::Spawn {
                    program: program.to_owned(),
                    message: String::from("no scripted response available"),
                })
            })
    }
}

/// Hostname source yielding `vm-1`, `vm-2`, ... for deterministic Azure
/// graphs.
#[derive(Debug, Default)]
pub struct SequentialHostnames {
    next: Cell<usize>,
}

impl HostnameSource for SequentialHostnames {
    fn next_hostname(&self) -> String {
        let index = self.next.get() + 1;
        self.next.set(index);
        format!("vm-{index}")
    }
}

/// Produces a `terraform show -json` document holding the given root
/// resources.
#[must_use]
pub fn state_document(resources: &[Value]) -> String {
    json!({
        "format_version": "1.0",
        "values": { "root_module": { "resources": resources } }
    })
    .to_string()
}

/// Produces an `aws_instance` state resource.
#[must_use]
pub fn aws_instance_state(name: &str, id: &str, public_ip: &str) -> Value {
    json!({
        "address": format!("aws_instance.{name}"),
        "mode": "managed",
        "type": "aws_instance",
        "name": name,
        "values": {
            "id": id,
            "public_ip": public_ip,
            "public_dns": format!("ec2-{}.compute-1.amazonaws.com", public_ip.replace('.', "-")),
            "availability_zone": "us-east-1a",
            "ami": "ami-123",
        }
    })
}

/// Produces an `azurerm_linux_virtual_machine` state resource using a
/// marketplace image.
#[must_use]
pub fn azure_vm_state(name: &str, public_ip: &str) -> Value {
    json!({
        "address": format!("azurerm_linux_virtual_machine.{name}"),
        "mode": "managed",
        "type": "azurerm_linux_virtual_machine",
        "name": name,
        "values": {
            "id": format!("/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.Compute/virtualMachines/{name}"),
            "computer_name": name,
            "admin_username": "azure",
            "public_ip_address": public_ip,
            "location": "eastus",
            "source_image_id": null,
            "source_image_reference": [{
                "publisher": "Canonical",
                "offer": "UbuntuServer",
                "sku": "18.04-LTS",
                "version": "latest",
            }],
        }
    })
}
