//! Command runner abstraction used to drive external tools.
//!
//! Terraform and the test runner are both invoked through [`CommandRunner`]
//! so tests can script their outcomes without spawning processes.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::thread;

use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Renders the exit status for error messages.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Errors raised when a command cannot be executed at all.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a started command cannot be waited on, so its exit status
    /// is unknown.
    #[error("failed to wait for {program}: {message}")]
    Wait {
        /// Command that was running.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

impl RunnerError {
    fn spawn(program: &str, err: &io::Error) -> Self {
        Self::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        }
    }

    fn wait(program: &str, err: &io::Error) -> Self {
        Self::Wait {
            program: program.to_owned(),
            message: err.to_string(),
        }
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started, or
    /// [`RunnerError::Wait`] if its exit status cannot be collected.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| RunnerError::spawn(program, &err))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Command runner that forwards child output to the terminal while also
/// capturing it, so long-running tools stay visible to the operator.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamingCommandRunner;

impl CommandRunner for StreamingCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| RunnerError::spawn(program, &err))?;

        let child_stderr = child.stderr.take();
        let stderr_forwarder = thread::spawn(move || forward(child_stderr, io::stderr()));
        let stdout = forward(child.stdout.take(), io::stdout());
        let stderr = stderr_forwarder.join().unwrap_or_default();
        let status = child
            .wait()
            .map_err(|err| RunnerError::wait(program, &err))?;

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn forward<R: Read, W: Write>(source: Option<R>, mut sink: W) -> String {
    let Some(mut reader) = source else {
        return String::new();
    };
    let mut captured = Vec::new();
    let mut buffer = [0_u8; 4096];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => {
                let chunk = buffer.get(..read).unwrap_or_default();
                captured.extend_from_slice(chunk);
                sink.write_all(chunk).and_then(|()| sink.flush()).ok();
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&captured).into_owned()
}

/// Renders a program and its arguments as a shell-escaped command line for
/// logging.
#[must_use]
pub fn render_command_line(program: &str, args: &[OsString]) -> String {
    let mut rendered = String::from(program);
    for arg in args {
        let lossy = arg.to_string_lossy().into_owned();
        let escaped = shell_escape::unix::escape(lossy.into());
        rendered.push(' ');
        rendered.push_str(escaped.as_ref());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some(0), true, "0")]
    #[case(Some(3), false, "3")]
    #[case(None, false, "unknown")]
    fn command_output_reports_status(
        #[case] code: Option<i32>,
        #[case] success: bool,
        #[case] text: &str,
    ) {
        let output = CommandOutput {
            code,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(output.is_success(), success);
        assert_eq!(output.status_text(), text);
    }

    #[test]
    fn render_command_line_escapes_arguments() {
        let args = vec![
            OsString::from("-k"),
            OsString::from("test a"),
            OsString::from("--html"),
        ];
        assert_eq!(
            render_command_line("py.test", &args),
            "py.test -k 'test a' --html"
        );
    }

    #[rstest]
    #[case("printf out && printf err 1>&2", Some(0), "out", "err")]
    #[case("printf out && printf err 1>&2; exit 42", Some(42), "out", "err")]
    #[case("exit 7", Some(7), "", "")]
    fn streaming_runner_captures_forwarded_output(
        #[case] script: &str,
        #[case] code: Option<i32>,
        #[case] stdout: &str,
        #[case] stderr: &str,
    ) {
        let output = StreamingCommandRunner
            .run("sh", &[OsString::from("-c"), OsString::from(script)])
            .expect("sh should run");
        assert_eq!(output.code, code);
        assert_eq!(output.stdout, stdout);
        assert_eq!(output.stderr, stderr);
    }

    #[test]
    fn streaming_runner_reports_spawn_failure() {
        let err = StreamingCommandRunner
            .run("cloudval-definitely-missing-binary", &[])
            .expect_err("missing binary should fail to spawn");
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[test]
    fn process_runner_reports_spawn_failure() {
        let err = ProcessCommandRunner
            .run("cloudval-definitely-missing-binary", &[])
            .expect_err("missing binary should fail to spawn");
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[test]
    fn wait_failures_do_not_claim_a_spawn_failure() {
        let err = RunnerError::wait(
            "terraform",
            &io::Error::other("no child processes"),
        );
        assert_eq!(
            err,
            RunnerError::Wait {
                program: String::from("terraform"),
                message: String::from("no child processes"),
            }
        );
        let rendered = err.to_string();
        assert_eq!(rendered, "failed to wait for terraform: no child processes");
        assert!(!rendered.contains("spawn"));
    }
}
