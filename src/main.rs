//! Binary entry point for the cloudval CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use cloudval::{
    CloudImageValidator, ConfigError, ProcessCommandRunner, StreamingCommandRunner,
    ValidationRequest, ValidatorConfig, ValidatorError,
};

mod cli;

use cli::{Cli, RunCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validator(#[from] ValidatorError),
}

fn main() {
    let cli = Cli::parse();
    init_tracing(debug_requested(&cli));
    let exit_code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

const fn debug_requested(cli: &Cli) -> bool {
    match cli {
        Cli::Run(command) => command.debug,
        Cli::Destroy(command) => command.debug,
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Run(command) => run_command(command),
        Cli::Destroy(_) => destroy_command(),
    }
}

fn load_config() -> Result<ValidatorConfig, CliError> {
    let config = ValidatorConfig::load_without_cli_args()?;
    config.validate()?;
    Ok(config)
}

fn validator(
    config: ValidatorConfig,
) -> CloudImageValidator<ProcessCommandRunner, StreamingCommandRunner> {
    CloudImageValidator::new(config, ProcessCommandRunner, StreamingCommandRunner)
}

fn run_command(args: RunCommand) -> Result<i32, CliError> {
    let request = run_request(args);
    let code = validator(load_config()?).execute(&request)?;
    Ok(code)
}

fn run_request(args: RunCommand) -> ValidationRequest {
    ValidationRequest {
        resources_file: Utf8PathBuf::from(args.resources_file),
        output_file: Utf8PathBuf::from(args.output_file),
        filter: args.filter,
        parallel: args.parallel,
        debug: args.debug,
    }
}

fn destroy_command() -> Result<i32, CliError> {
    validator(load_config()?).destroy()?;
    Ok(0)
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
