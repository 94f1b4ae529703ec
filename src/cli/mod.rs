//! Command-line interface definitions for the `cloudval` binary.
//!
//! The parser lives in its own module so the build script can render the
//! manual page from the same definitions.

use clap::Parser;

/// Top-level CLI for the `cloudval` binary.
#[derive(Debug, Parser)]
#[command(
    name = "cloudval",
    about = "Provision throwaway cloud instances, validate an image against them, and tear them down",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Provision instances, run the test suite, and clean up.
    #[command(name = "run", about = "Provision instances, run the test suite, and clean up")]
    Run(RunCommand),
    /// Destroy infrastructure left behind by an interrupted run.
    #[command(name = "destroy", about = "Destroy infrastructure left behind by an interrupted run")]
    Destroy(DestroyCommand),
}

/// Arguments for the `cloudval run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// JSON document describing the provider and the instances to create.
    #[arg(long, value_name = "PATH")]
    pub(crate) resources_file: String,
    /// Destination of the JUnit XML report.
    ///
    /// An HTML report with the same stem is written alongside it.
    #[arg(long, value_name = "PATH")]
    pub(crate) output_file: String,
    /// Only run tests matching this expression.
    #[arg(long, value_name = "EXPR")]
    pub(crate) filter: Option<String>,
    /// Test instances in parallel, retrying tests that fail on transient
    /// connection errors.
    #[arg(long)]
    pub(crate) parallel: bool,
    /// Log the synthesised configuration, run tests verbosely, and keep the
    /// instance hand-off file.
    #[arg(long)]
    pub(crate) debug: bool,
}

/// Arguments for the `cloudval destroy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DestroyCommand {
    /// Enable debug logging.
    #[arg(long)]
    pub(crate) debug: bool,
}
