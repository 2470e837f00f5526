//! Command-line interface

use clap::{Parser, Subcommand};
use speccompiler_config::Config;
use speccompiler_engine::Driver;
use speccompiler_utils::ExitCode;
use speccompiler_utils::logging::init_tracing;
use std::fs;
use std::path::PathBuf;
use tracing::error;

#[derive(Parser, Debug)]
#[command(
    name = "speccompiler",
    about = "Compile structured Markdown specifications into documents",
    version
)]
struct Cli {
    /// Project root directory (contains speccompiler.toml)
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    /// Explicit configuration file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build all configured documents (default)
    Build {
        /// Rebuild every document, ignoring the incremental cache
        #[arg(long)]
        force: bool,
    },
    /// Delete the build directory state (store, render outputs)
    Clean,
}

/// Run the CLI. Handles all output; the caller only maps the error to a
/// process exit code.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_root = cli
        .project
        .canonicalize()
        .map_err(|e| {
            error!("project directory '{}': {e}", cli.project.display());
            ExitCode::CLI_ARGS
        })?;
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| project_root.join("speccompiler.toml"));

    match cli.command.unwrap_or(Command::Build { force: false }) {
        Command::Build { force } => build(project_root, &config_path, force),
        Command::Clean => clean(&project_root, &config_path),
    }
}

fn build(project_root: PathBuf, config_path: &PathBuf, force: bool) -> Result<(), ExitCode> {
    let config = Config::load(config_path).map_err(|e| {
        error!("{e}");
        ExitCode::CLI_ARGS
    })?;
    let driver = Driver::new(project_root, config, force);
    let summary = driver.run().map_err(|e| {
        error!("{e:#}");
        ExitCode::FAILURE
    })?;
    if summary.success() {
        Ok(())
    } else {
        Err(ExitCode::FAILURE)
    }
}

fn clean(project_root: &PathBuf, config_path: &PathBuf) -> Result<(), ExitCode> {
    let config = Config::load(config_path).map_err(|e| {
        error!("{e}");
        ExitCode::CLI_ARGS
    })?;
    let build_dir = project_root.join(&config.output_dir);
    if build_dir.is_dir() {
        fs::remove_dir_all(&build_dir).map_err(|e| {
            error!("failed to remove '{}': {e}", build_dir.display());
            ExitCode::FAILURE
        })?;
    }
    Ok(())
}
