//! # agent-failure
//!
//! Runs the DAOS agent failure scenario from a TOML config.
//!
//! ## Commands
//!
//! - `run`: provision, inject, verify and report
//! - `check`: load and validate a config
//! - `plan`: print the commands `run` would issue
//!
//! ## Example
//!
//! ```bash
//! # Validate the config
//! agent-failure check --config agent_failure.toml
//!
//! # See what will be executed
//! agent-failure plan --config agent_failure.toml
//!
//! # Run the scenario, JSON outcome on stdout
//! agent-failure run --config agent_failure.toml --json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use fault_core::Config;

mod commands;

use commands::{check, plan, run};

/// Agent failure injection and recovery verification.
#[derive(Parser, Debug)]
#[command(name = "agent-failure")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Scenario configuration file
    #[arg(long, short, global = true, default_value = "agent_failure.toml")]
    config: PathBuf,

    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scenario
    Run {
        /// Print the outcome as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Load and validate the config
    Check,

    /// Print the commands the scenario would issue, without running them
    Plan,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Run { json } => run::run(&config, json).await,
        Commands::Check => {
            check::run(&config);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Plan => {
            plan::run(&config);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Log to stderr so stdout stays machine-readable.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
