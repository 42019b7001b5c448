//! regsync CLI - run a register center producer or consumer from the shell.
//!
//! # Commands
//!
//! - `regsync watch` - Watch the register center and print every record batch
//! - `regsync register` - Persist one metadata record (and its endpoint)
//! - `regsync check` - Validate and print the resolved configuration

use clap::{Parser, Subcommand};
use colored::Colorize;
use regsync_log::LogConfig;
use std::path::PathBuf;

mod commands;
mod error;

use commands::{check, register, watch};
use error::{CliError, CliResult};

/// regsync - service registration sync
#[derive(Parser)]
#[command(name = "regsync")]
#[command(author = "Pegasus Heavy Industries LLC")]
#[command(version)]
#[command(about = "Register interfaces with, and watch, a service register center")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Register center config file (JSON or TOML)
    #[arg(short, long, global = true, env = "REGSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Load environment variables from this .env file first
    #[arg(long, global = true)]
    env_file: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the register center until Ctrl+C
    #[command(alias = "w")]
    Watch {
        /// Print records as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Persist one metadata record
    #[command(alias = "r")]
    Register {
        /// Record as inline JSON
        #[arg(long, conflicts_with = "record_file")]
        record: Option<String>,

        /// Read the record from a JSON file
        #[arg(long)]
        record_file: Option<PathBuf>,

        /// Keep the connection (and tree endpoints) alive until Ctrl+C
        #[arg(long)]
        hold: bool,
    },

    /// Validate and print the resolved configuration
    #[command(visible_alias = "config")]
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    // REGSYNC_LOG_* may come from the .env file
    if let Err(e) = commands::load_env_file(cli.env_file.as_deref()) {
        fail(e);
    }

    let mut log_config = LogConfig::from_env();
    if cli.verbose {
        log_config.debug = true;
    }
    if cli.no_color {
        log_config.color = false;
    }
    regsync_log::init_with(&log_config);

    let config = cli.config.as_deref();

    let result: CliResult<()> = match cli.command {
        Commands::Watch { json } => watch::run(config, json).await,
        Commands::Register {
            record,
            record_file,
            hold,
        } => {
            register::run(register::RegisterArgs {
                config,
                record: record.as_deref(),
                record_file: record_file.as_deref(),
                hold,
            })
            .await
        }
        Commands::Check => check::execute(config),
    };

    if let Err(e) = result {
        fail(e);
    }
}

fn fail(e: CliError) -> ! {
    eprintln!("\n  {} {}\n", "Error:".red().bold(), e);
    std::process::exit(1);
}
