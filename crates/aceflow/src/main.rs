//! aceflow - AceFlow workflow assistant CLI
//!
//! A thin shell over the core's request/response contract. Responses are
//! printed to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;

use cli::{Cli, Commands};

fn main() -> Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("aceflow=info".parse()?))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = config::Config::load(cli.config.as_deref(), cli.data_dir.as_deref())?;

    // Execute command
    let response = match cli.command {
        Commands::Call { operation, params } => {
            let manager = commands::open_manager(&config, cli.data_dir)?;
            commands::call(&manager, &operation, params.as_deref())?
        }
        Commands::Request { file } => {
            let manager = commands::open_manager(&config, cli.data_dir)?;
            commands::request(&manager, file.as_deref())?
        }
        Commands::ValidateGates { path } => commands::validate_gates(&path),
        Commands::Config => {
            let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            print!("{}", content);
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Version => {
            println!("aceflow {}", env!("CARGO_PKG_VERSION"));
            return Ok(ExitCode::SUCCESS);
        }
    };

    println!(
        "{}",
        serde_json::to_string_pretty(&response).context("Failed to serialize response")?
    );
    Ok(if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
