//! CLI argument definitions using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// AceFlow workflow assistant
///
/// Every command prints a `{success, result | error}` JSON envelope on
/// stdout. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "aceflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to <data dir>/config.toml)
    #[arg(long, global = true, env = "ACEFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory for state files and the memory database
    #[arg(long, global = true, env = "ACEFLOW_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one operation of the request/response contract
    Call {
        /// Operation name (initialize, advance, recall, process, ...)
        operation: String,

        /// Parameter object as JSON; `-` reads it from stdin
        #[arg(short, long)]
        params: Option<String>,
    },

    /// Run a full JSON request read from a file, or stdin when omitted
    Request {
        /// File holding `{"operation": ..., "params": ...}`
        file: Option<PathBuf>,
    },

    /// Check a JSON or YAML decision gate file
    ValidateGates {
        /// Gate definition file
        path: PathBuf,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Show version
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call_with_params() {
        let cli = Cli::try_parse_from([
            "aceflow",
            "--data-dir",
            "/tmp/aceflow",
            "call",
            "get_state",
            "--params",
            r#"{"project_id": "demo"}"#,
        ])
        .unwrap();

        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/aceflow")));
        match cli.command {
            Commands::Call { operation, params } => {
                assert_eq!(operation, "get_state");
                assert_eq!(params.as_deref(), Some(r#"{"project_id": "demo"}"#));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_validate_gates() {
        let cli = Cli::try_parse_from(["aceflow", "validate-gates", "gates.yaml"]).unwrap();
        assert!(matches!(cli.command, Commands::ValidateGates { .. }));
    }

    #[test]
    fn test_operation_is_required() {
        assert!(Cli::try_parse_from(["aceflow", "call"]).is_err());
    }
}
