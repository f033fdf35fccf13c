//! Command-line interface definitions using clap

use clap::{Parser, Subcommand};

/// Caliban - first-party session attribution collector
#[derive(Parser, Debug)]
#[command(name = "caliban")]
#[command(version)]
#[command(about = "First-party, cross-domain session attribution collector", long_about = None)]
pub struct Cli {
    /// Configuration file path (default: config.toml)
    #[arg(long, short = 'c', global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the collector HTTP server (default)
    Serve,

    /// Print a sample configuration file
    GenerateConfig {
        /// Write to this file instead of stdout
        output: Option<String>,
    },

    /// Print a stored session record
    Inspect {
        session_id: String,

        /// Print the debug snapshot instead of the session record
        #[arg(long)]
        debug: bool,
    },
}
