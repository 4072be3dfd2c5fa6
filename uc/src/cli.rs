//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// updatecoord - periodic refresh coordinator
#[derive(Parser)]
#[command(
    name = "uc",
    about = "Keep shell-command data sources fresh and print every update",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run coordinators and print updates until Ctrl-C
    Run {
        /// Sources to run (all configured sources when omitted)
        #[arg(value_name = "NAME")]
        names: Vec<String>,
    },

    /// Refresh one source once and print the result
    Once {
        /// Source name
        name: String,
    },

    /// List configured sources
    List,
}
