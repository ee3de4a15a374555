//! CLI argument parsing definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "patchy", author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Overrides for where patches live and where the level is tracked
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Directory holding {level}-forward.sql and {level}-reverse.sql files
    #[arg(long, value_name = "DIR")]
    pub patch_dir: Option<PathBuf>,

    /// Table holding the tracked level
    #[arg(long, value_name = "NAME")]
    pub property_table: Option<String>,

    /// Row key of the tracked level
    #[arg(long, value_name = "KEY")]
    pub patch_key: Option<String>,

    /// Database URL (sqlite://..., postgres://...)
    #[arg(long, value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Move the database to a patch level
    Migrate {
        /// Target patch level
        #[arg(long, value_name = "N", allow_negative_numbers = true)]
        level: i64,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Show the steps a migration would take, without changing anything
    Plan {
        /// Target patch level
        #[arg(long, value_name = "N", allow_negative_numbers = true)]
        level: i64,

        #[command(flatten)]
        target: TargetArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the tracked level and the available patches
    Status {
        #[command(flatten)]
        target: TargetArgs,

        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print a sample configuration file
    Generate {
        /// Write to this file instead of stdout
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },
}
