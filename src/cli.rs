use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "request-insights", version, about = "Request log aggregation and search")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the insights server (default)
    Start,

    /// Test configuration file validity
    Test,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Search stored request logs for one user
    Search(SearchArgs),

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display the effective configuration as TOML
    Show,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SearchArgs {
    /// Owning user id
    #[arg(short, long)]
    pub user: String,

    /// HTTP method of the monitored request
    #[arg(long)]
    pub method: Option<String>,

    /// Substring of the monitored request URL
    #[arg(long)]
    pub url: Option<String>,

    /// Exact status code
    #[arg(long)]
    pub status: Option<String>,

    /// RFC 3339 timestamp or YYYY-MM-DD
    #[arg(long)]
    pub start_date: Option<String>,

    /// RFC 3339 timestamp or YYYY-MM-DD
    #[arg(long)]
    pub end_date: Option<String>,

    #[arg(long)]
    pub min_response_time: Option<String>,

    #[arg(long)]
    pub max_response_time: Option<String>,

    /// true or false
    #[arg(long)]
    pub is_error: Option<String>,

    /// Page size, capped at search.max_results
    #[arg(long)]
    pub limit: Option<String>,

    /// Cursor printed after the previous page
    #[arg(long)]
    pub cursor: Option<String>,

    /// Output raw JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    /// Get the command to execute, defaulting to Start if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Start)
    }
}
