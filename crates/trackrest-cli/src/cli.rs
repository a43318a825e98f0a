//! Command-line interface argument parsing and definitions
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand, ValueEnum};
use is_terminal::IsTerminal;
use std::path::PathBuf;

/// Trackrest CLI - Talk to a tracking service from the shell
///
/// Dispatches logical requests described by a service descriptor, issues raw
/// verified requests, and transfers artifacts to and from pre-signed storage
/// URLs, all with the same retry behavior as the library.
#[derive(Parser, Debug)]
#[command(
    name = "trackrest",
    version,
    author,
    about,
    long_about = None,
    propagate_version = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Enable verbose output (can be used multiple times for increased verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "TRACKREST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format for results
    #[arg(short, long, value_enum, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Tracking server URI, overrides config and environment
    #[arg(long, global = true, value_name = "URI")]
    pub host: Option<String>,

    /// Maximum retries per request, overrides config
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Per-attempt timeout in seconds, overrides config
    #[arg(long, global = true, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// The subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispatch a request kind defined in a service descriptor
    Call(CallArgs),

    /// Send a verified request to an arbitrary endpoint path
    Request(RequestArgs),

    /// Download an object from a pre-signed storage URL
    Download(DownloadArgs),

    /// Upload a file to a pre-signed storage URL
    Upload(UploadArgs),

    /// List the request kinds of a service descriptor
    Endpoints(EndpointsArgs),

    /// Inspect the effective configuration
    Config(ConfigArgs),

    /// Generate shell completions for the specified shell
    Completions(CompletionsArgs),
}

/// Arguments for the call command
#[derive(Parser, Debug)]
pub struct CallArgs {
    /// Request kind, e.g. GetRun
    #[arg(value_name = "KIND")]
    pub kind: String,

    /// Service descriptor (JSON or YAML)
    #[arg(short, long, env = "TRACKREST_DESCRIPTOR")]
    pub descriptor: PathBuf,

    /// JSON payload
    #[arg(long, conflicts_with = "data_file")]
    pub data: Option<String>,

    /// File holding the JSON payload
    #[arg(long, value_name = "FILE")]
    pub data_file: Option<PathBuf>,
}

/// Arguments for the request command
#[derive(Parser, Debug)]
pub struct RequestArgs {
    /// Endpoint path, e.g. /api/2.0/tracking/runs/get
    #[arg(value_name = "ENDPOINT")]
    pub endpoint: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// JSON payload; sent as query parameters for GET
    #[arg(long)]
    pub data: Option<String>,

    /// Write the raw response body to a file instead of printing it
    #[arg(long = "save-to", value_name = "OUTPUT_FILE")]
    pub save_to: Option<PathBuf>,
}

/// Arguments for the download command
#[derive(Parser, Debug)]
pub struct DownloadArgs {
    /// Pre-signed URL of the object
    #[arg(value_name = "URL")]
    pub url: String,

    /// Destination file
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub file: PathBuf,

    /// Retries for transient status codes
    #[arg(long)]
    pub retry_attempts: Option<u32>,
}

/// Arguments for the upload command
#[derive(Parser, Debug)]
pub struct UploadArgs {
    /// Pre-signed URL to upload to
    #[arg(value_name = "URL")]
    pub url: String,

    /// File to upload
    #[arg(short = 'f', long = "file", value_name = "FILE")]
    pub file: PathBuf,

    /// Extra header as NAME:VALUE, may be repeated
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    /// Retries for transient status codes
    #[arg(long)]
    pub retry_attempts: Option<u32>,
}

/// Arguments for the endpoints command
#[derive(Parser, Debug)]
pub struct EndpointsArgs {
    /// Service descriptor (JSON or YAML)
    #[arg(short, long, env = "TRACKREST_DESCRIPTOR")]
    pub descriptor: PathBuf,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration with secrets redacted
    Show(ConfigShowArgs),

    /// List the configuration files that are searched
    Paths,
}

/// Arguments for config show
#[derive(Parser, Debug)]
pub struct ConfigShowArgs {
    /// Show configuration in specified format
    #[arg(short, long, value_enum, default_value = "yaml")]
    pub format: ConfigFormat,
}

/// Configuration file formats
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    /// TOML format
    Toml,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// Arguments for generating shell completions
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Output format options
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Human,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
    /// Pretty-printed JSON output
    JsonPretty,
}

/// Supported shells for completion generation
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective verbosity level (considering quiet flag)
    pub fn verbosity_level(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose
        }
    }

    /// Check if colored output should be used
    pub fn use_color(&self) -> bool {
        !self.no_color && std::io::stdout().is_terminal()
    }
}

impl Shell {
    /// Convert to clap_complete shell type
    pub fn to_clap_shell(self) -> clap_complete::Shell {
        match self {
            Shell::Bash => clap_complete::Shell::Bash,
            Shell::Zsh => clap_complete::Shell::Zsh,
            Shell::Fish => clap_complete::Shell::Fish,
            Shell::PowerShell => clap_complete::Shell::PowerShell,
            Shell::Elvish => clap_complete::Shell::Elvish,
        }
    }
}
