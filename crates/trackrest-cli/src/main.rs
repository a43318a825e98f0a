//! Trackrest CLI - Command-line client for tracking and model-registry services
//!
//! This is the main entry point for the trackrest CLI, providing commands
//! for dispatching descriptor-defined requests, raw API calls and artifact
//! transfers against pre-signed storage URLs.

mod cli;
mod config;
mod error;
mod handlers;
mod logging;
mod output;

use cli::{Cli, Commands};
use colored::control;
use config::Config;
use error::Result;
use logging::{redaction, timing::Timer, LoggingConfig};
use output::OutputWriter;
use std::process;
use tracing::instrument;
use tracing_appender::non_blocking::WorkerGuard;

// The HTTP client is blocking, so there is no async runtime here.
fn main() {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    control::set_override(cli.use_color());

    let exit_code = match Config::load_with_file(cli.config.as_deref()) {
        Ok(config) => {
            let guard = match init_logging(&cli, &config) {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("Failed to initialize logging: {}", e);
                    None
                }
            };

            let code = report(run(cli, config));
            // Flush file logs before exiting
            drop(guard);
            code
        }
        Err(e) => report(Err(e)),
    };

    process::exit(exit_code);
}

fn report(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            let message = error::format_error(&e, control::SHOULD_COLORIZE.should_colorize());
            eprintln!("{}", redaction::redact_sensitive(&message));

            if e.should_show_help() {
                eprintln!("\nFor more information, try '--help'");
            }

            e.exit_code()
        }
    }
}

/// Main application logic
#[instrument(skip_all, fields(command = ?cli.command))]
fn run(cli: Cli, mut config: Config) -> Result<()> {
    let _timer = Timer::new("cli_execution");

    config.apply_overrides(cli.host.clone(), cli.max_retries, cli.timeout);

    let mut output = OutputWriter::new(cli.output, cli.use_color(), cli.quiet);

    tracing::info!(verbosity = cli.verbosity_level(), "Executing command");

    match cli.command {
        Commands::Call(args) => handlers::handle_call(args, &config, &mut output),
        Commands::Request(args) => handlers::handle_request(args, &config, &mut output),
        Commands::Download(args) => handlers::handle_download(args, &config, &mut output),
        Commands::Upload(args) => handlers::handle_upload(args, &config, &mut output),
        Commands::Endpoints(args) => handlers::handle_endpoints(args, &mut output),
        Commands::Config(args) => {
            handlers::handle_config(args, &config, cli.config.as_deref(), &mut output)
        }
        Commands::Completions(args) => handlers::handle_completions(args),
    }
}

/// Initialize the logging system
///
/// Precedence, lowest first: defaults, config file, environment, `-v`/`-q`.
fn init_logging(cli: &Cli, config: &Config) -> Result<Option<WorkerGuard>> {
    let mut logging_config = LoggingConfig::default();
    logging_config.apply_settings(&config.logging);
    logging_config.merge_with_env();
    logging_config.apply_verbosity(cli.verbosity_level());

    if cli.quiet {
        logging_config.level = "error".to_string();
        logging_config.console = false;
    }

    logging::init_logging(logging_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["trackrest", "-vv", "endpoints", "-d", "service.yaml"]);
        assert_eq!(cli.verbosity_level(), 2);

        let cli = Cli::parse_from(["trackrest", "--quiet", "config", "show"]);
        assert_eq!(cli.verbosity_level(), 0);
    }

    #[test]
    fn test_report_maps_errors_to_exit_codes() {
        assert_eq!(report(Ok(())), 0);
        assert_eq!(report(Err(error::Error::invalid_args("bad"))), 9);
    }
}
