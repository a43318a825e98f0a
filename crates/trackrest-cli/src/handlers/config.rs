//! Configuration command handlers

use crate::cli::{ConfigAction, ConfigArgs, ConfigFormat, ConfigShowArgs};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::OutputWriter;
use std::path::Path;

/// Handle the config command
pub fn handle_config(
    args: ConfigArgs,
    config: &Config,
    explicit_path: Option<&Path>,
    output: &mut OutputWriter,
) -> Result<()> {
    match args.action {
        ConfigAction::Show(show_args) => handle_config_show(show_args, config, output),
        ConfigAction::Paths => handle_config_paths(explicit_path, output),
    }
}

/// Print the effective configuration with secrets masked
fn handle_config_show(
    args: ConfigShowArgs,
    config: &Config,
    output: &mut OutputWriter,
) -> Result<()> {
    let redacted = config.redacted();
    let content = match args.format {
        ConfigFormat::Toml => toml::to_string_pretty(&redacted)
            .map_err(|e| Error::other(format!("Failed to serialize config as TOML: {}", e)))?,
        ConfigFormat::Json => serde_json::to_string_pretty(&redacted)?,
        ConfigFormat::Yaml => serde_yaml::to_string(&redacted)?,
    };

    output.write_bytes(content.as_bytes())?;
    if !content.ends_with('\n') {
        output.write_bytes(b"\n")?;
    }
    Ok(())
}

/// List the files that are searched, marking the ones that exist
fn handle_config_paths(explicit_path: Option<&Path>, output: &mut OutputWriter) -> Result<()> {
    let paths = match explicit_path {
        Some(path) => vec![path.to_path_buf()],
        None => Config::default_config_paths(),
    };

    for path in paths {
        let marker = if path.exists() { "*" } else { " " };
        output.writeln(&format!("{} {}", marker, path.display()))?;
    }
    Ok(())
}
