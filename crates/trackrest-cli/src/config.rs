//! Configuration management for the CLI
//!
//! This module handles loading and merging configuration from:
//! - Default values
//! - Configuration files (YAML/JSON/TOML)
//! - Environment variables
//! - Command-line arguments

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use trackrest_core::http::{DEFAULT_RETRY_CODES, DEFAULT_STORAGE_RETRY_ATTEMPTS};
use trackrest_core::{HostCredentials, RetryConfig, StaticHeaders};

/// Placeholder shown instead of secrets
pub const REDACTED: &str = "***";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tracking server address and authentication
    pub tracking: TrackingConfig,

    /// Retry settings for API requests
    pub retry: RetrySettings,

    /// Cloud storage transfer settings
    pub storage: StorageSettings,

    /// Extra headers sent with every API request
    pub headers: BTreeMap<String, String>,

    /// Logging settings
    pub logging: LogSettings,
}

/// Tracking server address and authentication
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Base URI of the tracking server
    pub host: Option<String>,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Bearer token; ignored when basic auth is configured
    pub token: Option<String>,

    /// Skip server certificate verification
    pub insecure_tls: bool,

    /// CA bundle used to verify the server
    pub server_cert_path: Option<PathBuf>,

    /// PEM file with client certificate and key
    pub client_cert_path: Option<PathBuf>,
}

/// Retry settings for API requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,

    /// Seconds
    pub backoff_factor: f64,

    pub retry_codes: Vec<u16>,

    /// Per-attempt timeout in seconds
    pub timeout_secs: u64,
}

/// Cloud storage transfer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Retries for transient status codes
    pub retry_attempts: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: Option<String>,

    /// Log format (compact, full, json)
    pub format: Option<String>,

    /// Log file path
    pub file: Option<PathBuf>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_retries: defaults.max_retries,
            backoff_factor: defaults.backoff_factor,
            retry_codes: DEFAULT_RETRY_CODES.to_vec(),
            timeout_secs: defaults.timeout.as_secs(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            retry_attempts: DEFAULT_STORAGE_RETRY_ATTEMPTS,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;

        let config = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            _ => {
                return Err(Error::InvalidFormat {
                    path: path.to_path_buf(),
                    expected: "yaml, json or toml".to_string(),
                })
            }
        };

        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        for path in Self::default_config_paths() {
            if path.exists() {
                tracing::debug!(path = %path.display(), "Loading configuration file");
                return Self::from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file or default locations, then
    /// apply environment overrides
    pub fn load_with_file(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::load()?,
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Configuration files searched when none is given explicitly, in order
    pub fn default_config_paths() -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = ["yaml", "yml", "json", "toml"]
            .iter()
            .map(|ext| PathBuf::from(format!("trackrest.{}", ext)))
            .collect();

        if let Some(config_dir) = dirs::config_dir() {
            let trackrest_dir = config_dir.join("trackrest");
            for ext in ["yaml", "yml", "json", "toml"] {
                paths.push(trackrest_dir.join(format!("config.{}", ext)));
            }
        }

        paths
    }

    /// Override file values with `TRACKING_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tracking = &mut self.tracking;
        if let Some(host) = lookup("TRACKING_URI") {
            tracking.host = Some(host);
        }
        if let Some(username) = lookup("TRACKING_USERNAME") {
            tracking.username = Some(username);
        }
        if let Some(password) = lookup("TRACKING_PASSWORD") {
            tracking.password = Some(password);
        }
        if let Some(token) = lookup("TRACKING_TOKEN") {
            tracking.token = Some(token);
        }
        if let Some(flag) = lookup("TRACKING_INSECURE_TLS") {
            tracking.insecure_tls = parse_bool("TRACKING_INSECURE_TLS", &flag)?;
        }
        if let Some(path) = lookup("TRACKING_SERVER_CERT_PATH") {
            tracking.server_cert_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("TRACKING_CLIENT_CERT_PATH") {
            tracking.client_cert_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Apply command-line overrides, which beat both file and environment
    pub fn apply_overrides(
        &mut self,
        host: Option<String>,
        max_retries: Option<u32>,
        timeout_secs: Option<u64>,
    ) {
        if host.is_some() {
            self.tracking.host = host;
        }
        if let Some(max_retries) = max_retries {
            self.retry.max_retries = max_retries;
        }
        if let Some(timeout_secs) = timeout_secs {
            self.retry.timeout_secs = timeout_secs;
        }
    }

    /// Build validated credentials for the configured host
    pub fn to_credentials(&self) -> Result<HostCredentials> {
        let tracking = &self.tracking;
        let host = tracking.host.clone().ok_or_else(|| {
            Error::config("no tracking host configured; set TRACKING_URI, --host or tracking.host")
        })?;

        let mut builder = HostCredentials::builder(host)
            .username(tracking.username.clone())
            .password(tracking.password.clone())
            .token_opt(tracking.token.clone())
            .ignore_tls_verification(tracking.insecure_tls);
        if let Some(path) = &tracking.server_cert_path {
            builder = builder.server_cert_path(path);
        }
        if let Some(path) = &tracking.client_cert_path {
            builder = builder.client_cert_path(path);
        }

        Ok(builder.build()?)
    }

    /// Build a validated retry configuration
    pub fn to_retry_config(&self) -> Result<RetryConfig> {
        let config = RetryConfig::new(self.retry.max_retries)
            .with_backoff_factor(self.retry.backoff_factor)
            .with_retry_codes(self.retry.retry_codes.iter().copied())
            .with_timeout(Duration::from_secs(self.retry.timeout_secs));
        config.validate()?;
        Ok(config)
    }

    /// Static extra headers for the dispatcher
    pub fn header_provider(&self) -> StaticHeaders {
        self.headers
            .iter()
            .fold(StaticHeaders::default(), |headers, (name, value)| {
                headers.with_header(name, value)
            })
    }

    /// Copy of the configuration with secrets replaced
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        let mask = |value: &mut Option<String>| {
            if value.is_some() {
                *value = Some(REDACTED.to_string());
            }
        };
        mask(&mut config.tracking.password);
        mask(&mut config.tracking.token);
        for (name, value) in config.headers.iter_mut() {
            if crate::logging::redaction::is_sensitive_key(name) {
                *value = REDACTED.to_string();
            }
        }
        config
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::config(format!("{} must be a boolean, got '{}'", name, other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::collections::HashMap;
    use std::io::Write;

    fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_match_library() {
        let config = Config::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff_factor, 5.0);
        assert_eq!(config.retry.retry_codes, vec![429, 500, 503]);
        assert_eq!(config.retry.timeout_secs, 10);
        assert_eq!(config.storage.retry_attempts, 5);
        assert_eq!(config.to_retry_config().unwrap(), RetryConfig::default());
    }

    #[test]
    fn test_load_yaml() {
        let file = write_config(
            ".yaml",
            r#"
tracking:
  host: https://tracking.example.com
  token: abc
retry:
  max_retries: 1
  retry_codes: [502]
headers:
  x-team: ml
"#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.tracking.host.as_deref(), Some("https://tracking.example.com"));
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.retry_codes, vec![502]);
        assert_eq!(config.retry.backoff_factor, 5.0);
        assert_eq!(config.headers.get("x-team").map(String::as_str), Some("ml"));
    }

    #[test]
    fn test_load_toml_and_json() {
        let toml_file = write_config(
            ".toml",
            "[tracking]\nhost = \"http://localhost:5000\"\n\n[storage]\nretry_attempts = 2\n",
        );
        let config = Config::from_file(toml_file.path()).unwrap();
        assert_eq!(config.storage.retry_attempts, 2);

        let json_file = write_config(".json", r#"{"tracking": {"insecure_tls": true}}"#);
        let config = Config::from_file(json_file.path()).unwrap();
        assert!(config.tracking.insecure_tls);
    }

    #[test]
    fn test_unknown_extension_is_invalid_format() {
        let file = write_config(".ini", "host=x");
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::default();
        config.tracking.host = Some("http://from-file".to_string());

        let env: HashMap<&str, &str> = [
            ("TRACKING_URI", "http://from-env"),
            ("TRACKING_TOKEN", "t0k"),
            ("TRACKING_INSECURE_TLS", "true"),
        ]
        .into_iter()
        .collect();
        config
            .apply_env_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.tracking.host.as_deref(), Some("http://from-env"));
        assert_eq!(config.tracking.token.as_deref(), Some("t0k"));
        assert!(config.tracking.insecure_tls);
    }

    #[test]
    fn test_bad_boolean_in_env() {
        let mut config = Config::default();
        let err = config
            .apply_env_from(|key| (key == "TRACKING_INSECURE_TLS").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("TRACKING_INSECURE_TLS"));
    }

    #[test]
    #[serial]
    fn test_load_with_file_reads_process_env() {
        let file = write_config(".yaml", "tracking:\n  host: http://from-file\n");
        std::env::set_var("TRACKING_URI", "http://from-process-env");
        std::env::set_var("TRACKING_USERNAME", "alice");

        let config = Config::load_with_file(Some(file.path()));

        std::env::remove_var("TRACKING_URI");
        std::env::remove_var("TRACKING_USERNAME");

        let config = config.unwrap();
        assert_eq!(config.tracking.host.as_deref(), Some("http://from-process-env"));
        assert_eq!(config.tracking.username.as_deref(), Some("alice"));
    }

    #[test]
    fn test_cli_overrides_win() {
        let mut config = Config::default();
        config.tracking.host = Some("http://from-env".to_string());
        config.apply_overrides(Some("http://from-flag".to_string()), Some(0), None);

        assert_eq!(config.tracking.host.as_deref(), Some("http://from-flag"));
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.timeout_secs, 10);
    }

    #[test]
    fn test_to_credentials_requires_host() {
        let err = Config::default().to_credentials().unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let mut config = Config::default();
        config.tracking.host = Some("http://localhost:5000".to_string());
        config.tracking.username = Some("alice".to_string());
        config.tracking.password = Some("pw".to_string());
        let credentials = config.to_credentials().unwrap();
        assert_eq!(credentials.username(), Some("alice"));
        assert!(credentials.has_password());
    }

    #[test]
    fn test_invalid_retry_settings_are_rejected() {
        let mut config = Config::default();
        config.retry.max_retries = 10;
        let err = config.to_retry_config().unwrap_err();
        assert!(matches!(err, Error::Core(_)));
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let mut config = Config::default();
        config.tracking.token = Some("abc".to_string());
        config.tracking.password = Some("pw".to_string());
        config.headers.insert("Authorization".to_string(), "Bearer xyz".to_string());
        config.headers.insert("x-team".to_string(), "ml".to_string());

        let redacted = config.redacted();
        assert_eq!(redacted.tracking.token.as_deref(), Some(REDACTED));
        assert_eq!(redacted.tracking.password.as_deref(), Some(REDACTED));
        assert_eq!(redacted.headers["Authorization"], REDACTED);
        assert_eq!(redacted.headers["x-team"], "ml");
        assert!(redacted.tracking.username.is_none());
    }
}
