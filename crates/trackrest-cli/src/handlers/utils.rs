//! Shared utilities for command handlers

use crate::config::Config;
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use trackrest_core::{CloudStorageTransport, EndpointResolver, RequestDispatcher};

/// Load a service descriptor, reporting a missing file as such
pub fn load_resolver(path: &Path) -> Result<EndpointResolver> {
    if !path.exists() {
        return Err(Error::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(EndpointResolver::from_path(path)?)
}

/// Dispatcher for the configured host, retry settings and extra headers
pub fn build_dispatcher(config: &Config, resolver: EndpointResolver) -> Result<RequestDispatcher> {
    let credentials = config.to_credentials()?;
    let retry = config.to_retry_config()?;
    let dispatcher = RequestDispatcher::with_config(credentials, resolver, retry)?
        .with_header_provider(Arc::new(config.header_provider()));
    Ok(dispatcher)
}

/// Storage transport honoring the configured or overridden retry budget
pub fn build_storage(
    config: &Config,
    retry_attempts: Option<u32>,
) -> Result<CloudStorageTransport> {
    let attempts = retry_attempts.unwrap_or(config.storage.retry_attempts);
    Ok(CloudStorageTransport::new()?.with_retry_attempts(attempts))
}

/// JSON payload from `--data` or `--data-file`; none means `null`
pub fn read_payload(data: Option<&str>, data_file: Option<&Path>) -> Result<Value> {
    let text = match (data, data_file) {
        (Some(data), _) => data.to_string(),
        (None, Some(path)) => {
            if !path.exists() {
                return Err(Error::FileNotFound {
                    path: path.to_path_buf(),
                });
            }
            fs::read_to_string(path)?
        }
        (None, None) => return Ok(Value::Null),
    };

    serde_json::from_str(&text)
        .map_err(|e| Error::invalid_args(format!("payload is not valid JSON: {}", e)))
}

/// Parse repeated `NAME:VALUE` header arguments
pub fn parse_headers(raw: &[String]) -> Result<HashMap<String, String>> {
    raw.iter()
        .map(|header| {
            let (name, value) = header.split_once(':').ok_or_else(|| {
                Error::invalid_args(format!("header '{}' is not NAME:VALUE", header))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::invalid_args(format!("header '{}' has an empty name", header)));
            }
            Ok((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_payload_sources() {
        assert_eq!(read_payload(None, None).unwrap(), Value::Null);
        assert_eq!(
            read_payload(Some(r#"{"run_id": "r1"}"#), None).unwrap(),
            serde_json::json!({"run_id": "r1"})
        );

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"experiment_id": "0"}"#).unwrap();
        assert_eq!(
            read_payload(None, Some(file.path())).unwrap()["experiment_id"],
            "0"
        );
    }

    #[test]
    fn test_read_payload_errors() {
        let err = read_payload(Some("{not json"), None).unwrap_err();
        assert!(matches!(err, Error::InvalidArgs(_)));

        let err = read_payload(None, Some(Path::new("/no/such/payload.json"))).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[test]
    fn test_parse_headers() {
        let headers = parse_headers(&[
            "x-ms-blob-type: BlockBlob".to_string(),
            "x-meta:a:b".to_string(),
        ])
        .unwrap();
        assert_eq!(headers["x-ms-blob-type"], "BlockBlob");
        assert_eq!(headers["x-meta"], "a:b");

        assert!(parse_headers(&["no-colon".to_string()]).is_err());
        assert!(parse_headers(&[":value".to_string()]).is_err());
    }

    #[test]
    fn test_build_storage_prefers_override() {
        let config = Config::default();
        assert_eq!(build_storage(&config, None).unwrap().retry_attempts(), 5);
        assert_eq!(build_storage(&config, Some(1)).unwrap().retry_attempts(), 1);
    }

    #[test]
    fn test_missing_descriptor() {
        let err = load_resolver(Path::new("/no/such/service.yaml")).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }
}
