//! Request kind to endpoint resolution
//!
//! The table comes from a service descriptor produced outside this crate,
//! for example:
//!
//! ```yaml
//! service: TrackingService
//! path_prefix: /api/2.0
//! methods:
//!   - name: GetRun
//!     endpoints:
//!       - { path: /tracking/runs/get, method: GET }
//!       - { path: /preview/tracking/runs/get, method: GET }
//! ```
//!
//! Only the first endpoint of each method is used.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::http::API_PATH_PREFIX;

fn default_path_prefix() -> String {
    API_PATH_PREFIX.to_string()
}

/// Service descriptor as written on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Informational service name
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    pub methods: Vec<MethodDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Request kind, e.g. `GetRun`
    pub name: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointBinding>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointBinding {
    pub path: String,
    pub method: String,
}

impl ServiceDescriptor {
    /// Load a descriptor; `.json` files are parsed as JSON, anything else as YAML
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_source(
                "descriptor",
                format!("cannot read service descriptor {}", path.display()),
                e,
            )
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| {
            let message = format!("invalid JSON descriptor: {}", e);
            Error::configuration_with_source("descriptor", message, e)
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            let message = format!("invalid YAML descriptor: {}", e);
            Error::configuration_with_source("descriptor", message, e)
        })
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| {
            Error::configuration_with_source("descriptor", format!("invalid descriptor: {}", e), e)
        })
    }
}

/// Resolved target of one request kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Full path including the prefix
    pub path: String,
    pub method: Method,
}

/// Read-only `kind -> Endpoint` table
#[derive(Debug, Clone, Default)]
pub struct EndpointResolver {
    service: Option<String>,
    endpoints: BTreeMap<String, Endpoint>,
}

impl EndpointResolver {
    /// Build the table, rejecting empty, duplicate or malformed entries
    pub fn new(descriptor: &ServiceDescriptor) -> Result<Self> {
        let mut endpoints = BTreeMap::new();

        for method in &descriptor.methods {
            let binding = method.endpoints.first().ok_or_else(|| {
                Error::configuration(
                    "descriptor",
                    format!("request kind '{}' declares no endpoints", method.name),
                )
            })?;

            let endpoint = Endpoint {
                path: format!("{}{}", descriptor.path_prefix, binding.path),
                method: parse_method(&method.name, &binding.method)?,
            };

            if endpoints.insert(method.name.clone(), endpoint).is_some() {
                return Err(Error::configuration(
                    "descriptor",
                    format!("request kind '{}' is declared more than once", method.name),
                ));
            }
        }

        tracing::debug!(
            service = descriptor.service.as_deref().unwrap_or("unnamed"),
            kinds = endpoints.len(),
            "Loaded service descriptor"
        );

        Ok(Self {
            service: descriptor.service.clone(),
            endpoints,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(&ServiceDescriptor::from_path(path)?)
    }

    /// Endpoint for `kind`, or a configuration error if it is unknown
    pub fn resolve(&self, kind: &str) -> Result<&Endpoint> {
        self.endpoints.get(kind).ok_or_else(|| {
            Error::configuration("kind", format!("unknown request kind '{}'", kind))
        })
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// All kinds in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Endpoint)> {
        self.endpoints.iter().map(|(kind, endpoint)| (kind.as_str(), endpoint))
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

fn parse_method(kind: &str, verb: &str) -> Result<Method> {
    match verb.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        "HEAD" => Ok(Method::HEAD),
        "OPTIONS" => Ok(Method::OPTIONS),
        _ => Err(Error::configuration(
            "descriptor",
            format!("request kind '{}' has unsupported HTTP method '{}'", kind, verb),
        )),
    }
}
