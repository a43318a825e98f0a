//! Host credentials for the tracking service
//!
//! `HostCredentials` is the immutable description of where the service lives
//! and how to authenticate against it. It validates itself when built and is
//! shared read-only for the life of a client session.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;

use crate::error::{Error, Result};

/// How the server's TLS certificate should be verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsVerification {
    /// Verify against the platform/built-in roots
    Enabled,
    /// Skip hostname and certificate verification entirely
    Disabled,
    /// Verify against the CA bundle at this path only
    CaBundle(PathBuf),
}

/// Endpoint address and authentication material for one service
#[derive(Clone, PartialEq, Eq)]
pub struct HostCredentials {
    host: String,
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    ignore_tls_verification: bool,
    client_cert_path: Option<PathBuf>,
    server_cert_path: Option<PathBuf>,
}

impl HostCredentials {
    /// Credentials with only a host and default TLS verification
    pub fn new(host: impl Into<String>) -> Result<Self> {
        Self::builder(host).build()
    }

    /// Start building credentials for the given host
    pub fn builder(host: impl Into<String>) -> HostCredentialsBuilder {
        HostCredentialsBuilder {
            host: host.into(),
            username: None,
            password: None,
            token: None,
            ignore_tls_verification: false,
            client_cert_path: None,
            server_cert_path: None,
        }
    }

    /// Host with any trailing slash removed
    pub fn host(&self) -> &str {
        self.host.trim_end_matches('/')
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn ignore_tls_verification(&self) -> bool {
        self.ignore_tls_verification
    }

    pub fn client_cert_path(&self) -> Option<&Path> {
        self.client_cert_path.as_deref()
    }

    pub fn server_cert_path(&self) -> Option<&Path> {
        self.server_cert_path.as_deref()
    }

    /// Join the host and an endpoint path into a full URL string
    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}{}", self.host(), endpoint)
    }

    /// Value of the `Authorization` header, if any credentials are present
    ///
    /// Username and password take precedence over a token.
    pub fn authorization_header(&self) -> Option<String> {
        match (&self.username, &self.password, &self.token) {
            (Some(username), Some(password), _) => {
                let raw = format!("{}:{}", username, password);
                let encoded = base64::engine::general_purpose::STANDARD.encode(raw.as_bytes());
                Some(format!("Basic {}", encoded))
            }
            (_, _, Some(token)) => Some(format!("Bearer {}", token)),
            _ => None,
        }
    }

    /// TLS verification mode derived from the certificate settings
    pub fn tls_verification(&self) -> TlsVerification {
        match &self.server_cert_path {
            Some(path) => TlsVerification::CaBundle(path.clone()),
            None if self.ignore_tls_verification => TlsVerification::Disabled,
            None => TlsVerification::Enabled,
        }
    }
}

impl fmt::Debug for HostCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCredentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("ignore_tls_verification", &self.ignore_tls_verification)
            .field("client_cert_path", &self.client_cert_path)
            .field("server_cert_path", &self.server_cert_path)
            .finish()
    }
}

/// Builder for [`HostCredentials`]; `build` enforces the invariants
#[derive(Debug, Clone)]
pub struct HostCredentialsBuilder {
    host: String,
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    ignore_tls_verification: bool,
    client_cert_path: Option<PathBuf>,
    server_cert_path: Option<PathBuf>,
}

impl HostCredentialsBuilder {
    /// Use HTTP Basic authentication
    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn username(mut self, username: Option<String>) -> Self {
        self.username = username;
        self
    }

    pub fn password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    /// Use Bearer token authentication
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token_opt(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Disable TLS verification. Never appropriate in production.
    pub fn ignore_tls_verification(mut self, ignore: bool) -> Self {
        self.ignore_tls_verification = ignore;
        self
    }

    /// PEM file with the client certificate and key for mutual TLS
    pub fn client_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.client_cert_path = Some(path.into());
        self
    }

    /// CA bundle used to verify the server
    pub fn server_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_cert_path = Some(path.into());
        self
    }

    /// Validate and produce the credentials
    pub fn build(self) -> Result<HostCredentials> {
        if self.host.trim().is_empty() {
            return Err(Error::configuration(
                "host",
                "host is a required parameter for HostCredentials",
            ));
        }

        if self.ignore_tls_verification && self.server_cert_path.is_some() {
            return Err(Error::configuration(
                "ignore_tls_verification",
                "when 'ignore_tls_verification' is true then 'server_cert_path' must not be set",
            ));
        }

        Ok(HostCredentials {
            host: self.host,
            username: self.username,
            password: self.password,
            token: self.token,
            ignore_tls_verification: self.ignore_tls_verification,
            client_cert_path: self.client_cert_path,
            server_cert_path: self.server_cert_path,
        })
    }
}
