//! Single-attempt HTTP execution
//!
//! A [`Connector`] sends exactly one request and reports how it failed, if it
//! did. It never follows redirects or retries; that is the transport's job.
//! [`ReqwestConnector`] is the production implementation and owns the
//! connection pool for one set of host credentials.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::future::Future;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Buf, Bytes};
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use reqwest::{Method, StatusCode, Url};
use tokio::runtime::Runtime;
use tokio::time::error::Elapsed;

use crate::credentials::{HostCredentials, TlsVerification};
use crate::error::{Error, Result};

/// Request body that can be replayed on every attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Payload {
    #[default]
    Empty,
    /// In-memory bytes, cheap to clone between attempts
    Bytes(Bytes),
    /// File streamed from disk, reopened on every attempt
    File(PathBuf),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(value))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Bytes(Bytes::from(value))
    }
}

/// A fully resolved request for one attempt
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Payload,
    /// Read timeout for this attempt; the connector default applies if unset
    pub timeout: Option<Duration>,
}

impl PreparedRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Payload::Empty,
            timeout: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Payload) -> Self {
        self.body = body;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Response of a single attempt, body not yet read
pub struct ConnectorResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub url: Url,
    pub body: Box<dyn Read + Send>,
}

impl fmt::Debug for ConnectorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Failure class of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptErrorKind {
    /// No connection was established
    Connect,
    /// Connected, but sending or reading the response failed
    Read,
    /// Anything else, for example a request that could not be built
    Other,
}

impl fmt::Display for AttemptErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptErrorKind::Connect => write!(f, "connect"),
            AttemptErrorKind::Read => write!(f, "read"),
            AttemptErrorKind::Other => write!(f, "request"),
        }
    }
}

/// Why one attempt produced no response
#[derive(Debug, thiserror::Error)]
#[error("{kind} error: {source}")]
pub struct AttemptError {
    kind: AttemptErrorKind,
    #[source]
    source: anyhow::Error,
}

impl AttemptError {
    pub fn new(kind: AttemptErrorKind, source: impl Into<anyhow::Error>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn connect(source: impl Into<anyhow::Error>) -> Self {
        Self::new(AttemptErrorKind::Connect, source)
    }

    pub fn read(source: impl Into<anyhow::Error>) -> Self {
        Self::new(AttemptErrorKind::Read, source)
    }

    pub fn other(source: impl Into<anyhow::Error>) -> Self {
        Self::new(AttemptErrorKind::Other, source)
    }

    pub fn kind(&self) -> AttemptErrorKind {
        self.kind
    }

    pub fn into_source(self) -> anyhow::Error {
        self.source
    }

    /// Classify a reqwest failure into connect/read/other
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        let kind = if error.is_connect() {
            AttemptErrorKind::Connect
        } else if error.is_timeout() || error.is_request() || error.is_body() || error.is_decode() {
            AttemptErrorKind::Read
        } else {
            AttemptErrorKind::Other
        };
        Self::new(kind, error)
    }
}

/// Sends one request; implementations must be safe to share between threads
pub trait Connector: Send + Sync {
    fn send(
        &self,
        request: &PreparedRequest,
    ) -> std::result::Result<ConnectorResponse, AttemptError>;
}

/// Connection pool settings
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorConfig {
    /// Time allowed to establish a connection
    pub connect_timeout: Duration,
    /// Default read timeout when a request does not carry its own; `None` waits forever
    pub read_timeout: Option<Duration>,
    /// Idle connections kept per host
    pub pool_max_idle_per_host: usize,
    /// How long an idle pooled connection is kept
    pub pool_idle_timeout: Option<Duration>,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Some(Duration::from_secs(90)),
        }
    }
}

impl ConnectorConfig {
    /// Use the same connect and read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }
}

/// Certificate material shared by every client of one connector
#[derive(Clone, Default)]
struct TlsMaterial {
    accept_invalid_certs: bool,
    ca_bundle: Option<Vec<reqwest::Certificate>>,
    identity: Option<reqwest::Identity>,
}

impl TlsMaterial {
    fn load(credentials: &HostCredentials) -> Result<Self> {
        let mut material = TlsMaterial::default();

        match credentials.tls_verification() {
            TlsVerification::Enabled => {}
            TlsVerification::Disabled => {
                tracing::warn!("TLS certificate verification is disabled");
                material.accept_invalid_certs = true;
            }
            TlsVerification::CaBundle(path) => {
                let pem = read_pem("server_cert_path", &path)?;
                let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                    Error::configuration_with_source(
                        "server_cert_path",
                        format!("invalid CA bundle {}", path.display()),
                        e,
                    )
                })?;
                if certs.is_empty() {
                    return Err(Error::configuration(
                        "server_cert_path",
                        format!("no certificates found in {}", path.display()),
                    ));
                }
                material.ca_bundle = Some(certs);
            }
        }

        if let Some(path) = credentials.client_cert_path() {
            let pem = read_pem("client_cert_path", path)?;
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                Error::configuration_with_source(
                    "client_cert_path",
                    format!("invalid client certificate {}", path.display()),
                    e,
                )
            })?;
            material.identity = Some(identity);
        }

        Ok(material)
    }
}

/// [`Connector`] backed by pooled `reqwest` clients
///
/// Requests run on a small runtime owned by the connector, so `send` and the
/// returned body block the calling thread. Neither may be used from inside an
/// async context.
///
/// A request's `timeout` bounds the connect phase and, separately, every
/// read: waiting for the response head and each body chunk. Reqwest only
/// offers connect timeouts per client, so one pool is kept per distinct
/// connect timeout.
pub struct ReqwestConnector {
    runtime: Arc<Runtime>,
    config: ConnectorConfig,
    tls: TlsMaterial,
    clients: Mutex<HashMap<Duration, reqwest::Client>>,
}

impl fmt::Debug for ReqwestConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestConnector")
            .field("config", &self.config)
            .field("accept_invalid_certs", &self.tls.accept_invalid_certs)
            .finish_non_exhaustive()
    }
}

impl ReqwestConnector {
    /// Build a pool configured with the TLS settings of `credentials`
    pub fn new(credentials: &HostCredentials, config: &ConnectorConfig) -> Result<Self> {
        Self::with_tls(TlsMaterial::load(credentials)?, config)
    }

    /// Build a pool with default TLS verification and no client identity
    pub fn plain(config: &ConnectorConfig) -> Result<Self> {
        Self::with_tls(TlsMaterial::default(), config)
    }

    fn with_tls(tls: TlsMaterial, config: &ConnectorConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("trackrest-http")
            .enable_all()
            .build()
            .map_err(|e| {
                Error::configuration_with_source("http_client", "failed to start HTTP runtime", e)
            })?;

        let connector = Self {
            runtime: Arc::new(runtime),
            config: config.clone(),
            tls,
            clients: Mutex::new(HashMap::new()),
        };

        // Surface certificate problems now rather than on the first request
        connector.client_for(config.connect_timeout).map_err(|e| {
            Error::configuration_with_source(
                "http_client",
                "failed to create HTTP client",
                e.into_source(),
            )
        })?;
        Ok(connector)
    }

    fn client_for(
        &self,
        connect_timeout: Duration,
    ) -> std::result::Result<reqwest::Client, AttemptError> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| AttemptError::other(anyhow::anyhow!("connection pool lock poisoned")))?;
        if let Some(client) = clients.get(&connect_timeout) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connect_timeout)
            .pool_max_idle_per_host(self.config.pool_max_idle_per_host)
            .pool_idle_timeout(self.config.pool_idle_timeout);

        if self.tls.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(certs) = &self.tls.ca_bundle {
            builder = builder.tls_built_in_root_certs(false);
            for cert in certs {
                builder = builder.add_root_certificate(cert.clone());
            }
        }
        if let Some(identity) = &self.tls.identity {
            builder = builder.identity(identity.clone());
        }

        let _entered = self.runtime.enter();
        let client = builder.build().map_err(AttemptError::other)?;
        clients.insert(connect_timeout, client.clone());
        Ok(client)
    }
}

impl Connector for ReqwestConnector {
    fn send(
        &self,
        request: &PreparedRequest,
    ) -> std::result::Result<ConnectorResponse, AttemptError> {
        let connect_timeout = request.timeout.unwrap_or(self.config.connect_timeout);
        let read_timeout = request.timeout.or(self.config.read_timeout);
        let client = self.client_for(connect_timeout)?;

        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());

        builder = match &request.body {
            Payload::Empty => builder,
            Payload::Bytes(bytes) => builder.body(bytes.clone()),
            Payload::File(path) => {
                let file = File::open(path).map_err(AttemptError::other)?;
                let length = file.metadata().map_err(AttemptError::other)?.len();
                if !request.headers.contains_key(CONTENT_LENGTH) {
                    builder = builder.header(CONTENT_LENGTH, length);
                }
                let _entered = self.runtime.enter();
                builder.body(tokio::fs::File::from_std(file))
            }
        };

        // The head may arrive once connecting and one read have both run their course
        let head_timeout = read_timeout.map(|read| read + connect_timeout);
        let response = self
            .runtime
            .block_on(within(head_timeout, builder.send()))
            .map_err(|_| AttemptError::read(anyhow::anyhow!("timed out waiting for response")))?
            .map_err(AttemptError::from_reqwest)?;

        Ok(ConnectorResponse {
            status: response.status(),
            headers: response.headers().clone(),
            url: response.url().clone(),
            body: Box::new(BodyReader {
                runtime: self.runtime.clone(),
                response,
                chunk: Bytes::new(),
                read_timeout,
            }),
        })
    }
}

/// Blocking reader over a response body, one read timeout per chunk
struct BodyReader {
    runtime: Arc<Runtime>,
    response: reqwest::Response,
    chunk: Bytes,
    read_timeout: Option<Duration>,
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.chunk.is_empty() {
            let next = self
                .runtime
                .block_on(within(self.read_timeout, self.response.chunk()))
                .map_err(|_| {
                    io::Error::new(io::ErrorKind::TimedOut, "timed out reading response body")
                })?
                .map_err(io::Error::other)?;
            match next {
                Some(chunk) => self.chunk = chunk,
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.chunk.len());
        buf[..n].copy_from_slice(&self.chunk[..n]);
        self.chunk.advance(n);
        Ok(n)
    }
}

async fn within<F: Future>(
    limit: Option<Duration>,
    future: F,
) -> std::result::Result<F::Output, Elapsed> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, future).await,
        None => Ok(future.await),
    }
}

fn read_pem(field: &str, path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        Error::configuration_with_source(field, format!("cannot read {}", path.display()), e)
    })
}
