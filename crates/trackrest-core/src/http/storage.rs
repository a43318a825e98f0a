//! Transfers against pre-signed cloud storage URLs
//!
//! Storage requests carry no service credentials and use a retry policy
//! tuned for large bodies: independent budgets per failure class and a fixed
//! pause between attempts. See [`RetryPolicy::cloud_storage`].

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode, Url};
use tracing::{debug, info};

use super::connector::{
    Connector, ConnectorConfig, ConnectorResponse, Payload, PreparedRequest, ReqwestConnector,
};
use super::retry::{RetryPolicy, Sleeper, ThreadSleeper};
use super::transport::{redact_url, send_with_retries};
use crate::error::{Error, Result};

/// Status retries used when none are configured
pub const DEFAULT_STORAGE_RETRY_ATTEMPTS: u32 = 5;

/// The only verbs a storage transfer supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageVerb {
    Put,
    Get,
}

impl StorageVerb {
    fn method(self) -> Method {
        match self {
            StorageVerb::Put => Method::PUT,
            StorageVerb::Get => Method::GET,
        }
    }
}

impl FromStr for StorageVerb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "put" => Ok(StorageVerb::Put),
            "get" => Ok(StorageVerb::Get),
            _ => Err(Error::configuration(
                "method",
                format!("Illegal http method: {}", s),
            )),
        }
    }
}

impl fmt::Display for StorageVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageVerb::Put => write!(f, "PUT"),
            StorageVerb::Get => write!(f, "GET"),
        }
    }
}

/// Live response of a storage transfer
///
/// Owns the underlying connection, which goes back to the pool (or is
/// closed) when the value is dropped.
pub struct StorageResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: Box<dyn Read + Send>,
}

impl fmt::Debug for StorageResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageResponse")
            .field("status", &self.status)
            .field("url", &redact_url(&self.url))
            .finish_non_exhaustive()
    }
}

impl StorageResponse {
    fn from_connector(response: ConnectorResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            url: response.url,
            body: response.body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fail with `Error::Protocol` unless the status is 2xx
    pub fn error_for_status(mut self) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }

        let mut body = String::new();
        // Best effort; the status is what matters.
        let _ = self.body.by_ref().take(64 * 1024).read_to_string(&mut body);
        let url = redact_url(&self.url);
        Err(Error::protocol(
            self.status.as_u16(),
            url.clone(),
            format!("Storage request to {} failed with status {}", url, self.status),
            body,
        ))
    }

    /// Stream the remaining body into `writer`, returning the byte count
    pub fn copy_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> Result<u64> {
        io::copy(&mut self.body, writer).map_err(|e| {
            Error::transport(
                redact_url(&self.url),
                "failed to stream storage response body",
                Some(e.into()),
            )
        })
    }

    /// Read the remaining body into memory
    pub fn bytes(mut self) -> Result<Bytes> {
        let mut buf = Vec::new();
        self.copy_to(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

impl Read for StorageResponse {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.body.read(buf)
    }
}

/// Transport for pre-signed storage URLs
#[derive(Clone)]
pub struct CloudStorageTransport {
    connector: Arc<dyn Connector>,
    sleeper: Arc<dyn Sleeper>,
    retry_attempts: u32,
}

impl fmt::Debug for CloudStorageTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudStorageTransport")
            .field("retry_attempts", &self.retry_attempts)
            .finish_non_exhaustive()
    }
}

impl CloudStorageTransport {
    /// Transport with its own connection pool and no read timeout
    pub fn new() -> Result<Self> {
        let config = ConnectorConfig::default().with_read_timeout(None);
        Ok(Self::with_connector(Arc::new(ReqwestConnector::plain(&config)?)))
    }

    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            sleeper: Arc::new(ThreadSleeper),
            retry_attempts: DEFAULT_STORAGE_RETRY_ATTEMPTS,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Number of retries for transient status codes
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// Send `payload` to `url` with `verb` (`PUT` or `GET`, any case)
    ///
    /// The returned response may have any status; use
    /// [`StorageResponse::error_for_status`] to reject failures.
    pub fn transfer(
        &self,
        verb: &str,
        url: &str,
        payload: Payload,
        headers: &HashMap<String, String>,
    ) -> Result<StorageResponse> {
        let verb: StorageVerb = verb.parse()?;
        let url = Url::parse(url).map_err(|e| {
            Error::configuration_with_source("url", format!("invalid storage URL: {}", e), e)
        })?;
        let headers = header_map(headers)?;

        info!(verb = %verb, url = %redact_url(&url), "Starting storage transfer");

        let request = PreparedRequest::new(verb.method(), url)
            .with_headers(headers)
            .with_body(payload);

        let response = send_with_retries(
            self.connector.as_ref(),
            self.sleeper.as_ref(),
            request,
            RetryPolicy::cloud_storage(self.retry_attempts),
            |response| Ok(StorageResponse::from_connector(response)),
        )?;

        debug!(status = response.status().as_u16(), "Storage transfer responded");
        Ok(response)
    }

    /// Run `f` with the live response; it is released when `f` returns
    pub fn transfer_with<T, F>(
        &self,
        verb: &str,
        url: &str,
        payload: Payload,
        headers: &HashMap<String, String>,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&mut StorageResponse) -> Result<T>,
    {
        let mut response = self.transfer(verb, url, payload, headers)?;
        f(&mut response)
    }
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            let message = format!("invalid header name '{}'", name);
            Error::configuration_with_source("headers", message, e)
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            let message = format!("invalid value for header '{}'", name);
            Error::configuration_with_source("headers", message, e)
        })?;
        map.insert(name, value);
    }
    Ok(map)
}
