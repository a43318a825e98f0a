//! Request dispatcher
//!
//! Ties the pieces together for one logical call: resolve the endpoint,
//! build headers, encode the payload, execute through the retrying
//! transport, verify, then decode the JSON response.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::credentials::HostCredentials;
use crate::endpoints::EndpointResolver;
use crate::error::{Error, Result};
use crate::headers::{HeaderProvider, NoExtraHeaders};
use crate::http::{
    verify, ConnectorConfig, Payload, PreparedRequest, RawResponse, ReqwestConnector, RetryConfig,
    Transport,
};

/// Product identity sent as `User-Agent`
pub const USER_AGENT_PRODUCT: &str = "trackrest-client";

/// A typed request bound to a request kind of the service descriptor
pub trait ApiRequest: Serialize {
    /// Request kind as named in the descriptor
    const KIND: &'static str;
    /// Shape of a successful response body
    type Response: DeserializeOwned;
}

/// Sends logical requests to one tracking service
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    credentials: Arc<HostCredentials>,
    resolver: Arc<EndpointResolver>,
    transport: Transport,
    header_provider: Arc<dyn HeaderProvider>,
    retry_config: RetryConfig,
}

impl RequestDispatcher {
    /// Dispatcher with default retry settings and its own connection pool
    pub fn new(credentials: HostCredentials, resolver: EndpointResolver) -> Result<Self> {
        Self::with_config(credentials, resolver, RetryConfig::default())
    }

    /// Dispatcher whose pool uses the timeout of `retry_config`
    pub fn with_config(
        credentials: HostCredentials,
        resolver: EndpointResolver,
        retry_config: RetryConfig,
    ) -> Result<Self> {
        retry_config.validate()?;
        let connector_config = ConnectorConfig::default().with_timeout(retry_config.timeout);
        let connector = ReqwestConnector::new(&credentials, &connector_config)?;
        let transport = Transport::new(Arc::new(connector));
        Ok(Self::with_transport(credentials, resolver, transport).with_retry_config(retry_config))
    }

    /// Dispatcher over an existing transport
    pub fn with_transport(
        credentials: HostCredentials,
        resolver: EndpointResolver,
        transport: Transport,
    ) -> Self {
        Self {
            credentials: Arc::new(credentials),
            resolver: Arc::new(resolver),
            transport,
            header_provider: Arc::new(NoExtraHeaders),
            retry_config: RetryConfig::default(),
        }
    }

    pub fn with_header_provider(mut self, provider: Arc<dyn HeaderProvider>) -> Self {
        self.header_provider = provider;
        self
    }

    /// Override the retry settings, timeout included
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn credentials(&self) -> &HostCredentials {
        &self.credentials
    }

    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    /// Dispatch a typed request and decode its typed response
    pub fn call<R: ApiRequest>(&self, request: &R) -> Result<R::Response> {
        let payload = serde_json::to_value(request).map_err(|e| {
            Error::configuration_with_source(
                "payload",
                format!("cannot serialize {} request", R::KIND),
                e,
            )
        })?;
        let endpoint = self.resolver.resolve(R::KIND)?;
        let response = self.send(endpoint.method.clone(), &endpoint.path, &payload)?;
        decode(&response, &endpoint.path)
    }

    /// Dispatch an untyped JSON payload for `kind`
    pub fn call_value(&self, kind: &str, payload: &Value) -> Result<Value> {
        let endpoint = self.resolver.resolve(kind)?;
        let response = self.send(endpoint.method.clone(), &endpoint.path, payload)?;
        decode(&response, &endpoint.path)
    }

    /// Verified request to an arbitrary endpoint path
    ///
    /// The body is returned raw, so this also serves download endpoints
    /// outside the structured API prefix.
    pub fn request(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<&Value>,
    ) -> Result<RawResponse> {
        self.send(method, endpoint, body.unwrap_or(&Value::Null))
    }

    fn send(&self, method: Method, endpoint: &str, payload: &Value) -> Result<RawResponse> {
        let mut url = Url::parse(&self.credentials.url_for(endpoint)).map_err(|e| {
            Error::configuration_with_source(
                "host",
                format!("cannot build URL for endpoint {}: {}", endpoint, e),
                e,
            )
        })?;

        let mut headers = self.build_headers()?;
        let mut body = Payload::Empty;

        if !is_empty_payload(payload) {
            if method == Method::GET {
                let pairs = query_pairs(payload)?;
                if !pairs.is_empty() {
                    url.query_pairs_mut().extend_pairs(pairs);
                }
            } else {
                let encoded = serde_json::to_vec(payload).map_err(|e| {
                    Error::configuration_with_source("payload", "cannot encode JSON body", e)
                })?;
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                body = Payload::from(encoded);
            }
        }

        info!(method = %method, endpoint, "Dispatching request");

        let request = PreparedRequest::new(method, url)
            .with_headers(headers)
            .with_body(body);
        let response = self.transport.execute(request, &self.retry_config)?;

        debug!(endpoint, status = response.status().as_u16(), "Received response");
        verify(response, endpoint)
    }

    /// `User-Agent`, then provider headers, then `Authorization`
    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let agent = format!("{}/{}", USER_AGENT_PRODUCT, crate::VERSION);
        headers.insert(USER_AGENT, header_value("User-Agent", &agent)?);

        let extra = self.header_provider.headers().map_err(|e| {
            Error::configuration_with_source("headers", "header provider failed", e)
        })?;
        for (name, value) in &extra {
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                let message = format!("invalid header name '{}'", name);
                Error::configuration_with_source("headers", message, e)
            })?;
            headers.insert(header, header_value(name, value)?);
        }

        if let Some(auth) = self.credentials.authorization_header() {
            let mut value = header_value("Authorization", &auth)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        Ok(headers)
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| {
        let message = format!("invalid value for header '{}'", name);
        Error::configuration_with_source("headers", message, e)
    })
}

fn decode<T: DeserializeOwned>(response: &RawResponse, endpoint: &str) -> Result<T> {
    response.json().map_err(|e| {
        Error::protocol(
            response.status().as_u16(),
            endpoint,
            format!("Response from {} does not match the expected shape: {}", endpoint, e),
            response.text(),
        )
    })
}

fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Flatten a JSON object into query parameters
///
/// Scalars become their text form, arrays repeat the key, nested objects are
/// sent as JSON text and nulls are skipped.
fn query_pairs(payload: &Value) -> Result<Vec<(String, String)>> {
    let Value::Object(map) = payload else {
        return Err(Error::configuration(
            "payload",
            "payload of a GET request must be a JSON object",
        ));
    };

    let mut pairs = Vec::new();
    for (key, value) in map {
        match value {
            Value::Array(items) => {
                pairs.extend(items.iter().filter_map(query_text).map(|text| (key.clone(), text)));
            }
            other => {
                if let Some(text) = query_text(other) {
                    pairs.push((key.clone(), text));
                }
            }
        }
    }
    Ok(pairs)
}

fn query_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
