//! Retrying transport
//!
//! Runs one logical request as a sequence of attempts through a
//! [`Connector`], consuming the [`RetryPolicy`] budgets as failures happen.
//! When a budget runs out on a redirect or a retryable status, the last
//! response is handed back as-is; only connection-level failures become
//! errors here.

use std::borrow::Cow;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{
    HeaderMap, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, RETRY_AFTER,
};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use super::connector::{
    AttemptError, AttemptErrorKind, Connector, ConnectorResponse, Payload, PreparedRequest,
};
use super::retry::{
    RetryCause, RetryConfig, RetryDecision, RetryHandler, RetryPolicy, Sleeper, ThreadSleeper,
};
use crate::error::{Error, Result};

/// A complete response with its body read into memory
#[derive(Debug, Clone)]
pub struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    url: Url,
    body: Bytes,
}

impl RawResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            url,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Final URL, after any redirects
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Body decoded as UTF-8, invalid sequences replaced
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

/// Default transport: one shared retry budget, exponential backoff
#[derive(Clone)]
pub struct Transport {
    connector: Arc<dyn Connector>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("sleeper", &self.sleeper)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    /// Replace the sleeper used between attempts
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Execute `request`, retrying according to `config`
    ///
    /// Returns the final response whatever its status. Fails only on an
    /// invalid `config` or when connection-level failures outlast the budget.
    pub fn execute(&self, request: PreparedRequest, config: &RetryConfig) -> Result<RawResponse> {
        config.validate()?;
        let request = request.with_timeout(config.timeout);
        let policy = RetryPolicy::shared(config);

        send_with_retries(
            self.connector.as_ref(),
            self.sleeper.as_ref(),
            request,
            policy,
            read_fully,
        )
    }
}

fn read_fully(mut response: ConnectorResponse) -> std::result::Result<RawResponse, AttemptError> {
    let mut body = Vec::new();
    response
        .body
        .read_to_end(&mut body)
        .map_err(AttemptError::read)?;
    Ok(RawResponse::new(response.status, response.headers, response.url, body))
}

/// Attempt loop shared by both transports
///
/// `finish` turns the final response into the caller's value; a
/// [`AttemptErrorKind::Read`] failure from it is retried like any other read
/// failure.
pub(crate) fn send_with_retries<T, F>(
    connector: &dyn Connector,
    sleeper: &dyn Sleeper,
    mut request: PreparedRequest,
    policy: RetryPolicy,
    mut finish: F,
) -> Result<T>
where
    F: FnMut(ConnectorResponse) -> std::result::Result<T, AttemptError>,
{
    let mut handler = RetryHandler::new(policy);

    loop {
        debug!(
            method = %request.method,
            url = %redact_url(&request.url),
            retries = handler.attempts(),
            "Sending request"
        );

        let response = match connector.send(&request) {
            Ok(response) => response,
            Err(failure) => {
                let delay = retry_or_fail(&mut handler, &request, failure)?;
                sleeper.sleep(delay);
                continue;
            }
        };

        let status = response.status.as_u16();

        if response.status.is_redirection() {
            if let Some(next) = follow_redirect(&request, &response) {
                match handler.should_retry(RetryCause::Redirect, None) {
                    RetryDecision::Retry { .. } => {
                        debug!(
                            status,
                            location = %redact_url(&next.url),
                            "Following redirect"
                        );
                        drop(response);
                        request = next;
                        continue;
                    }
                    RetryDecision::NoRetry => {
                        warn!(status, "Redirect budget exhausted, returning last response");
                    }
                }
            }
        } else if handler.policy().is_retryable_status(status) {
            let retry_after = parse_retry_after(&response.headers);
            match handler.should_retry(RetryCause::Status(status), retry_after) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        status,
                        url = %redact_url(&request.url),
                        retry = handler.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Retryable status, retrying"
                    );
                    drop(response);
                    sleeper.sleep(delay);
                    continue;
                }
                RetryDecision::NoRetry => {
                    warn!(status, "Status retry budget exhausted, returning last response");
                }
            }
        }

        match finish(response) {
            Ok(value) => return Ok(value),
            Err(failure) => {
                let delay = retry_or_fail(&mut handler, &request, failure)?;
                sleeper.sleep(delay);
            }
        }
    }
}

fn retry_or_fail(
    handler: &mut RetryHandler,
    request: &PreparedRequest,
    failure: AttemptError,
) -> Result<Duration> {
    let cause = match failure.kind() {
        AttemptErrorKind::Connect => RetryCause::Connect,
        AttemptErrorKind::Read => RetryCause::Read,
        AttemptErrorKind::Other => {
            error!(url = %redact_url(&request.url), error = %failure, "Request failed");
            return Err(transport_error(request, failure, handler.attempts()));
        }
    };

    match handler.should_retry(cause, None) {
        RetryDecision::Retry { delay } => {
            warn!(
                url = %redact_url(&request.url),
                error = %failure,
                retry = handler.attempts(),
                delay_ms = delay.as_millis() as u64,
                "{}, retrying", cause
            );
            Ok(delay)
        }
        RetryDecision::NoRetry => {
            error!(
                url = %redact_url(&request.url),
                error = %failure,
                retries = handler.attempts(),
                "Retry budget exhausted"
            );
            Err(transport_error(request, failure, handler.attempts()))
        }
    }
}

fn transport_error(request: &PreparedRequest, failure: AttemptError, retries: u32) -> Error {
    let message = format!("{} after {} retries", failure, retries);
    Error::transport(redact_url(&request.url), message, Some(failure.into_source()))
}

/// Build the next request for a redirect response, if it has a usable target
///
/// 303 turns any method but HEAD into a body-less GET. `Authorization` is
/// dropped when the target has a different origin.
fn follow_redirect(
    request: &PreparedRequest,
    response: &ConnectorResponse,
) -> Option<PreparedRequest> {
    let location = response.headers.get(LOCATION)?.to_str().ok()?;
    let target = request.url.join(location).ok()?;

    let mut next = request.clone();

    if response.status == StatusCode::SEE_OTHER && next.method != Method::HEAD {
        next.method = Method::GET;
        next.body = Payload::Empty;
        next.headers.remove(CONTENT_TYPE);
        next.headers.remove(CONTENT_LENGTH);
    }

    if target.origin() != request.url.origin() {
        next.headers.remove(AUTHORIZATION);
    }

    next.url = target;
    Some(next)
}

/// `Retry-After` in delta-seconds form; HTTP dates are ignored
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let seconds: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}

/// URL without query string or userinfo, safe to log
pub fn redact_url(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.set_fragment(None);
    let _ = clean.set_username("");
    let _ = clean.set_password(None);
    clean.to_string()
}
