//! HTTP layer
//!
//! Blocking request execution with retries, response verification and
//! storage transfers.

pub mod connector;
pub mod retry;
pub mod storage;
pub mod transport;
pub mod verifier;

pub use connector::{
    AttemptError, AttemptErrorKind, Connector, ConnectorConfig, ConnectorResponse, Payload,
    PreparedRequest, ReqwestConnector,
};
pub use retry::{
    BackoffStrategy, RetryCause, RetryConfig, RetryDecision, RetryHandler, RetryPolicy, Sleeper,
    ThreadSleeper, DEFAULT_RETRY_CODES, MAX_BACKOFF, RETRY_AFTER_STATUS_CODES,
    TRANSIENT_FAILURE_CODES,
};
pub use storage::{
    CloudStorageTransport, StorageResponse, StorageVerb, DEFAULT_STORAGE_RETRY_ATTEMPTS,
};
pub use transport::{redact_url, RawResponse, Transport};
pub use verifier::{verify, API_PATH_PREFIX};

// Re-export the HTTP primitives used in our public API
pub use reqwest::header::HeaderMap;
pub use reqwest::{Method, StatusCode, Url};
