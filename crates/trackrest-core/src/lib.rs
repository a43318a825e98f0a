//! Trackrest Core - Resilient REST client for tracking and model-registry services
//!
//! This crate provides a blocking HTTP client that talks to a tracking
//! service's JSON API and to pre-signed cloud storage URLs.
//!
//! # Main Components
//!
//! - **Credentials**: Self-validating host address, auth material and TLS options
//! - **Transport**: Bounded retries with exponential backoff over transient failures
//! - **Verifier**: Classifies responses as success, service error or protocol violation
//! - **Storage**: Retry-tuned PUT/GET transfers for large artifacts
//! - **Dispatcher**: Typed request kinds resolved from a service descriptor
//!
//! # Example
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use trackrest_core::{ApiRequest, EndpointResolver, HostCredentials, RequestDispatcher, Result};
//!
//! #[derive(Serialize)]
//! struct GetExperiment {
//!     experiment_id: String,
//! }
//!
//! #[derive(Deserialize)]
//! struct GetExperimentResponse {
//!     experiment: serde_json::Value,
//! }
//!
//! impl ApiRequest for GetExperiment {
//!     const KIND: &'static str = "GetExperiment";
//!     type Response = GetExperimentResponse;
//! }
//!
//! fn example() -> Result<()> {
//!     let credentials = HostCredentials::builder("https://tracking.example.com")
//!         .token("my-token")
//!         .build()?;
//!     let resolver = EndpointResolver::from_path("service.yaml")?;
//!     let dispatcher = RequestDispatcher::new(credentials, resolver)?;
//!
//!     let response = dispatcher.call(&GetExperiment {
//!         experiment_id: "0".to_string(),
//!     })?;
//!     println!("{}", response.experiment);
//!     Ok(())
//! }
//! ```

pub mod credentials;
pub mod dispatcher;
pub mod endpoints;
pub mod error;
pub mod headers;
pub mod http;

// Re-export main types for convenience
pub use credentials::{HostCredentials, HostCredentialsBuilder, TlsVerification};
pub use dispatcher::{ApiRequest, RequestDispatcher, USER_AGENT_PRODUCT};
pub use endpoints::{
    Endpoint, EndpointBinding, EndpointResolver, MethodDescriptor, ServiceDescriptor,
};
pub use error::{Error, ErrorKind, Result, INTERNAL_ERROR, RESOURCE_DOES_NOT_EXIST};
pub use headers::{HeaderProvider, NoExtraHeaders, StaticHeaders};
pub use http::{
    verify, CloudStorageTransport, Payload, RawResponse, RetryConfig, StorageResponse, Transport,
    API_PATH_PREFIX,
};

/// Version of the trackrest core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
