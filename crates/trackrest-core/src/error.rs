//! Error types for the trackrest core library
//!
//! Every failed call surfaces exactly one of four kinds: a configuration
//! problem caught before any network activity, a transport failure left over
//! after the retry budget ran out, a structured error reported by the
//! service, or a response that broke the JSON contract.

use std::fmt;
use thiserror::Error;

/// Error code reported when a requested resource does not exist.
pub const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";

/// Error code used when the service returned a JSON error body without one.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Main error type for trackrest operations
#[derive(Error, Debug)]
pub enum Error {
    /// A precondition was violated before any request was sent
    #[error("Configuration error: {field} - {message}")]
    Configuration {
        field: String,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Connection-level failure after the retry budget was exhausted
    #[error("API request to {url} failed: {message}")]
    Transport {
        url: String,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// The service answered with a structured error body
    #[error("{error_code}: {message}")]
    Service {
        status: u16,
        error_code: String,
        message: String,
        raw_body: String,
    },

    /// The response did not honour the JSON contract of the endpoint
    #[error("{message}. Response body: '{body}'")]
    Protocol {
        status: u16,
        endpoint: String,
        message: String,
        body: String,
    },
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Fieldless discriminant of [`Error`], handy for matching and logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Transport,
    Service,
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Service => write!(f, "service"),
            ErrorKind::Protocol => write!(f, "protocol"),
        }
    }
}

impl Error {
    /// Create a configuration error for the given field
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error carrying an underlying cause
    pub fn configuration_with_source(
        field: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a transport error for the given URL
    pub fn transport(
        url: impl Into<String>,
        message: impl Into<String>,
        source: Option<anyhow::Error>,
    ) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.into(),
            source,
        }
    }

    /// Create a protocol error
    pub fn protocol(
        status: u16,
        endpoint: impl Into<String>,
        message: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            status,
            endpoint: endpoint.into(),
            message: message.into(),
            body: body.into(),
        }
    }

    /// The kind of failure this error represents
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. } => ErrorKind::Configuration,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Service { .. } => ErrorKind::Service,
            Error::Protocol { .. } => ErrorKind::Protocol,
        }
    }

    /// HTTP status of the response that caused this error, if there was one
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Service { status, .. } | Error::Protocol { status, .. } => Some(*status),
            Error::Configuration { .. } | Error::Transport { .. } => None,
        }
    }

    /// Service error code, for `Service` errors only
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Error::Service { error_code, .. } => Some(error_code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_display() {
        let err = Error::Service {
            status: 404,
            error_code: RESOURCE_DOES_NOT_EXIST.to_string(),
            message: "Node type not supported".to_string(),
            raw_body: String::new(),
        };
        assert_eq!(err.to_string(), "RESOURCE_DOES_NOT_EXIST: Node type not supported");
        assert_eq!(err.kind(), ErrorKind::Service);
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.error_code(), Some(RESOURCE_DOES_NOT_EXIST));
    }

    #[test]
    fn test_protocol_error_display_includes_body() {
        let err = Error::protocol(400, "/my/endpoint", "API request failed", "oops");
        assert!(err.to_string().contains("Response body: 'oops'"));
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_configuration_error_names_field() {
        let err = Error::configuration("host", "must not be empty");
        assert!(err.to_string().contains("host"));
        assert_eq!(err.status(), None);
        assert_eq!(err.error_code(), None);
    }

    #[test]
    fn test_transport_error_keeps_source() {
        let err = Error::transport(
            "http://my-host/x",
            "connection refused",
            Some(anyhow::anyhow!("os error 111")),
        );
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(std::error::Error::source(&err).is_some());
    }
}
