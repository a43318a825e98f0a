//! Extra request headers supplied by the embedding application

use std::collections::HashMap;
use std::fmt;

/// Source of additional headers merged into every dispatched request
///
/// Implementations may do I/O (read a token cache, ask a plugin); a failure
/// aborts the call before anything is sent.
pub trait HeaderProvider: Send + Sync + fmt::Debug {
    fn headers(&self) -> anyhow::Result<HashMap<String, String>>;
}

/// Provider that adds nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExtraHeaders;

impl HeaderProvider for NoExtraHeaders {
    fn headers(&self) -> anyhow::Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }
}

/// Fixed set of headers, typically from configuration
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StaticHeaders(HashMap<String, String>);

impl StaticHeaders {
    pub fn new(headers: HashMap<String, String>) -> Self {
        Self(headers)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }
}

impl HeaderProvider for StaticHeaders {
    fn headers(&self) -> anyhow::Result<HashMap<String, String>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_headers() {
        let provider = StaticHeaders::default().with_header("x-team", "ml");
        let headers = provider.headers().unwrap();
        assert_eq!(headers.get("x-team").map(String::as_str), Some("ml"));
        assert!(NoExtraHeaders.headers().unwrap().is_empty());
    }
}
