//! Response classification
//!
//! Turns a completed response into either the response itself or one of the
//! `Service` / `Protocol` errors.

use serde::de::IgnoredAny;
use serde_json::Value;

use super::transport::RawResponse;
use crate::error::{Error, Result, INTERNAL_ERROR};

/// Path prefix of endpoints whose successful responses are always JSON
pub const API_PATH_PREFIX: &str = "/api/2.0";

/// Check the status and body format of `response` fetched from `endpoint`
pub fn verify(response: RawResponse, endpoint: &str) -> Result<RawResponse> {
    let status = response.status().as_u16();

    if status != 200 {
        return Err(match serde_json::from_slice::<Value>(response.body()) {
            Ok(json) => service_error(status, json, &response),
            Err(_) => Error::protocol(
                status,
                endpoint,
                format!(
                    "API request to endpoint {} failed with error code {} != 200",
                    endpoint, status
                ),
                response.text(),
            ),
        });
    }

    if endpoint.starts_with(API_PATH_PREFIX) && !is_json(response.body()) {
        return Err(Error::protocol(
            status,
            endpoint,
            "API request to endpoint was successful but the response body was not in a valid JSON \
             format",
            response.text(),
        ));
    }

    Ok(response)
}

fn service_error(status: u16, json: Value, response: &RawResponse) -> Error {
    let error_code = json
        .get("error_code")
        .and_then(Value::as_str)
        .unwrap_or(INTERNAL_ERROR)
        .to_string();

    let message = match json.get("message").and_then(Value::as_str) {
        Some(message) => message.to_string(),
        None => format!("Response: {}", json),
    };

    Error::Service {
        status,
        error_code,
        message,
        raw_body: response.text().into_owned(),
    }
}

fn is_json(body: &[u8]) -> bool {
    serde_json::from_slice::<IgnoredAny>(body).is_ok()
}
