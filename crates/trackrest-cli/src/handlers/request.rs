//! Request command handler

use super::utils::{build_dispatcher, read_payload};
use crate::cli::RequestArgs;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::logging::timing::Timer;
use crate::output::OutputWriter;
use serde_json::Value;
use std::fs;
use tracing::{debug, instrument};
use trackrest_core::http::Method;
use trackrest_core::{EndpointResolver, RawResponse};

/// Handle the request command
#[instrument(skip(args, config, output), fields(endpoint = %args.endpoint, method = %args.method))]
pub fn handle_request(args: RequestArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let _timer = Timer::with_details("request_command", &args.endpoint);

    let method = parse_method(&args.method)?;
    let payload = read_payload(args.data.as_deref(), None)?;
    let body = (!payload.is_null()).then_some(payload);

    let dispatcher = build_dispatcher(config, EndpointResolver::default())?;

    let spinner = output.spinner(&format!("{} {}", method, args.endpoint));
    let result = dispatcher.request(&args.endpoint, method, body.as_ref());
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let response = result?;
    debug!(status = response.status().as_u16(), bytes = response.body().len(), "Request completed");

    match args.save_to {
        Some(path) => {
            fs::write(&path, response.body())?;
            output.success(&format!(
                "Saved {} bytes to {}",
                response.body().len(),
                path.display()
            ))
        }
        None => print_body(&response, output),
    }
}

fn parse_method(raw: &str) -> Result<Method> {
    Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes())
        .map_err(|_| Error::invalid_args(format!("'{}' is not an HTTP method", raw)))
}

/// JSON bodies go through the output format; anything else is printed as is
fn print_body(response: &RawResponse, output: &mut OutputWriter) -> Result<()> {
    match response.json::<Value>() {
        Ok(value) => output.data(&value),
        Err(_) => {
            output.write_bytes(response.body())?;
            if !response.body().ends_with(b"\n") {
                output.write_bytes(b"\n")?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::OutputFormat;
    use crate::output::tests::writer;
    use trackrest_core::http::{HeaderMap, StatusCode, Url};

    fn response(body: &'static str) -> RawResponse {
        RawResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            Url::parse("http://host/get-artifact").unwrap(),
            body,
        )
    }

    #[test]
    fn test_parse_method() {
        assert_eq!(parse_method("post").unwrap(), Method::POST);
        assert_eq!(parse_method(" GET ").unwrap(), Method::GET);
        assert!(matches!(parse_method("NOT A VERB"), Err(Error::InvalidArgs(_))));
    }

    #[test]
    fn test_print_json_body_uses_format() {
        let (mut output, buffer) = writer(OutputFormat::Json);
        print_body(&response(r#"{ "a": 1 }"#), &mut output).unwrap();
        assert_eq!(buffer.contents(), "{\"a\":1}\n");
    }

    #[test]
    fn test_print_text_body_verbatim() {
        let (mut output, buffer) = writer(OutputFormat::Json);
        print_body(&response("not json"), &mut output).unwrap();
        assert_eq!(buffer.contents(), "not json\n");
    }
}
