//! End-to-end tests against the mock tracking server.
//!
//! Each test starts `trackrest-mock` on a random port in a background thread
//! with its own runtime, then drives the blocking client over real HTTP.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use trackrest_core::http::{Method, Sleeper, StatusCode};
use trackrest_core::{
    ApiRequest, CloudStorageTransport, EndpointResolver, Error, ErrorKind, HostCredentials, Payload,
    RequestDispatcher, RetryConfig, RESOURCE_DOES_NOT_EXIST,
};

fn start_server() -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            trackrest_mock::run(listener).await
        })
        .unwrap();
    });

    format!("http://{addr}")
}

fn resolver() -> EndpointResolver {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/service.yaml");
    EndpointResolver::from_path(path).unwrap()
}

fn no_backoff(max_retries: u32) -> RetryConfig {
    RetryConfig::new(max_retries).with_backoff_factor(0.0)
}

fn dispatcher(host: &str, config: RetryConfig) -> RequestDispatcher {
    let credentials = HostCredentials::builder(host).token("secret-token").build().unwrap();
    RequestDispatcher::with_config(credentials, resolver(), config).unwrap()
}

/// Serve one connection by hand: read the request head, then write `parts`
/// with a pause before each
fn trickle_server(parts: Vec<(Duration, &'static [u8])>) -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            match stream.read(&mut byte) {
                Ok(1) => head.push(byte[0]),
                _ => return,
            }
        }
        for (pause, bytes) in parts {
            std::thread::sleep(pause);
            if stream.write_all(bytes).and_then(|_| stream.flush()).is_err() {
                return;
            }
        }
    });

    format!("http://{addr}")
}

const TRICKLE_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
    Content-Type: application/octet-stream\r\n\
    Content-Length: 4\r\n\
    Connection: close\r\n\r\nab";

#[derive(Debug, Default)]
struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

#[derive(Serialize)]
struct CreateRun {
    experiment_id: String,
    run_name: String,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Run {
    run_id: String,
    experiment_id: String,
    run_name: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    run: Run,
}

impl ApiRequest for CreateRun {
    const KIND: &'static str = "CreateRun";
    type Response = RunResponse;
}

#[derive(Serialize)]
struct GetRun {
    run_id: String,
}

impl ApiRequest for GetRun {
    const KIND: &'static str = "GetRun";
    type Response = RunResponse;
}

#[test]
fn create_then_get_run() {
    let host = start_server();
    let client = dispatcher(&host, RetryConfig::default());

    let created = client
        .call(&CreateRun {
            experiment_id: "3".to_string(),
            run_name: "baseline".to_string(),
        })
        .unwrap();
    assert_eq!(created.run.status, "RUNNING");

    let fetched = client
        .call(&GetRun {
            run_id: created.run.run_id.clone(),
        })
        .unwrap();
    assert_eq!(fetched.run, created.run);
}

#[test]
fn missing_run_is_service_error() {
    let host = start_server();
    let client = dispatcher(&host, RetryConfig::default());

    let err = client
        .call(&GetRun {
            run_id: "nope".to_string(),
        })
        .unwrap_err();

    match err {
        Error::Service {
            status,
            error_code,
            message,
            ..
        } => {
            assert_eq!(status, 404);
            assert_eq!(error_code, RESOURCE_DOES_NOT_EXIST);
            assert_eq!(message, "Run 'nope' not found");
        }
        other => panic!("expected service error, got {other:?}"),
    }
}

#[test]
fn search_sends_repeated_query_keys() {
    let host = start_server();
    let client = dispatcher(&host, RetryConfig::default());

    for (experiment, name) in [("1", "a"), ("2", "b"), ("3", "c")] {
        client
            .call_value("CreateRun", &json!({"experiment_id": experiment, "run_name": name}))
            .unwrap();
    }

    let found = client
        .call_value("SearchRuns", &json!({"experiment_ids": ["1", "3"], "max_results": 10}))
        .unwrap();
    let names: Vec<&str> = found["runs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|run| run["run_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a", "c"]);
}

#[test]
fn transient_failures_within_budget_succeed() {
    let host = start_server();
    let client = dispatcher(&host, no_backoff(3));

    let response = client
        .call_value("Flaky", &json!({"key": "within", "failures": 3}))
        .unwrap();
    assert_eq!(response["attempts"], 4);
}

#[test]
fn transient_failures_beyond_budget_reach_verifier() {
    let host = start_server();
    let client = dispatcher(&host, no_backoff(1));

    let err = client
        .call_value("Flaky", &json!({"key": "json", "failures": 2}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Service);
    assert_eq!(err.status(), Some(500));

    let err = client
        .call_value("Flaky", &json!({"key": "text", "failures": 2, "text": true}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(err.to_string().contains("upstream exploded"));
}

#[test]
fn non_json_success_depends_on_path() {
    let host = start_server();
    let client = dispatcher(&host, RetryConfig::default());

    let err = client.call_value("NotJson", &Value::Null).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);

    let response = client
        .request("/get-artifact", Method::GET, Some(&json!({"path": "model.pkl"})))
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text(), "not json");
}

#[test]
fn rate_limited_with_error_body_is_service_error() {
    let host = start_server();
    let client = dispatcher(&host, RetryConfig::new(0));

    let err = client.call_value("RateLimited", &Value::Null).unwrap_err();
    assert_eq!(err.status(), Some(429));
    assert_eq!(err.error_code(), Some(RESOURCE_DOES_NOT_EXIST));
}

#[test]
fn headers_carry_identity_and_auth() {
    let host = start_server();
    let client = dispatcher(&host, RetryConfig::default());

    let response = client.call_value("Headers", &Value::Null).unwrap();
    let headers = &response["headers"];
    assert_eq!(
        headers["user-agent"],
        format!("trackrest-client/{}", trackrest_core::VERSION)
    );
    assert_eq!(headers["authorization"], "Bearer secret-token");
}

#[test]
fn same_origin_redirect_keeps_auth() {
    let host = start_server();
    let client = dispatcher(&host, RetryConfig::default());

    let response = client.call_value("Redirect", &Value::Null).unwrap();
    assert_eq!(response["headers"]["authorization"], "Bearer secret-token");
}

#[test]
fn see_other_turns_post_into_get() {
    let host = start_server();
    let client = dispatcher(&host, RetryConfig::default());

    let response = client.call_value("SeeOther", &json!({"a": 1})).unwrap();
    assert!(response["headers"].get("content-type").is_none());
}

#[test]
fn refused_connection_is_transport_error() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let client = dispatcher(&format!("http://{addr}"), no_backoff(1));

    let err = client.call_value("Headers", &Value::Null).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[test]
fn storage_upload_and_download_with_retries() {
    let host = start_server();
    let storage = CloudStorageTransport::new()
        .unwrap()
        .with_sleeper(Arc::new(NoSleep));

    let upload_url = format!("{host}/storage/artifacts/model.bin?failures=2&X-Signature=abc");
    let response = storage
        .transfer("put", &upload_url, Payload::from(b"weights".to_vec()), &HashMap::new())
        .unwrap()
        .error_for_status()
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let download_url = format!("{host}/storage/artifacts/model.bin");
    let mut downloaded = Vec::new();
    storage
        .transfer_with("GET", &download_url, Payload::Empty, &HashMap::new(), |response| {
            response.copy_to(&mut downloaded)
        })
        .unwrap();
    assert_eq!(downloaded, b"weights");
}

#[test]
fn storage_upload_streams_file() {
    let host = start_server();
    let storage = CloudStorageTransport::new().unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, b"from disk").unwrap();

    let url = format!("{host}/storage/file.txt");
    storage
        .transfer("PUT", &url, Payload::File(file.path().to_path_buf()), &HashMap::new())
        .unwrap()
        .error_for_status()
        .unwrap();

    let body = storage
        .transfer("GET", &url, Payload::Empty, &HashMap::new())
        .unwrap()
        .bytes()
        .unwrap();
    assert_eq!(&body[..], b"from disk");
}

#[test]
fn storage_missing_object_fails_status_check() {
    let host = start_server();
    let storage = CloudStorageTransport::new().unwrap();

    let err = storage
        .transfer("GET", &format!("{host}/storage/absent"), Payload::Empty, &HashMap::new())
        .unwrap()
        .error_for_status()
        .unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[test]
fn slow_response_within_timeout_per_read_succeeds() {
    let pause = Duration::from_millis(700);
    let host = trickle_server(vec![(pause, TRICKLE_HEAD), (pause, b"cd")]);
    let client = dispatcher(&host, RetryConfig::new(0).with_timeout(Duration::from_secs(1)));

    let response = client.request("/get-artifact", Method::GET, None).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text(), "abcd");
}

#[test]
fn body_stalled_past_timeout_is_transport_error() {
    let host = trickle_server(vec![
        (Duration::ZERO, TRICKLE_HEAD),
        (Duration::from_millis(1500), b"cd"),
    ]);
    let client = dispatcher(&host, RetryConfig::new(0).with_timeout(Duration::from_secs(1)));

    let err = client.request("/get-artifact", Method::GET, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
}
