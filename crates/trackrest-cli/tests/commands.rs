//! Runs the `trackrest` binary against the mock server.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

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

fn descriptor() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../trackrest-core/tests/fixtures/service.yaml")
}

/// Isolated invocation: empty working directory, explicit config file, no
/// tracking variables inherited from the developer's shell
fn trackrest(workdir: &Path) -> Command {
    let config = workdir.join("trackrest.yaml");
    if !config.exists() {
        std::fs::write(&config, "retry:\n  backoff_factor: 0.0\n").unwrap();
    }

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_trackrest"));
    cmd.current_dir(workdir)
        .env("TRACKREST_CONFIG", &config)
        .env_remove("RUST_LOG")
        .env_remove("TRACKREST_LOG_FILE");
    for var in [
        "TRACKING_URI",
        "TRACKING_USERNAME",
        "TRACKING_PASSWORD",
        "TRACKING_TOKEN",
        "TRACKING_INSECURE_TLS",
        "TRACKING_SERVER_CERT_PATH",
        "TRACKING_CLIENT_CERT_PATH",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn endpoints_lists_descriptor_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let output = trackrest(dir.path())
        .args(["-o", "json", "endpoints", "--descriptor"])
        .arg(descriptor())
        .output()
        .unwrap();

    let rows = stdout_json(&output);
    let kinds: Vec<&str> = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["kind"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"CreateRun"));
    assert!(kinds.contains(&"GetRun"));
}

#[test]
fn call_creates_and_fetches_run() {
    let host = start_server();
    let dir = tempfile::tempdir().unwrap();

    let created = trackrest(dir.path())
        .env("TRACKING_URI", &host)
        .args(["-o", "json", "call", "CreateRun", "--descriptor"])
        .arg(descriptor())
        .args(["--data", r#"{"experiment_id": "1", "run_name": "cli"}"#])
        .output()
        .unwrap();
    let created = stdout_json(&created);
    let run_id = created["run"]["run_id"].as_str().unwrap().to_string();

    let fetched = trackrest(dir.path())
        .args(["--host", &host, "-o", "json", "call", "GetRun", "--descriptor"])
        .arg(descriptor())
        .args(["--data", &format!(r#"{{"run_id": "{run_id}"}}"#)])
        .output()
        .unwrap();
    assert_eq!(stdout_json(&fetched)["run"]["run_name"], "cli");
}

#[test]
fn service_error_sets_exit_code() {
    let host = start_server();
    let dir = tempfile::tempdir().unwrap();

    let output = trackrest(dir.path())
        .args(["--host", &host, "call", "GetRun", "--descriptor"])
        .arg(descriptor())
        .args(["--data", r#"{"run_id": "missing"}"#])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(4));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("RESOURCE_DOES_NOT_EXIST"), "{stderr}");
}

#[test]
fn missing_host_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let output = trackrest(dir.path())
        .args(["call", "GetRun", "--descriptor"])
        .arg(descriptor())
        .output()
        .unwrap();

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no tracking host configured"));
}

#[test]
fn request_prints_non_json_body() {
    let host = start_server();
    let dir = tempfile::tempdir().unwrap();

    let output = trackrest(dir.path())
        .args(["--host", &host, "request", "/get-artifact", "--data", r#"{"path": "m.pkl"}"#])
        .output()
        .unwrap();

    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout), "not json\n");
}

#[test]
fn upload_then_download_round_trip() {
    let host = start_server();
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("weights.bin");
    let target = dir.path().join("copy.bin");
    std::fs::write(&source, b"layer-0 layer-1").unwrap();

    let url = format!("{host}/storage/models/weights.bin");
    let upload = trackrest(dir.path())
        .args(["-o", "json", "upload"])
        .arg(format!("{url}?failures=1"))
        .arg("--file")
        .arg(&source)
        .output()
        .unwrap();
    let summary = stdout_json(&upload);
    assert_eq!(summary["direction"], "upload");
    assert_eq!(summary["bytes"], 15);
    assert_eq!(summary["url"], url);

    let download = trackrest(dir.path())
        .args(["-o", "json", "download", &url, "--file"])
        .arg(&target)
        .output()
        .unwrap();
    assert_eq!(stdout_json(&download)["status"], 200);
    assert_eq!(std::fs::read(&target).unwrap(), b"layer-0 layer-1");
}

#[test]
fn download_of_missing_object_leaves_no_file() {
    let host = start_server();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("absent.bin");

    let output = trackrest(dir.path())
        .args(["download", &format!("{host}/storage/absent"), "--file"])
        .arg(&target)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(5));
    assert!(!target.exists());
}

#[test]
fn config_show_redacts_token() {
    let dir = tempfile::tempdir().unwrap();
    let output = trackrest(dir.path())
        .env("TRACKING_URI", "https://tracking.example.com")
        .env("TRACKING_TOKEN", "super-secret-token")
        .args(["config", "show", "--format", "json"])
        .output()
        .unwrap();

    let shown = stdout_json(&output);
    assert_eq!(shown["tracking"]["host"], "https://tracking.example.com");
    assert_eq!(shown["tracking"]["token"], "***");
    assert_eq!(shown["retry"]["backoff_factor"], 0.0);
}
