//! In-process stand-in for a tracking service and a storage bucket.
//!
//! Besides a tiny runs API under `/api/2.0/tracking`, it exposes endpoints
//! that misbehave on purpose (flaky statuses, non-JSON bodies, redirects) so
//! clients can be tested against real HTTP.

use std::{collections::HashMap, sync::Arc};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: String,
    pub experiment_id: String,
    pub run_name: String,
    pub status: String,
}

#[derive(Deserialize)]
pub struct CreateRun {
    pub experiment_id: String,
    #[serde(default)]
    pub run_name: Option<String>,
}

#[derive(Deserialize)]
pub struct GetRun {
    pub run_id: String,
}

#[derive(Deserialize)]
pub struct Flaky {
    /// Counter name, so concurrent tests don't interfere
    pub key: String,
    /// How many requests fail before one succeeds
    pub failures: u32,
    #[serde(default = "default_flaky_status")]
    pub status: u16,
    /// Send a plain-text body on failure instead of JSON
    #[serde(default)]
    pub text: bool,
}

fn default_flaky_status() -> u16 {
    500
}

#[derive(Deserialize)]
pub struct StorageFaults {
    /// Respond 503 this many times before serving the request
    #[serde(default)]
    pub failures: u32,
}

#[derive(Default)]
pub struct MockState {
    runs: RwLock<HashMap<String, Run>>,
    counters: RwLock<HashMap<String, u32>>,
    objects: RwLock<HashMap<String, Bytes>>,
}

impl MockState {
    /// Bump the named counter and report whether it is still within `failures`
    async fn should_fail(&self, key: &str, failures: u32) -> (bool, u32) {
        let mut counters = self.counters.write().await;
        let seen = counters.entry(key.to_string()).or_insert(0);
        *seen += 1;
        (*seen <= failures, *seen)
    }
}

pub type Db = Arc<MockState>;

pub fn app() -> Router {
    let db: Db = Arc::new(MockState::default());
    Router::new()
        .route("/api/2.0/tracking/runs/create", post(create_run))
        .route("/api/2.0/tracking/runs/get", get(get_run))
        .route("/api/2.0/tracking/runs/search", get(search_runs))
        .route("/api/2.0/test/flaky", get(flaky))
        .route("/api/2.0/test/not-json", get(not_json))
        .route("/api/2.0/test/headers", get(echo_headers))
        .route("/api/2.0/test/redirect", get(redirect_to_headers))
        .route("/api/2.0/test/see-other", post(see_other))
        .route("/api/2.0/test/rate-limited", get(rate_limited))
        .route("/get-artifact", get(get_artifact))
        .route(
            "/storage/{*key}",
            put(put_object).get(get_object).layer(DefaultBodyLimit::disable()),
        )
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn service_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(json!({"error_code": code, "message": message.into()}))).into_response()
}

async fn create_run(State(db): State<Db>, Json(input): Json<CreateRun>) -> Json<Value> {
    let run_id = Uuid::new_v4().simple().to_string();
    let run = Run {
        run_id: run_id.clone(),
        experiment_id: input.experiment_id,
        run_name: input.run_name.unwrap_or_else(|| "unnamed".to_string()),
        status: "RUNNING".to_string(),
    };
    db.runs.write().await.insert(run_id, run.clone());
    Json(json!({ "run": run }))
}

async fn get_run(State(db): State<Db>, Query(query): Query<GetRun>) -> Response {
    let runs = db.runs.read().await;
    match runs.get(&query.run_id) {
        Some(run) => Json(json!({ "run": run })).into_response(),
        None => service_error(
            StatusCode::NOT_FOUND,
            "RESOURCE_DOES_NOT_EXIST",
            format!("Run '{}' not found", query.run_id),
        ),
    }
}

/// `experiment_ids` may repeat; runs of any listed experiment are returned
async fn search_runs(
    State(db): State<Db>,
    Query(params): Query<Vec<(String, String)>>,
) -> Json<Value> {
    let wanted: Vec<&str> = params
        .iter()
        .filter(|(key, _)| key == "experiment_ids")
        .map(|(_, value)| value.as_str())
        .collect();
    let max_results = params
        .iter()
        .find(|(key, _)| key == "max_results")
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(usize::MAX);

    let runs = db.runs.read().await;
    let mut matching: Vec<&Run> = runs
        .values()
        .filter(|run| wanted.contains(&run.experiment_id.as_str()))
        .collect();
    matching.sort_by(|a, b| a.run_name.cmp(&b.run_name));
    matching.truncate(max_results);
    Json(json!({ "runs": matching }))
}

async fn flaky(State(db): State<Db>, Query(query): Query<Flaky>) -> Response {
    let (fail, attempt) = db.should_fail(&query.key, query.failures).await;
    if !fail {
        return Json(json!({ "attempts": attempt })).into_response();
    }

    let status = StatusCode::from_u16(query.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if query.text {
        (status, "upstream exploded").into_response()
    } else {
        service_error(status, "TEMPORARILY_UNAVAILABLE", format!("attempt {} failed", attempt))
    }
}

async fn not_json() -> &'static str {
    "not json"
}

async fn get_artifact() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "not json")
}

async fn echo_headers(headers: HeaderMap) -> Json<Value> {
    let map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();
    Json(json!({ "headers": map }))
}

async fn redirect_to_headers() -> Redirect {
    Redirect::temporary("/api/2.0/test/headers")
}

async fn see_other() -> Redirect {
    Redirect::to("/api/2.0/test/headers")
}

async fn rate_limited() -> Response {
    service_error(StatusCode::TOO_MANY_REQUESTS, "RESOURCE_DOES_NOT_EXIST", "x")
}

async fn put_object(
    State(db): State<Db>,
    Path(key): Path<String>,
    Query(faults): Query<StorageFaults>,
    body: Bytes,
) -> StatusCode {
    let (fail, _) = db.should_fail(&format!("put:{key}"), faults.failures).await;
    if fail {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    db.objects.write().await.insert(key, body);
    StatusCode::OK
}

async fn get_object(
    State(db): State<Db>,
    Path(key): Path<String>,
    Query(faults): Query<StorageFaults>,
) -> Response {
    let (fail, _) = db.should_fail(&format!("get:{key}"), faults.failures).await;
    if fail {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    let objects = db.objects.read().await;
    match objects.get(&key) {
        Some(body) => body.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
