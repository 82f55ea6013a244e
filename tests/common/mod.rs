//! In-process stand-in for the Canvas rubric criteria endpoints.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use rubric_sync_core::config::{CanvasConfig, RateLimitConfig, RetryPolicy};
use rubric_sync_core::CanvasClient;

pub const TOKEN: &str = "secret-token";
pub const CRITERIA_PATH: &str = "/api/v1/courses/:course/rubrics/:rubric/criteria";
pub const CRITERION_PATH: &str = "/api/v1/courses/:course/rubrics/:rubric/criteria/:id";

/// Binds an ephemeral port, builds the router with the resulting base URL and
/// serves it in the background.
pub async fn serve<F>(build: F) -> String
where
    F: FnOnce(String) -> Router,
{
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let base = format!("http://{}", listener.local_addr().expect("local addr"));
    let app = build(base.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake canvas server");
    });
    base
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 5,
        jitter: 0.0,
        ..Default::default()
    }
}

pub fn client(base: &str) -> CanvasClient {
    client_with(base, fast_retry())
}

pub fn client_with(base: &str, retry: RetryPolicy) -> CanvasClient {
    client_with_limits(base, retry, RateLimitConfig::default())
}

pub fn client_with_limits(base: &str, retry: RetryPolicy, rate_limit: RateLimitConfig) -> CanvasClient {
    let canvas = CanvasConfig {
        base_url: base.to_string(),
        timeout_secs: 5,
        page_size: 2,
    };
    CanvasClient::with_parts(&canvas, retry, rate_limit, TOKEN).expect("client should build")
}

pub fn authorised(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

/// A rubric held in memory, served with cursor pagination.
#[derive(Clone, Default)]
pub struct FakeCanvas {
    pub criteria: Arc<Mutex<Vec<Value>>>,
    pub mutations: Arc<AtomicUsize>,
    next_id: Arc<AtomicUsize>,
}

impl FakeCanvas {
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn names(&self) -> Vec<String> {
        self.criteria
            .lock()
            .unwrap()
            .iter()
            .map(|c| c["description"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(CRITERIA_PATH, get(list).post(create))
            .route(CRITERION_PATH, put(update).delete(remove))
            .with_state(self.clone())
    }
}

async fn list(
    State(fake): State<FakeCanvas>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !authorised(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let per_page: usize = query
        .get("per_page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(10);
    let offset: usize = query
        .get("cursor")
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    let criteria = fake.criteria.lock().unwrap();
    let page: Vec<Value> = criteria.iter().skip(offset).take(per_page).cloned().collect();
    let next = offset + per_page;
    let next_cursor = (next < criteria.len()).then(|| next.to_string());
    Json(json!({ "criteria": page, "next_cursor": next_cursor })).into_response()
}

async fn create(
    State(fake): State<FakeCanvas>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorised(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    fake.mutations.fetch_add(1, Ordering::SeqCst);
    let id = fake.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    let mut criterion = body["criterion"].clone();
    criterion["id"] = json!(format!("_{id}"));
    fake.criteria.lock().unwrap().push(criterion.clone());
    (StatusCode::CREATED, Json(criterion)).into_response()
}

async fn update(
    State(fake): State<FakeCanvas>,
    headers: HeaderMap,
    Path((_course, _rubric, id)): Path<(String, String, String)>,
    Json(body): Json<Value>,
) -> Response {
    if !authorised(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    fake.mutations.fetch_add(1, Ordering::SeqCst);
    let mut criteria = fake.criteria.lock().unwrap();
    match criteria.iter_mut().find(|c| c["id"] == json!(id)) {
        Some(existing) => {
            let mut replacement = body["criterion"].clone();
            replacement["id"] = json!(id);
            *existing = replacement.clone();
            Json(replacement).into_response()
        }
        None => (StatusCode::NOT_FOUND, "no such criterion").into_response(),
    }
}

async fn remove(
    State(fake): State<FakeCanvas>,
    headers: HeaderMap,
    Path((_course, _rubric, id)): Path<(String, String, String)>,
) -> Response {
    if !authorised(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    fake.mutations.fetch_add(1, Ordering::SeqCst);
    let mut criteria = fake.criteria.lock().unwrap();
    let before = criteria.len();
    criteria.retain(|c| c["id"] != json!(id));
    if criteria.len() == before {
        return (StatusCode::NOT_FOUND, "no such criterion").into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}
