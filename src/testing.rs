//! Shared fixtures for unit tests: an in-memory database with the real
//! migrations and a scripted provider served over real HTTP.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::config::{BreakerConfig, ProviderConfig, RateLimitConfig, WatchdogConfig};
use crate::db::models::NewMatch;
use crate::provider::{CircuitBreaker, ProviderClient, RateLimiter};
use crate::types::MatchStatus;

/// One connection so every query sees the same in-memory database.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    pool
}

pub fn new_match(id: &str, match_time: i64) -> NewMatch {
    NewMatch {
        external_id: id.to_string(),
        match_time,
        status_id: MatchStatus::NotStarted.id(),
        season_id: None,
        competition_id: None,
        home_team_id: None,
        away_team_id: None,
    }
}

pub fn envelope(results: Value) -> Value {
    json!({ "code": 0, "results": results })
}

pub fn provider_config(base_url: &str) -> ProviderConfig {
    ProviderConfig {
        base_url: base_url.to_string(),
        user: "test-user".to_string(),
        secret: "test-secret".to_string(),
        timeout: Duration::from_secs(2),
        max_retries: 0,
        retry_backoff: Duration::from_millis(10),
        breaker: BreakerConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        },
        rate_limit: RateLimitConfig {
            default_interval: Duration::ZERO,
            per_endpoint: HashMap::new(),
        },
    }
}

pub fn provider_client(cfg: &ProviderConfig) -> Arc<ProviderClient> {
    let client = ProviderClient::new(
        cfg,
        Arc::new(CircuitBreaker::new(&cfg.breaker)),
        Arc::new(RateLimiter::new(cfg.rate_limit.clone())),
    )
    .expect("build provider client");
    Arc::new(client)
}

pub fn watchdog_config() -> WatchdogConfig {
    WatchdogConfig {
        interval: Duration::from_secs(60),
        grace_secs: 120,
        lookback_secs: 120 * 60,
        batch_size: 50,
        call_delay: Duration::ZERO,
        live_interval: Duration::from_secs(30),
    }
}

// ---------------------------------------------------------------------------
// Mock provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum MockReply {
    Json(Value),
    Status(u16),
    RateLimited { retry_after_secs: u64 },
    Delayed(Duration, Value),
    Text(String),
}

#[derive(Default)]
struct MockState {
    /// Served once each, in order, before falling back to `fixed`.
    queued: Mutex<HashMap<String, VecDeque<MockReply>>>,
    fixed: Mutex<HashMap<String, MockReply>>,
    hits: Mutex<HashMap<String, usize>>,
    last_query: Mutex<HashMap<String, HashMap<String, String>>>,
}

/// Replies are keyed by path, optionally narrowed by the request's
/// `match_id`, `season_id` or `date` parameter. A narrowed reply wins over a
/// path-wide one; anything unscripted gets a 404.
pub struct MockProvider {
    pub base_url: String,
    state: Arc<MockState>,
}

impl MockProvider {
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock provider");
        let addr = listener.local_addr().expect("mock provider address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self { base_url: format!("http://{addr}"), state }
    }

    /// Serve `reply` for every matching request.
    pub fn reply(&self, path: &str, id: Option<&str>, reply: MockReply) {
        self.state.fixed.lock().unwrap().insert(key(path, id), reply);
    }

    /// Serve `reply` once, ahead of any fixed reply.
    pub fn enqueue(&self, path: &str, id: Option<&str>, reply: MockReply) {
        self.state
            .queued
            .lock()
            .unwrap()
            .entry(key(path, id))
            .or_default()
            .push_back(reply);
    }

    /// Requests received on `path`, whatever their parameters.
    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn last_query(&self, path: &str) -> Option<HashMap<String, String>> {
        self.state.last_query.lock().unwrap().get(path).cloned()
    }
}

fn key(path: &str, id: Option<&str>) -> String {
    match id {
        Some(id) => format!("{path}#{id}"),
        None => path.to_string(),
    }
}

impl MockState {
    fn next_reply(&self, path: &str, id: Option<&str>) -> Option<MockReply> {
        let mut keys = Vec::with_capacity(2);
        if id.is_some() {
            keys.push(key(path, id));
        }
        keys.push(key(path, None));

        let mut queued = self.queued.lock().unwrap();
        for k in &keys {
            if let Some(reply) = queued.get_mut(k).and_then(|q| q.pop_front()) {
                return Some(reply);
            }
        }
        drop(queued);

        let fixed = self.fixed.lock().unwrap();
        keys.iter().find_map(|k| fixed.get(k).cloned())
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let path = uri.path().to_string();
    let id = ["match_id", "season_id", "date"]
        .iter()
        .find_map(|p| query.get(*p).cloned());

    *state.hits.lock().unwrap().entry(path.clone()).or_default() += 1;
    state.last_query.lock().unwrap().insert(path.clone(), query);

    let Some(reply) = state.next_reply(&path, id.as_deref()) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match reply {
        MockReply::Json(body) => Json(body).into_response(),
        MockReply::Status(code) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        MockReply::RateLimited { retry_after_secs } => (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
        )
            .into_response(),
        MockReply::Delayed(delay, body) => {
            tokio::time::sleep(delay).await;
            Json(body).into_response()
        }
        MockReply::Text(body) => body.into_response(),
    }
}
