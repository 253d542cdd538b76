//! Scripted OPS mock server for executor, batch and client tests
//!
//! Serves a token endpoint at `/auth` and answers every other path from a
//! script of canned responses (the last entry repeats once the script runs
//! out). Every data request is recorded for assertions. A mock can also
//! reject one bearer token outright; those requests answer 401 after a short
//! pause and never consume the script.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::post;
use common::Secret;
use ops_auth::TokenCache;
use tokio::net::TcpListener;

use crate::executor::RequestExecutor;
use crate::quota::QuotaTracker;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, &'static str)>,
    pub body: String,
    pub delay: Duration,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub body: String,
}

struct MockState {
    script: Vec<MockResponse>,
    token_lifetime: &'static str,
    rejected_token: Option<&'static str>,
    rejected: AtomicUsize,
    data_calls: AtomicUsize,
    auth_calls: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
}

pub struct MockOps {
    pub base_url: String,
    pub auth_url: String,
    state: Arc<MockState>,
}

impl MockOps {
    pub async fn start(script: Vec<MockResponse>) -> Self {
        Self::spawn(script, "1199", None).await
    }

    pub async fn start_with_lifetime(
        script: Vec<MockResponse>,
        token_lifetime: &'static str,
    ) -> Self {
        Self::spawn(script, token_lifetime, None).await
    }

    /// Requests carrying `Bearer {token}` get a delayed 401.
    pub async fn start_rejecting(script: Vec<MockResponse>, token: &'static str) -> Self {
        Self::spawn(script, "1199", Some(token)).await
    }

    async fn spawn(
        script: Vec<MockResponse>,
        token_lifetime: &'static str,
        rejected_token: Option<&'static str>,
    ) -> Self {
        assert!(!script.is_empty(), "mock script must not be empty");
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState {
            script,
            token_lifetime,
            rejected_token,
            rejected: AtomicUsize::new(0),
            data_calls: AtomicUsize::new(0),
            auth_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        });

        let app = axum::Router::new()
            .route("/auth", post(auth_handler))
            .fallback(data_handler)
            .with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}/rest-services"),
            auth_url: format!("http://{addr}/auth"),
            state,
        }
    }

    pub fn data_calls(&self) -> usize {
        self.state.data_calls.load(Ordering::SeqCst)
    }

    pub fn auth_calls(&self) -> usize {
        self.state.auth_calls.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> usize {
        self.state.rejected.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn token_cache(&self) -> Arc<TokenCache> {
        Arc::new(TokenCache::new(
            reqwest::Client::new(),
            self.auth_url.clone(),
            Secret::from("test-key"),
            Secret::from("test-secret"),
        ))
    }

    pub fn executor(&self, policy: RetryPolicy) -> RequestExecutor {
        RequestExecutor::new(
            reqwest::Client::new(),
            self.token_cache(),
            Arc::new(QuotaTracker::new()),
            policy,
            Duration::from_secs(5),
        )
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Endpoint that accepts connections and never answers.
pub async fn silent_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}/auth")
}

async fn auth_handler(State(state): State<Arc<MockState>>) -> (StatusCode, String) {
    let n = state.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
    (
        StatusCode::OK,
        format!(
            r#"{{"access_token":"tok-{n}","expires_in":"{}","token_type":"BearerToken"}}"#,
            state.token_lifetime
        ),
    )
}

async fn data_handler(State(state): State<Arc<MockState>>, request: Request) -> Response {
    let headers = request.headers().clone();
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    if let Some(token) = state.rejected_token
        && header("authorization") == Some(format!("Bearer {token}"))
    {
        state.rejected.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        return Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body(Body::from(
                "<fault><code>CLIENT.InvalidAccessToken</code></fault>",
            ))
            .unwrap();
    }

    let index = state.data_calls.fetch_add(1, Ordering::SeqCst);
    let mut recorded = RecordedRequest {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        query: request.uri().query().map(str::to_string),
        authorization: header("authorization"),
        accept: header("accept"),
        body: String::new(),
    };
    let body = axum::body::to_bytes(request.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap();
    recorded.body = String::from_utf8_lossy(&body).to_string();
    state.requests.lock().unwrap().push(recorded);

    let scripted = state
        .script
        .get(index)
        .or_else(|| state.script.last())
        .cloned()
        .unwrap();
    if !scripted.delay.is_zero() {
        tokio::time::sleep(scripted.delay).await;
    }

    let mut builder = Response::builder().status(scripted.status);
    for (name, value) in &scripted.headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(scripted.body)).unwrap()
}
