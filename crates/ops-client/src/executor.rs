//! Request execution: auth, retries, 401 recovery, classification
//!
//! One logical call is a loop of attempts. Each attempt fetches a token,
//! builds a fresh request through the caller's closure, sends it and buffers
//! the body. A 401 inside an attempt triggers token invalidation and exactly
//! one resend per call; after that a 401 is terminal. Retryable statuses and
//! transport failures go back round the loop after a backoff sleep, up to
//! `max_retries` extra attempts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use ops_auth::TokenCache;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::accept::Accept;
use crate::classify::classify_response;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::metrics;
use crate::quota::QuotaTracker;
use crate::retry::{RetryPolicy, is_retryable, is_retryable_status};

/// A completed HTTP exchange with its body fully read.
struct Exchange {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

/// Stateless per call; shares the token cache and quota tracker of its client.
pub struct RequestExecutor {
    http: reqwest::Client,
    tokens: Arc<TokenCache>,
    quota: Arc<QuotaTracker>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RequestExecutor {
    pub fn new(
        http: reqwest::Client,
        tokens: Arc<TokenCache>,
        quota: Arc<QuotaTracker>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            tokens,
            quota,
            policy,
            timeout,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Execute a request and return the raw 200 body.
    ///
    /// `build` is called once per send (retries and the 401 resend included)
    /// and must produce a complete request; bearer and `Accept` headers are
    /// added here.
    pub async fn execute<F>(&self, ctx: &Context, build: F) -> Result<Bytes>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let request_id = format!("req_{}", Uuid::new_v4().as_simple());
        self.execute_traced(ctx, &build, request_id).await
    }

    /// Execute a request and decode the body as UTF-8 text.
    pub async fn execute_text<F>(&self, ctx: &Context, build: F) -> Result<String>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let body = self.execute(ctx, build).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    #[instrument(skip_all, fields(request_id = %request_id))]
    async fn execute_traced<F>(&self, ctx: &Context, build: &F, request_id: String) -> Result<Bytes>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let result = ctx.run(self.run_attempts(ctx, build)).await;
        if let Err(e) = &result {
            metrics::record_failure(e.kind());
            warn!(error = %e, kind = e.kind(), "request failed");
        }
        result
    }

    async fn run_attempts<F>(&self, ctx: &Context, build: &F) -> Result<Bytes>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        // Scoped to this call so unrelated concurrent calls recover independently
        let recovered = AtomicBool::new(false);
        let mut retry = 0u32;

        loop {
            let (err, retryable) = match self.attempt(build, &recovered).await {
                Ok(exchange) if exchange.status == StatusCode::OK => {
                    debug!(attempt = retry + 1, bytes = exchange.body.len(), "request succeeded");
                    return Ok(exchange.body);
                }
                Ok(exchange) => {
                    let status = exchange.status.as_u16();
                    let err = classify_response(status, &exchange.headers, &exchange.body);
                    let retryable = is_retryable_status(status) || is_retryable(&err);
                    (err, retryable)
                }
                Err(err) => {
                    let retryable = is_retryable(&err);
                    (err, retryable)
                }
            };

            if !retryable || retry >= self.policy.max_retries {
                if retryable {
                    warn!(attempts = retry + 1, "retries exhausted");
                }
                return Err(err);
            }

            retry += 1;
            let delay = self.policy.backoff_delay(retry);
            metrics::record_retry(&retry_reason(&err));
            warn!(
                error = %err,
                retry,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                "retrying after transient failure"
            );
            ctx.sleep(delay).await?;
        }
    }

    /// One attempt, including the single stale-token resend.
    async fn attempt<F>(&self, build: &F, recovered: &AtomicBool) -> Result<Exchange>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let token = self.tokens.token().await?;
        let mut response = self.send(build, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED && !recovered.swap(true, Ordering::SeqCst)
        {
            self.quota.update_from_headers(response.headers());
            metrics::record_token_recovery();
            info!("401 with cached token, invalidating and resending once");
            drop(response);

            self.tokens.invalidate().await;
            let token = self.tokens.token().await?;
            response = self.send(build, &token).await?;
        }

        let status = response.status();
        let headers = response.headers().clone();
        self.quota.update_from_headers(&headers);
        let body = response.bytes().await?;

        Ok(Exchange {
            status,
            headers,
            body,
        })
    }

    async fn send<F>(&self, build: &F, token: &str) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync,
    {
        let mut request = build(&self.http)
            .build()
            .map_err(|e| Error::validation("request", e.to_string()))?;

        let accept = Accept::for_path(request.url().path());
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::Auth {
                status: None,
                message: format!("token is not a valid header value: {e}"),
            })?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(ACCEPT, accept.header_value());
        if request.timeout().is_none() {
            *request.timeout_mut() = Some(self.timeout);
        }

        debug!(method = %request.method(), url = %request.url(), accept = accept.media_type(), "sending request");
        let started = Instant::now();
        let response = self.http.execute(request).await?;
        metrics::record_response(response.status().as_u16(), started.elapsed().as_secs_f64());
        Ok(response)
    }
}

fn retry_reason(err: &Error) -> String {
    match err {
        Error::Transport { kind, .. } => format!("transport_{}", kind.label()),
        other => match other.status() {
            Some(status) => format!("status_{status}"),
            None => other.kind().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportKind;
    use crate::test_support::{MockOps, MockResponse};

    const BIBLIO: &str = "/published-data/publication/epodoc/EP1000000/biblio";

    fn get(url: String) -> impl Fn(&reqwest::Client) -> reqwest::RequestBuilder + Send + Sync {
        move |client| client.get(&url)
    }

    #[tokio::test]
    async fn success_attaches_bearer_and_accept() {
        let mock = MockOps::start(vec![MockResponse::ok("<biblio/>")]).await;
        let executor = mock.executor(RetryPolicy::immediate(3));

        let body = executor
            .execute_text(&Context::new(), get(mock.url(BIBLIO)))
            .await
            .unwrap();
        assert_eq!(body, "<biblio/>");

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer tok-1"));
        assert_eq!(requests[0].accept.as_deref(), Some("application/exchange+xml"));
        assert_eq!(mock.auth_calls(), 1);
    }

    #[tokio::test]
    async fn cached_token_is_reused_across_calls() {
        let mock = MockOps::start(vec![MockResponse::ok("ok")]).await;
        let executor = mock.executor(RetryPolicy::immediate(3));
        let ctx = Context::new();

        for _ in 0..3 {
            executor.execute(&ctx, get(mock.url(BIBLIO))).await.unwrap();
        }
        assert_eq!(mock.data_calls(), 3);
        assert_eq!(mock.auth_calls(), 1);
    }

    #[tokio::test]
    async fn single_401_is_recovered_with_fresh_token() {
        let mock = MockOps::start(vec![
            MockResponse::new(401, "<fault><code>CLIENT.InvalidAccessToken</code></fault>"),
            MockResponse::ok("<biblio/>"),
        ])
        .await;
        let executor = mock.executor(RetryPolicy::immediate(3));

        let body = executor
            .execute(&Context::new(), get(mock.url(BIBLIO)))
            .await
            .unwrap();
        assert_eq!(&body[..], b"<biblio/>");
        assert_eq!(mock.data_calls(), 2);
        assert_eq!(mock.auth_calls(), 2);

        let requests = mock.requests();
        assert_eq!(requests[0].authorization.as_deref(), Some("Bearer tok-1"));
        assert_eq!(requests[1].authorization.as_deref(), Some("Bearer tok-2"));
    }

    #[tokio::test]
    async fn persistent_401_fails_after_one_recovery() {
        let mock = MockOps::start(vec![MockResponse::new(401, "")]).await;
        let executor = mock.executor(RetryPolicy::immediate(3));

        let err = executor
            .execute(&Context::new(), get(mock.url(BIBLIO)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth { status: Some(401), .. }), "{err:?}");
        assert_eq!(mock.data_calls(), 2);
        assert_eq!(mock.auth_calls(), 2);
    }

    #[tokio::test]
    async fn retryable_status_exhausts_max_retries_plus_one() {
        let mock = MockOps::start(vec![MockResponse::new(503, "down")]).await;
        let executor = mock.executor(RetryPolicy::immediate(2));

        let err = executor
            .execute(&Context::new(), get(mock.url(BIBLIO)))
            .await
            .unwrap_err();
        match err {
            Error::ServiceUnavailable { status, .. } => assert_eq!(status, 503),
            other => panic!("expected ServiceUnavailable, got {other:?}"),
        }
        assert_eq!(mock.data_calls(), 3);
        assert_eq!(mock.auth_calls(), 1);
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let mock = MockOps::start(vec![MockResponse::new(502, "bad gateway")]).await;
        let executor = mock.executor(RetryPolicy::immediate(0));

        let err = executor
            .execute(&Context::new(), get(mock.url(BIBLIO)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Http { status: 502, .. }), "{err:?}");
        assert_eq!(mock.data_calls(), 1);
    }

    #[tokio::test]
    async fn transient_failures_then_success() {
        let mock = MockOps::start(vec![
            MockResponse::new(500, "oops"),
            MockResponse::new(504, "slow"),
            MockResponse::ok("done"),
        ])
        .await;
        let executor = mock.executor(RetryPolicy::immediate(3));

        let body = executor
            .execute_text(&Context::new(), get(mock.url(BIBLIO)))
            .await
            .unwrap();
        assert_eq!(body, "done");
        assert_eq!(mock.data_calls(), 3);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        for (status, body) in [
            (404, "<error><code>SERVER.EntityNotFound</code><message>No results found</message></error>"),
            (429, "slow down"),
            (400, "<error><code>CLIENT.InvalidQuery</code><message>bad</message></error>"),
        ] {
            let mock = MockOps::start(vec![MockResponse::new(status, body)]).await;
            let executor = mock.executor(RetryPolicy::immediate(3));
            let err = executor
                .execute(&Context::new(), get(mock.url(BIBLIO)))
                .await
                .unwrap_err();
            assert_eq!(err.status(), Some(status));
            assert_eq!(mock.data_calls(), 1, "status {status} must not be retried");
        }
    }

    #[tokio::test]
    async fn not_found_body_is_classified() {
        let mock = MockOps::start(vec![MockResponse::new(
            404,
            "<error><code>SERVER.EntityNotFound</code><message>No results found</message></error>",
        )])
        .await;
        let executor = mock.executor(RetryPolicy::immediate(3));

        let err = executor
            .execute(&Context::new(), get(mock.url(BIBLIO)))
            .await
            .unwrap_err();
        match err {
            Error::NotFound { code, message, .. } => {
                assert_eq!(code.as_deref(), Some("SERVER.EntityNotFound"));
                assert_eq!(message, "No results found");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn retryable_status_wins_over_not_found_body() {
        let not_found =
            "<error><code>SERVER.EntityNotFound</code><message>No results found</message></error>";
        let mock = MockOps::start(vec![
            MockResponse::new(503, not_found),
            MockResponse::new(500, not_found),
            MockResponse::ok("<biblio/>"),
        ])
        .await;
        let executor = mock.executor(RetryPolicy::immediate(3));

        let body = executor
            .execute_text(&Context::new(), get(mock.url(BIBLIO)))
            .await
            .unwrap();
        assert_eq!(body, "<biblio/>");
        assert_eq!(mock.data_calls(), 3);

        let mock = MockOps::start(vec![MockResponse::new(503, not_found)]).await;
        let executor = mock.executor(RetryPolicy::immediate(2));
        let err = executor
            .execute(&Context::new(), get(mock.url(BIBLIO)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { status: 503, .. }), "{err:?}");
        assert_eq!(mock.data_calls(), 3);
    }

    #[tokio::test]
    async fn stale_token_is_recovered_on_a_later_attempt() {
        let mock = MockOps::start(vec![
            MockResponse::new(503, "down"),
            MockResponse::new(401, "<fault><code>CLIENT.InvalidAccessToken</code></fault>"),
            MockResponse::ok("<biblio/>"),
        ])
        .await;
        let executor = mock.executor(RetryPolicy::new(3, Duration::from_millis(10)));

        let body = executor
            .execute_text(&Context::new(), get(mock.url(BIBLIO)))
            .await
            .unwrap();
        assert_eq!(body, "<biblio/>");
        assert_eq!(mock.data_calls(), 3);
        assert_eq!(mock.auth_calls(), 2);

        let bearers: Vec<_> = mock
            .requests()
            .into_iter()
            .map(|r| r.authorization.unwrap_or_default())
            .collect();
        assert_eq!(bearers, ["Bearer tok-1", "Bearer tok-1", "Bearer tok-2"]);
    }

    #[tokio::test]
    async fn concurrent_calls_each_recover_once() {
        let mock = MockOps::start_rejecting(vec![MockResponse::ok("<biblio/>")], "stale").await;
        let executor = mock.executor(RetryPolicy::immediate(0));
        executor
            .tokens()
            .prime("stale", Instant::now() + Duration::from_secs(3600))
            .await;

        let ctx = Context::new();
        let (first, second) = tokio::join!(
            executor.execute(&ctx, get(mock.url(BIBLIO))),
            executor.execute(&ctx, get(mock.url(BIBLIO))),
        );
        assert_eq!(&first.unwrap()[..], b"<biblio/>");
        assert_eq!(&second.unwrap()[..], b"<biblio/>");
        assert_eq!(mock.rejected(), 2);
        assert_eq!(mock.data_calls(), 2);
        assert!((1..=2).contains(&mock.auth_calls()));
    }

    #[tokio::test]
    async fn connection_refused_is_retried_then_surfaced() {
        let mock = MockOps::start(vec![MockResponse::ok("unused")]).await;
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = format!("http://{}/rest-services{BIBLIO}", listener.local_addr().unwrap());
        drop(listener);

        let executor = mock.executor(RetryPolicy::immediate(2));
        let err = executor
            .execute(&Context::new(), get(dead))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Transport { kind: TransportKind::Connect, .. }),
            "{err:?}"
        );
        assert_eq!(mock.data_calls(), 0);
        assert_eq!(mock.auth_calls(), 1);
    }

    #[tokio::test]
    async fn quota_headers_are_recorded() {
        let mock = MockOps::start(vec![
            MockResponse::ok("<biblio/>")
                .header("x-individualquotaperhour", "used=1500,quota=450000000")
                .header("x-registeredquotaperweek", "used=98000,quota=5000000000")
                .header("x-throttling-control", "idle (retrieval=green:200, search=green:30)"),
        ])
        .await;
        let executor = mock.executor(RetryPolicy::immediate(0));
        assert!(executor.quota().get().is_none());

        executor
            .execute(&Context::new(), get(mock.url(BIBLIO)))
            .await
            .unwrap();

        let snapshot = executor.quota().get().unwrap();
        assert_eq!(snapshot.status.as_deref(), Some("idle"));
        let individual = snapshot.individual.unwrap();
        assert_eq!(individual.used, 1500);
        assert_eq!(individual.quota, 450_000_000);
        assert_eq!(snapshot.registered.unwrap().used, 98_000);
    }

    #[tokio::test]
    async fn quota_is_updated_from_error_responses() {
        let mock = MockOps::start(vec![
            MockResponse::new(403, "<fault><code>CLIENT.RobotDetected</code><message>m</message></fault>")
                .header("x-throttling-control", "overloaded (search=black:0)"),
        ])
        .await;
        let executor = mock.executor(RetryPolicy::immediate(3));

        let err = executor
            .execute(&Context::new(), get(mock.url("/published-data/search")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));
        let snapshot = executor.quota().get().unwrap();
        assert_eq!(snapshot.status.as_deref(), Some("overloaded"));
        assert_eq!(mock.requests()[0].accept.as_deref(), Some("application/ops+xml"));
    }

    #[tokio::test]
    async fn expired_cached_token_is_refreshed_before_data_call() {
        let mock = MockOps::start(vec![MockResponse::ok("ok")]).await;
        let executor = mock.executor(RetryPolicy::immediate(0));
        executor.tokens().prime("expired", Instant::now()).await;

        executor
            .execute(&Context::new(), get(mock.url(BIBLIO)))
            .await
            .unwrap();
        assert_eq!(mock.auth_calls(), 1);
        assert_eq!(mock.data_calls(), 1);
        assert_eq!(mock.requests()[0].authorization.as_deref(), Some("Bearer tok-1"));
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_request() {
        let mock = MockOps::start(vec![
            MockResponse::ok("late").delayed(Duration::from_secs(10)),
        ])
        .await;
        let executor = mock.executor(RetryPolicy::immediate(3));
        let ctx = Context::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = executor.execute(&ctx, get(mock.url(BIBLIO))).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(mock.data_calls(), 1);
    }

    #[tokio::test]
    async fn deadline_stops_backoff_retries() {
        let mock = MockOps::start(vec![MockResponse::new(503, "down")]).await;
        let executor = mock.executor(RetryPolicy::new(5, Duration::from_secs(30)));
        let ctx = Context::new().with_timeout(Duration::from_millis(200));

        let err = executor.execute(&ctx, get(mock.url(BIBLIO))).await.unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded), "{err:?}");
        assert_eq!(mock.data_calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_context_sends_nothing() {
        let mock = MockOps::start(vec![MockResponse::ok("ok")]).await;
        let executor = mock.executor(RetryPolicy::immediate(3));
        let ctx = Context::new();
        ctx.cancel();

        let err = executor.execute(&ctx, get(mock.url(BIBLIO))).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(mock.auth_calls(), 0);
        assert_eq!(mock.data_calls(), 0);
    }

    #[tokio::test]
    async fn per_request_timeout_is_a_retryable_transport_error() {
        let mock = MockOps::start(vec![
            MockResponse::ok("late").delayed(Duration::from_secs(5)),
        ])
        .await;
        let executor = RequestExecutor::new(
            reqwest::Client::new(),
            mock.token_cache(),
            Arc::new(QuotaTracker::new()),
            RetryPolicy::immediate(1),
            Duration::from_millis(50),
        );

        let err = executor
            .execute(&Context::new(), get(mock.url(BIBLIO)))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Transport { kind: TransportKind::Timeout, .. }),
            "{err:?}"
        );
        assert_eq!(mock.data_calls(), 2);
    }

    #[tokio::test]
    async fn image_paths_request_binary_accept() {
        let mock = MockOps::start(vec![MockResponse::ok("II*\u{0}")]).await;
        let executor = mock.executor(RetryPolicy::immediate(0));

        let bytes = executor
            .execute(
                &Context::new(),
                get(mock.url("/published-data/images/EP/1000000/A1/fullimage?Range=1")),
            )
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"II*\0");
        let accept = mock.requests()[0].accept.clone().unwrap();
        assert!(accept.contains("application/tiff"));
    }

    #[test]
    fn retry_reason_labels() {
        let transport = Error::Transport {
            kind: TransportKind::Reset,
            message: "reset".into(),
        };
        assert_eq!(retry_reason(&transport), "transport_reset");
        let http = Error::Http {
            status: 502,
            body: "bad".into(),
        };
        assert_eq!(retry_reason(&http), "status_502");
    }
}
