//! Shared bearer token cache
//!
//! Readers take the `RwLock` read side and return the cached token while it
//! still has more than the safety margin left. Only a stale or missing token
//! sends a caller to the write side, where the condition is checked again so
//! that callers queued behind a refresh reuse its result instead of issuing
//! their own exchange.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use common::Secret;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::constants::TOKEN_SAFETY_MARGIN;
use crate::error::Result;
use crate::token::request_token;

struct CachedToken {
    value: Secret<String>,
    expires_at: Instant,
}

impl CachedToken {
    fn usable(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }
}

/// Thread-safe owner of the current bearer token.
///
/// Each client instance owns its own cache; nothing is shared across
/// instances.
pub struct TokenCache {
    http_client: reqwest::Client,
    token_url: String,
    consumer_key: Secret<String>,
    consumer_secret: Secret<String>,
    margin: Duration,
    request_timeout: Option<Duration>,
    state: RwLock<Option<CachedToken>>,
    refreshes: AtomicU64,
}

impl TokenCache {
    pub fn new(
        http_client: reqwest::Client,
        token_url: impl Into<String>,
        consumer_key: Secret<String>,
        consumer_secret: Secret<String>,
    ) -> Self {
        Self {
            http_client,
            token_url: token_url.into(),
            consumer_key,
            consumer_secret,
            margin: TOKEN_SAFETY_MARGIN,
            request_timeout: None,
            state: RwLock::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Return a token with more than the safety margin of life left,
    /// refreshing first when necessary.
    ///
    /// Dropping the returned future aborts an in-flight refresh and releases
    /// the write lock; the next caller starts a fresh exchange.
    pub async fn token(&self) -> Result<String> {
        {
            let state = self.state.read().await;
            if let Some(cached) = state.as_ref()
                && cached.usable(self.margin)
            {
                return Ok(cached.value.expose().clone());
            }
        }

        let mut state = self.state.write().await;
        if let Some(cached) = state.as_ref()
            && cached.usable(self.margin)
        {
            debug!("token refreshed by a concurrent caller");
            return Ok(cached.value.expose().clone());
        }

        let granted = request_token(
            &self.http_client,
            &self.token_url,
            self.consumer_key.expose(),
            self.consumer_secret.expose(),
            self.request_timeout,
        )
        .await?;

        let expires_at = Instant::now() + granted.lifetime;
        let value = granted.access_token.clone();
        *state = Some(CachedToken {
            value: Secret::new(granted.access_token),
            expires_at,
        });
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ops_token_refreshes_total").increment(1);
        info!(
            lifetime_secs = granted.lifetime.as_secs(),
            "access token refreshed"
        );

        Ok(value)
    }

    /// Drop the cached token so the next `token()` call refreshes.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        if state.take().is_some() {
            debug!("cached access token invalidated");
        }
    }

    /// Seed the cache with a token obtained elsewhere (e.g. restored from disk).
    pub async fn prime(&self, token: impl Into<String>, expires_at: Instant) {
        *self.state.write().await = Some(CachedToken {
            value: Secret::new(token.into()),
            expires_at,
        });
    }

    /// Number of successful credential exchanges performed by this cache.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Override the safety margin (defaults to five minutes).
    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    /// Bound each credential exchange; without it a stalled endpoint blocks
    /// every caller queued on the write lock.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}
