//! Client-credentials token exchange
//!
//! POSTs `grant_type=client_credentials` to the token endpoint with an HTTP
//! Basic header built from the consumer key and secret. The endpoint answers
//! with a JSON body whose `expires_in` is a *string* holding the lifetime in
//! seconds, e.g. `"1199"`.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::constants::GRANT_TYPE;
use crate::error::{Error, Result};

/// Raw token endpoint response.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    /// Seconds until the access token expires, string-encoded
    #[serde(default)]
    pub expires_in: String,
    #[serde(default)]
    pub token_type: String,
}

impl TokenResponse {
    /// Parse `expires_in` into a lifetime.
    pub fn lifetime(&self) -> Result<Duration> {
        self.expires_in
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| Error::InvalidExpiry {
                value: self.expires_in.clone(),
                reason: e.to_string(),
            })
    }
}

/// A validated token with its lifetime as granted by the endpoint.
#[derive(Debug)]
pub struct GrantedToken {
    pub access_token: String,
    pub lifetime: Duration,
}

/// Build the `Basic base64(key:secret)` header value.
pub fn basic_auth_header(consumer_key: &str, consumer_secret: &str) -> String {
    let encoded = STANDARD.encode(format!("{consumer_key}:{consumer_secret}"));
    format!("Basic {encoded}")
}

/// Exchange consumer credentials for a bearer token.
///
/// A non-200 answer becomes `Error::Rejected` with the status and raw body.
/// A 200 answer without an access token becomes `Error::EmptyToken`, and an
/// unparseable `expires_in` becomes `Error::InvalidExpiry`. No retries here.
///
/// `timeout` bounds the whole exchange, body included; a stalled endpoint
/// surfaces as `Error::Transport` with a timeout source.
pub async fn request_token(
    client: &reqwest::Client,
    token_url: &str,
    consumer_key: &str,
    consumer_secret: &str,
    timeout: Option<Duration>,
) -> Result<GrantedToken> {
    let mut request = client
        .post(token_url)
        .header(
            AUTHORIZATION,
            basic_auth_header(consumer_key, consumer_secret),
        )
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .form(&[("grant_type", GRANT_TYPE)]);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }
    let response = request.send().await?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes().await?;
    let parsed: TokenResponse = serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidResponse(e.to_string()))?;

    if parsed.access_token.trim().is_empty() {
        return Err(Error::EmptyToken);
    }
    let lifetime = parsed.lifetime()?;

    Ok(GrantedToken {
        access_token: parsed.access_token,
        lifetime,
    })
}
