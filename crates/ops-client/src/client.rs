//! Endpoint layer
//!
//! Thin wrappers that validate input, build URLs and bodies, and hand the
//! request to `RequestExecutor`. Responses are returned raw; documents are
//! never parsed here.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use ops_auth::TokenCache;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::batch::{BulkOptions, MAX_BATCH_SIZE, ensure_within_cap, execute_bulk, join_identifiers};
use crate::config::ClientConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::executor::RequestExecutor;
use crate::quota::{QuotaSnapshot, QuotaTracker};

const USER_AGENT: &str = concat!("ops-client/", env!("CARGO_PKG_VERSION"));

/// Which number a published-data lookup is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceType {
    #[default]
    Publication,
    Application,
    Priority,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Publication => "publication",
            ReferenceType::Application => "application",
            ReferenceType::Priority => "priority",
        }
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OPS client. Each instance owns its token cache and quota tracker.
pub struct Client {
    executor: RequestExecutor,
    base_url: String,
}

impl Client {
    /// Validate `config` and build a client. No network traffic happens here.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let (key, secret) = config.credentials()?;

        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        let tokens = Arc::new(
            TokenCache::new(
                http.clone(),
                config.auth_url.clone(),
                key.clone(),
                secret.clone(),
            )
            .with_request_timeout(config.timeout()),
        );
        let executor = RequestExecutor::new(
            http,
            tokens,
            Arc::new(QuotaTracker::new()),
            config.retry_policy(),
            config.timeout(),
        );

        Ok(Self {
            executor,
            base_url: config.base().to_string(),
        })
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    /// Latest fair-use snapshot seen by this client.
    pub fn quota(&self) -> Option<QuotaSnapshot> {
        self.executor.quota().get()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Bibliographic data for one number in epodoc format.
    pub async fn biblio(&self, ctx: &Context, reference: ReferenceType, number: &str) -> Result<String> {
        let number = validate_number(number)?;
        let url = self.url(&format!("/published-data/{reference}/epodoc/{number}/biblio"));
        self.executor.execute_text(ctx, move |http| http.get(&url)).await
    }

    /// Bibliographic data for many numbers, one response document per batch.
    ///
    /// Every number is validated before the first request. Batches are sent
    /// as newline-separated POST bodies.
    pub async fn biblio_bulk<S: AsRef<str>>(
        &self,
        ctx: &Context,
        reference: ReferenceType,
        numbers: &[S],
        options: &BulkOptions,
    ) -> Result<Vec<String>> {
        let numbers = numbers
            .iter()
            .map(|n| validate_number(n.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let url = self.url(&format!("/published-data/{reference}/epodoc/biblio"));

        execute_bulk(ctx, &numbers, MAX_BATCH_SIZE, options, |batch| {
            let url = url.clone();
            async move {
                ensure_within_cap(batch.len())?;
                let body = join_identifiers(batch);
                debug!(count = batch.len(), "posting bulk biblio batch");
                self.executor
                    .execute_text(ctx, move |http| {
                        http.post(&url)
                            .header(CONTENT_TYPE, "text/plain")
                            .body(body.clone())
                    })
                    .await
            }
        })
        .await
    }

    /// INPADOC family of one number in epodoc format.
    pub async fn family(&self, ctx: &Context, reference: ReferenceType, number: &str) -> Result<String> {
        let number = validate_number(number)?;
        let url = self.url(&format!("/family/{reference}/epodoc/{number}"));
        self.executor.execute_text(ctx, move |http| http.get(&url)).await
    }

    /// One page of a document image. `link` is the image path as returned in
    /// an inquiry response, e.g. `EP/1000000/A1/fullimage`.
    pub async fn image(&self, ctx: &Context, link: &str, page: u32) -> Result<Bytes> {
        let link = validate_image_link(link)?;
        if page == 0 {
            return Err(Error::validation("page", "pages are numbered from 1"));
        }
        let url = self.url(&format!("/published-data/images/{link}?Range={page}"));
        self.executor.execute(ctx, move |http| http.get(&url)).await
    }
}

/// Normalize and check a patent number such as `EP1000000` or
/// `EP.1000000.A1`: two-letter country code, then digits, letters, dots or
/// dashes.
pub fn validate_number(number: &str) -> Result<String> {
    let number = number.trim().to_ascii_uppercase();
    if number.is_empty() {
        return Err(Error::validation("number", "must not be empty"));
    }
    let mut chars = number.chars();
    let country_ok = chars.by_ref().take(2).filter(char::is_ascii_alphabetic).count() == 2;
    if !country_ok {
        return Err(Error::validation(
            "number",
            format!("{number:?} must start with a two-letter country code"),
        ));
    }
    let rest: Vec<char> = chars.collect();
    if !rest.iter().any(char::is_ascii_digit) {
        return Err(Error::validation(
            "number",
            format!("{number:?} has no serial number"),
        ));
    }
    if let Some(bad) = rest
        .iter()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(**c, '.' | '-')))
    {
        return Err(Error::validation(
            "number",
            format!("{number:?} contains invalid character {bad:?}"),
        ));
    }
    Ok(number)
}

fn validate_image_link(link: &str) -> Result<&str> {
    let link = link.trim().trim_matches('/');
    if link.is_empty() {
        return Err(Error::validation("link", "must not be empty"));
    }
    if link
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(Error::validation("link", format!("{link:?} is not a valid image path")));
    }
    if !link
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '-' | '_'))
    {
        return Err(Error::validation("link", format!("{link:?} contains invalid characters")));
    }
    Ok(link)
}
