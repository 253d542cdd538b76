//! Client core for the EPO Open Patent Services REST API
//!
//! Every endpoint call funnels through `RequestExecutor::execute`, which owns
//! authentication, retries, single-shot 401 recovery, error classification
//! and quota tracking. Bulk helpers in `batch` split identifier lists into
//! capped chunks and drive the executor sequentially.
//!
//! Request flow:
//! 1. Caller builds a `Context` (cancellation + optional deadline)
//! 2. `Client` validates input and builds the URL/body (no network yet)
//! 3. `RequestExecutor` fetches a token from `ops_auth::TokenCache`
//! 4. Attempts are retried per `RetryPolicy`; a stale-token 401 is recovered once
//! 5. `QuotaTracker` records the fair-use headers of every response
//! 6. Non-200 bodies are classified into `Error` variants by `classify`

pub mod accept;
pub mod batch;
pub mod classify;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod quota;
pub mod retry;

#[cfg(test)]
mod test_support;

pub use accept::Accept;
pub use batch::{BulkOptions, MAX_BATCH_SIZE, execute_bulk, split_into_batches};
pub use client::{Client, ReferenceType};
pub use config::ClientConfig;
pub use context::Context;
pub use error::{Error, Result, TransportKind};
pub use executor::RequestExecutor;
pub use quota::{QuotaSnapshot, QuotaTracker, QuotaUsage, ServiceThrottle, TrafficLight};
pub use retry::RetryPolicy;
