//! Classified errors returned by every client operation

use std::time::Duration;

/// Low-level failure category for transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Connection refused or DNS failure before anything was sent
    Connect,
    /// Connection reset or closed while the request was in flight
    Reset,
    /// Per-request timeout elapsed
    Timeout,
    /// Response body ended early or could not be read completely
    Eof,
    Other,
}

impl TransportKind {
    pub fn label(&self) -> &'static str {
        match self {
            TransportKind::Connect => "connect",
            TransportKind::Reset => "reset",
            TransportKind::Timeout => "timeout",
            TransportKind::Eof => "eof",
            TransportKind::Other => "other",
        }
    }
}

/// Errors from OPS client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input rejected before any request was built.
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Bad credentials, or a 401 that persisted after one recovery.
    #[error("authentication failed: {message}")]
    Auth { status: Option<u16>, message: String },

    #[error("not found: {message}")]
    NotFound {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Fair-use quota or rate limit tripped; back off at the application level.
    #[error("quota exceeded: {message}")]
    QuotaExceeded {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("service unavailable ({status}): {message}")]
    ServiceUnavailable {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Any other structured upstream error, passed through intact.
    #[error("service error {code} ({status}): {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
        more_info: Option<String>,
    },

    /// Non-200 response whose body matched no known error shape.
    #[error("unexpected HTTP status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error ({}): {message}", .kind.label())]
    Transport { kind: TransportKind, message: String },

    #[error("invalid token response: {0}")]
    TokenParse(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("batch {index}/{total} failed: {source}")]
    Batch {
        index: usize,
        total: usize,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Config(#[from] common::Error),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// HTTP status behind this error, when it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Auth { status, .. } => *status,
            Error::NotFound { status, .. }
            | Error::QuotaExceeded { status, .. }
            | Error::ServiceUnavailable { status, .. }
            | Error::Service { status, .. }
            | Error::Http { status, .. } => Some(*status),
            Error::Batch { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "validation",
            Error::Auth { .. } => "auth",
            Error::NotFound { .. } => "not_found",
            Error::QuotaExceeded { .. } => "quota_exceeded",
            Error::ServiceUnavailable { .. } => "service_unavailable",
            Error::Service { .. } => "service",
            Error::Http { .. } => "http",
            Error::Transport { .. } => "transport",
            Error::TokenParse(_) => "token_parse",
            Error::Cancelled => "cancelled",
            Error::DeadlineExceeded => "deadline_exceeded",
            Error::Batch { .. } => "batch",
            Error::Config(_) => "config",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportKind::Timeout
        } else if e.is_connect() {
            TransportKind::Connect
        } else if e.is_body() || e.is_decode() {
            TransportKind::Eof
        } else if e.is_request() {
            TransportKind::Reset
        } else {
            TransportKind::Other
        };
        Error::Transport {
            kind,
            message: e.to_string(),
        }
    }
}

impl From<ops_auth::Error> for Error {
    fn from(e: ops_auth::Error) -> Self {
        match e {
            ops_auth::Error::Transport(inner) => inner.into(),
            ops_auth::Error::Rejected { status, body } => Error::Auth {
                status: Some(status),
                message: format!("token endpoint returned {status}: {body}"),
            },
            ops_auth::Error::EmptyToken => Error::Auth {
                status: None,
                message: "token endpoint returned an empty access token".into(),
            },
            other @ (ops_auth::Error::InvalidExpiry { .. }
            | ops_auth::Error::InvalidResponse(_)) => Error::TokenParse(other.to_string()),
        }
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
