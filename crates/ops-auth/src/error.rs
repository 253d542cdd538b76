//! Error types for credential exchange

/// Errors from the token endpoint interaction.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("token endpoint returned an empty access token")]
    EmptyToken,

    #[error("invalid expires_in {value:?}: {reason}")]
    InvalidExpiry { value: String, reason: String },

    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
