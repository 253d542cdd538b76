//! OPS authentication library
//!
//! Exchanges a consumer key/secret pair for short-lived bearer tokens using
//! the OAuth `client_credentials` grant, and caches the current token so that
//! concurrent requests share it until it nears expiry.
//!
//! Token lifecycle:
//! 1. First `TokenCache::token()` call finds no token and runs `token::request_token()`
//! 2. Later calls reuse the cached token while it has more than the safety margin left
//! 3. A token inside the margin is replaced before being handed out
//! 4. A 401 from the protected API leads the caller to `TokenCache::invalidate()`

pub mod cache;
pub mod constants;
pub mod error;
pub mod token;

pub use cache::TokenCache;
pub use constants::*;
pub use error::{Error, Result};
pub use token::{GrantedToken, TokenResponse, basic_auth_header, request_token};
