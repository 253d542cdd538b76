//! OPS endpoint and token lifecycle constants

use std::time::Duration;

/// Token endpoint for the client-credentials exchange
pub const TOKEN_ENDPOINT: &str = "https://ops.epo.org/3.2/auth/accesstoken";

/// Root of the protected REST services
pub const REST_BASE_URL: &str = "https://ops.epo.org/3.2/rest-services";

/// OAuth grant type used by the credential exchange
pub const GRANT_TYPE: &str = "client_credentials";

/// Minimum remaining lifetime a token must have when handed out.
pub const TOKEN_SAFETY_MARGIN: Duration = Duration::from_secs(5 * 60);
