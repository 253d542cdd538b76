//! Client configuration and loading
//!
//! Precedence: CLI args > env vars > config file > defaults.
//! Consumer credentials come from `OPS_CONSUMER_KEY` / `OPS_CONSUMER_SECRET`
//! or from `consumer_key_file` / `consumer_secret_file`, never from the TOML
//! itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Deserializer};

use crate::retry::RetryPolicy;

pub const CONSUMER_KEY_ENV: &str = "OPS_CONSUMER_KEY";
pub const CONSUMER_SECRET_ENV: &str = "OPS_CONSUMER_SECRET";
pub const CONFIG_PATH_ENV: &str = "OPS_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "ops-fetch.toml";

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    client: ClientConfig,
}

/// Connection, retry and credential settings for one `Client`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Per-request timeout; whole seconds in TOML (`timeout_secs`)
    #[serde(
        rename = "timeout_secs",
        default = "default_timeout",
        deserialize_with = "duration_from_secs"
    )]
    pub timeout: Duration,
    #[serde(skip)]
    pub consumer_key: Option<Secret<String>>,
    #[serde(skip)]
    pub consumer_secret: Option<Secret<String>>,
    /// Alternative to `OPS_CONSUMER_KEY`
    #[serde(default)]
    pub consumer_key_file: Option<PathBuf>,
    /// Alternative to `OPS_CONSUMER_SECRET`
    #[serde(default)]
    pub consumer_secret_file: Option<PathBuf>,
}

fn default_base_url() -> String {
    ops_auth::REST_BASE_URL.to_string()
}

fn default_auth_url() -> String {
    ops_auth::TOKEN_ENDPOINT.to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn duration_from_secs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_url: default_auth_url(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            timeout: default_timeout(),
            consumer_key: None,
            consumer_secret: None,
            consumer_key_file: None,
            consumer_secret_file: None,
        }
    }
}

impl ClientConfig {
    /// Programmatic configuration with production endpoints and defaults.
    pub fn new(consumer_key: impl Into<String>, consumer_secret: impl Into<String>) -> Self {
        Self {
            consumer_key: Some(Secret::new(consumer_key.into())),
            consumer_secret: Some(Secret::new(consumer_secret.into())),
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_auth_url(mut self, auth_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay_ms = delay.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Load the `[client]` table from a TOML file, then resolve credentials.
    ///
    /// Credential resolution order, per value:
    /// 1. `OPS_CONSUMER_KEY` / `OPS_CONSUMER_SECRET` env var
    /// 2. `consumer_key_file` / `consumer_secret_file` path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&contents)?;
        let mut config = file.client;

        config.consumer_key =
            common::secret_from_env_or_file(CONSUMER_KEY_ENV, config.consumer_key_file.as_deref())?;
        config.consumer_secret = common::secret_from_env_or_file(
            CONSUMER_SECRET_ENV,
            config.consumer_secret_file.as_deref(),
        )?;

        config.validate()?;
        Ok(config)
    }

    /// Resolve config file path from CLI arg or `OPS_CONFIG`.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Some(p) = common::non_empty_env(CONFIG_PATH_ENV) {
            return PathBuf::from(p);
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    pub fn validate(&self) -> common::Result<()> {
        for (field, url) in [("base_url", &self.base_url), ("auth_url", &self.auth_url)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(common::Error::Config(format!(
                    "{field} must start with http:// or https://, got: {url}"
                )));
            }
        }

        if self.timeout.is_zero() {
            return Err(common::Error::Config(
                "timeout must be greater than 0".into(),
            ));
        }

        self.credentials().map(|_| ())
    }

    /// Both consumer credentials, or which one is missing.
    pub fn credentials(&self) -> common::Result<(&Secret<String>, &Secret<String>)> {
        let key = self
            .consumer_key
            .as_ref()
            .filter(|s| !s.is_blank())
            .ok_or(common::Error::MissingCredential(CONSUMER_KEY_ENV))?;
        let secret = self
            .consumer_secret
            .as_ref()
            .filter(|s| !s.is_blank())
            .ok_or(common::Error::MissingCredential(CONSUMER_SECRET_ENV))?;
        Ok((key, secret))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Base URL without a trailing slash, ready for path joining.
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}
