// ABOUTME: Configuration for the share-token authority
// ABOUTME: Signing secret and base URL loaded from environment variables at startup

use std::env;

use thiserror::Error;
use tracing::debug;

// Environment variable names
pub const SHARE_SECRET_ENV: &str = "SENDOFF_SHARE_SECRET";
pub const SHARE_BASE_URL_ENV: &str = "SENDOFF_SHARE_BASE_URL";

const DEFAULT_BASE_URL: &str = "https://app.sendoff.example";

/// A short HMAC key weakens every token signed with it, so refuse to start
/// below this bound. Share passwords have no such floor (per-token blast
/// radius; throttling lives at the gateway).
const MIN_SECRET_BYTES: usize = 32;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{SHARE_SECRET_ENV} is not set")]
    MissingSecret,

    #[error("Signing secret too short: {actual} bytes, need at least {required}")]
    WeakSecret { actual: usize, required: usize },
}

/// Startup configuration for a [`crate::ShareTokenManager`].
#[derive(Debug, Clone)]
pub struct ShareTokenConfig {
    pub signing_secret: String,
    pub base_url: String,
}

impl ShareTokenConfig {
    /// Build a config, enforcing the minimum secret length.
    pub fn new(
        signing_secret: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let signing_secret = signing_secret.into();
        if signing_secret.len() < MIN_SECRET_BYTES {
            return Err(ConfigError::WeakSecret {
                actual: signing_secret.len(),
                required: MIN_SECRET_BYTES,
            });
        }

        Ok(Self {
            signing_secret,
            base_url: base_url.into(),
        })
    }

    /// Read configuration from the environment.
    ///
    /// `SENDOFF_SHARE_SECRET` is required; `SENDOFF_SHARE_BASE_URL` falls
    /// back to the default share host.
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret = env::var(SHARE_SECRET_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret)?;

        let base_url = env::var(SHARE_BASE_URL_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        debug!("Loaded share-token configuration (base_url: {})", base_url);
        Self::new(secret, base_url)
    }
}
