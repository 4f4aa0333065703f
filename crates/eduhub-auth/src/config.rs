//! Session and token configuration.
//!
//! All durations are written in humantime notation (`"15m"`, `"7d"`). Every
//! section carries defaults so an empty `[auth]` table yields a working
//! single-instance setup.

use std::path::PathBuf;
use std::time::Duration;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::token::jwt::SigningAlgorithm;

/// Root session configuration.
///
/// # Example (TOML)
///
/// ```toml
/// [auth]
/// issuer = "https://eduhub.example.org"
/// trusted_proxies = ["10.20.0.0/16", "203.0.113.7"]
///
/// [auth.tokens]
/// access_token_lifetime = "15m"
/// refresh_token_lifetime = "7d"
///
/// [auth.cookies]
/// secure = true
/// same_site = "Strict"
///
/// [auth.rate_limiting]
/// window = "60s"
/// limit = 10
/// burst = 0
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Value of the `iss` claim; decoded tokens must carry the same issuer.
    pub issuer: String,

    /// Path the auth routes are mounted under. Cookies are scoped to it.
    pub api_path: String,

    /// Token lifetimes.
    pub tokens: TokenConfig,

    /// Token signing configuration.
    pub signing: SigningConfig,

    /// Session cookie attributes.
    pub cookies: CookieConfig,

    /// Login rate limiting.
    pub rate_limiting: RateLimitingConfig,

    /// Additional proxy addresses or CIDR ranges allowed to supply
    /// forwarded client addresses. Private and loopback ranges are always trusted.
    pub trusted_proxies: Vec<String>,

    /// Permission cache settings.
    pub permission_cache: PermissionCacheConfig,

    /// Shared store call settings.
    pub store: StoreConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "eduhub".to_string(),
            api_path: "/api".to_string(),
            tokens: TokenConfig::default(),
            signing: SigningConfig::default(),
            cookies: CookieConfig::default(),
            rate_limiting: RateLimitingConfig::default(),
            trusted_proxies: Vec::new(),
            permission_cache: PermissionCacheConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

/// Token lifetime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_lifetime: Duration::from_secs(15 * 60),
            refresh_token_lifetime: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Token signing configuration.
///
/// When both PEM paths are set every instance loads the same key pair. When
/// neither is set a key pair is generated at startup, which only works for a
/// single instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Signing algorithm.
    /// Supported: "RS256", "RS384", "ES384"
    pub algorithm: String,

    /// Key id placed in the JWT header.
    pub kid: Option<String>,

    /// PEM-encoded private key (PKCS#8 for RSA, SEC1 for EC).
    pub private_key_path: Option<PathBuf>,

    /// PEM-encoded public key.
    pub public_key_path: Option<PathBuf>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "ES384".to_string(),
            kid: None,
            private_key_path: None,
            public_key_path: None,
        }
    }
}

impl SigningConfig {
    /// Parses the configured algorithm name.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for anything but RS256, RS384 or ES384.
    pub fn algorithm(&self) -> Result<SigningAlgorithm, ConfigError> {
        match self.algorithm.as_str() {
            "RS256" => Ok(SigningAlgorithm::RS256),
            "RS384" => Ok(SigningAlgorithm::RS384),
            "ES384" => Ok(SigningAlgorithm::ES384),
            other => Err(ConfigError::InvalidValue(format!(
                "Invalid signing algorithm: '{}'. Must be RS256, RS384, or ES384",
                other
            ))),
        }
    }
}

/// Session cookie configuration. `HttpOnly` is always set and not configurable.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Set the `Secure` attribute. Disable only for plain-HTTP development.
    pub secure: bool,

    /// `SameSite` policy: "Strict", "Lax" or "None".
    pub same_site: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: true,
            same_site: "Strict".to_string(),
        }
    }
}

/// Login rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Length of the fixed counting window.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Attempts allowed per client address per window.
    pub limit: u32,

    /// Extra attempts tolerated on top of `limit`.
    pub burst: u32,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            limit: 10,
            burst: 0,
        }
    }
}

/// Permission cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PermissionCacheConfig {
    /// How long a resolved permission set stays cached in either tier.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for PermissionCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(15 * 60),
        }
    }
}

/// Shared store call configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Upper bound for a single shared store or collaborator call.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(250),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The issuer is empty or the API path does not start with `/`
    /// - A token lifetime, the rate-limit window or the store timeout is zero
    /// - The rate limit is zero
    /// - The signing algorithm is not supported
    /// - The SameSite policy is unknown, or `None` without `Secure`
    /// - A trusted proxy entry is neither an address nor a CIDR range
    ///
    /// Returns `ConfigError::Missing` if only one of the two PEM paths is set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::InvalidValue(
                "issuer cannot be empty".to_string(),
            ));
        }

        if !self.api_path.starts_with('/') {
            return Err(ConfigError::InvalidValue(format!(
                "api_path must start with '/': '{}'",
                self.api_path
            )));
        }

        if self.tokens.access_token_lifetime.is_zero()
            || self.tokens.refresh_token_lifetime.is_zero()
        {
            return Err(ConfigError::InvalidValue(
                "token lifetimes must be > 0".to_string(),
            ));
        }

        if self.tokens.refresh_token_lifetime < self.tokens.access_token_lifetime {
            return Err(ConfigError::InvalidValue(
                "refresh_token_lifetime must not be shorter than access_token_lifetime"
                    .to_string(),
            ));
        }

        self.signing.algorithm()?;

        match (
            &self.signing.private_key_path,
            &self.signing.public_key_path,
        ) {
            (Some(_), None) => {
                return Err(ConfigError::Missing("signing.public_key_path".to_string()));
            }
            (None, Some(_)) => {
                return Err(ConfigError::Missing(
                    "signing.private_key_path".to_string(),
                ));
            }
            _ => {}
        }

        match self.cookies.same_site.to_ascii_lowercase().as_str() {
            "strict" | "lax" => {}
            "none" => {
                if !self.cookies.secure {
                    return Err(ConfigError::InvalidValue(
                        "cookies.same_site = \"None\" requires cookies.secure = true".to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid SameSite policy: '{}'. Must be Strict, Lax, or None",
                    other
                )));
            }
        }

        if self.rate_limiting.window.is_zero() {
            return Err(ConfigError::InvalidValue(
                "rate_limiting.window must be > 0".to_string(),
            ));
        }

        if self.rate_limiting.limit == 0 {
            return Err(ConfigError::InvalidValue(
                "rate_limiting.limit must be > 0".to_string(),
            ));
        }

        for entry in &self.trusted_proxies {
            if entry.parse::<IpNetwork>().is_err() {
                return Err(ConfigError::InvalidValue(format!(
                    "Invalid trusted proxy: '{}'",
                    entry
                )));
            }
        }

        if self.permission_cache.ttl.is_zero() {
            return Err(ConfigError::InvalidValue(
                "permission_cache.ttl must be > 0".to_string(),
            ));
        }

        if self.store.timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "store.timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
