use std::collections::HashSet;
use std::net::SocketAddr;

use eduhub_auth::AuthConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }

        if self.redis.enabled {
            if self.redis.url.is_empty() {
                return Err("redis.enabled=true requires redis.url".into());
            }
            if self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
            if self.redis.timeout_ms == 0 {
                return Err("redis.timeout_ms must be > 0".into());
            }
        }

        self.auth.validate().map_err(|e| format!("auth: {e}"))?;
        if self.auth.api_path == "/" || self.auth.api_path.ends_with('/') {
            return Err("auth.api_path must not be '/' or end with '/'".into());
        }
        self.bootstrap.validate()?;
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Origins allowed to call the API with credentials. Empty disables CORS.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Redis connection settings.
///
/// When disabled, revocations, rate-limit counters and the permission L2
/// tier live in process memory and are not shared between instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Use Redis as the shared store. Default: false (single instance).
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    16
}

fn default_redis_timeout_ms() -> u64 {
    2000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Accounts seeded into the in-memory directory at startup.
///
/// ```toml
/// [[bootstrap.accounts]]
/// username = "m.keller"
/// password = "change-me"
/// roles = ["teacher"]
/// permissions = ["course:read", "grade:write"]
///
/// [[bootstrap.accounts]]
/// username = "old.admin"
/// password = "change-me"
/// legacy = true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub accounts: Vec<BootstrapAccount>,
}

impl BootstrapConfig {
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.username.is_empty() {
                return Err("bootstrap.accounts: username cannot be empty".into());
            }
            if account.password.is_empty() {
                return Err(format!(
                    "bootstrap.accounts: password for '{}' cannot be empty",
                    account.username
                ));
            }
            if account.legacy && account.id.is_some() {
                return Err(format!(
                    "bootstrap.accounts: legacy account '{}' cannot carry an id",
                    account.username
                ));
            }
            if !seen.insert(account.username.as_str()) {
                return Err(format!(
                    "bootstrap.accounts: duplicate username '{}'",
                    account.username
                ));
            }
        }
        Ok(())
    }
}

/// A seeded account.
#[derive(Clone, Serialize, Deserialize)]
pub struct BootstrapAccount {
    pub username: String,
    /// Plain-text password, hashed at startup.
    /// Prefer setting it through the environment.
    pub password: String,
    /// Principal id for directory accounts. Generated when absent.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// The account exists only in the legacy store.
    #[serde(default)]
    pub legacy: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub credentials_expired: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl std::fmt::Debug for BootstrapAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAccount")
            .field("username", &self.username)
            .field("id", &self.id)
            .field("legacy", &self.legacy)
            .field("enabled", &self.enabled)
            .field("locked", &self.locked)
            .field("credentials_expired", &self.credentials_expired)
            .field("roles", &self.roles)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "eduhub.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        let mut builder = Config::builder();
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., EDUHUB__AUTH__RATE_LIMITING__LIMIT=5
        builder = builder.add_source(
            Environment::with_prefix("EDUHUB")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
