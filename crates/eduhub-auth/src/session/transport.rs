//! Session token transport over cookies, with a Bearer header fallback.

use axum::http::{HeaderMap, header};
use axum_extra::extract::CookieJar;
use cookie::{Cookie, SameSite};
use time::Duration;

use crate::config::{ConfigError, CookieConfig, TokenConfig};
use crate::token::TokenPair;

/// Cookie carrying the access token.
pub const ACCESS_COOKIE: &str = "accessToken";

/// Cookie carrying the refresh token.
pub const REFRESH_COOKIE: &str = "refreshToken";

/// Writes and reads the session cookies.
#[derive(Debug, Clone)]
pub struct SessionTransport {
    secure: bool,
    same_site: SameSite,
    path: String,
    access_max_age: Duration,
    refresh_max_age: Duration,
}

impl SessionTransport {
    /// Creates the transport for cookies scoped to `api_path`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an unknown `same_site` value.
    pub fn new(
        cookies: &CookieConfig,
        api_path: &str,
        tokens: &TokenConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            secure: cookies.secure,
            same_site: parse_same_site(&cookies.same_site)?,
            path: api_path.to_string(),
            access_max_age: seconds(tokens.access_token_lifetime),
            refresh_max_age: seconds(tokens.refresh_token_lifetime),
        })
    }

    fn cookie(&self, name: &'static str, value: String, max_age: Duration) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.secure)
            .same_site(self.same_site)
            .path(self.path.clone())
            .max_age(max_age)
            .build()
    }

    /// Adds both session cookies for `pair`.
    #[must_use]
    pub fn set(&self, jar: CookieJar, pair: &TokenPair) -> CookieJar {
        jar.add(self.cookie(
            ACCESS_COOKIE,
            pair.access_token.clone(),
            self.access_max_age,
        ))
        .add(self.cookie(
            REFRESH_COOKIE,
            pair.refresh_token.clone(),
            self.refresh_max_age,
        ))
    }

    /// Overwrites both session cookies with empty, immediately expiring ones.
    #[must_use]
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.cookie(ACCESS_COOKIE, String::new(), Duration::ZERO))
            .add(self.cookie(REFRESH_COOKIE, String::new(), Duration::ZERO))
    }

    /// The presented access token: the cookie if set, else an
    /// `Authorization: Bearer` header.
    #[must_use]
    pub fn access_token(&self, jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
        cookie_value(jar, ACCESS_COOKIE).or_else(|| bearer_token(headers))
    }

    /// The presented refresh token: the cookie if set, else the token sent
    /// in the request body.
    #[must_use]
    pub fn refresh_token(&self, jar: &CookieJar, body_token: Option<&str>) -> Option<String> {
        cookie_value(jar, REFRESH_COOKIE).or_else(|| {
            body_token
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
        })
    }
}

fn cookie_value(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().trim().to_string())
        .filter(|v| !v.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn parse_same_site(value: &str) -> Result<SameSite, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Ok(SameSite::Strict),
        "lax" => Ok(SameSite::Lax),
        "none" => Ok(SameSite::None),
        other => Err(ConfigError::InvalidValue(format!(
            "cookies.same_site must be Strict, Lax or None, got '{}'",
            other
        ))),
    }
}

fn seconds(duration: std::time::Duration) -> Duration {
    Duration::seconds(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
}
