//! Access/refresh pair issuance and validation.

use std::time::Duration;

use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::jwt::{
    AccessTokenClaims, JwtService, RefreshTokenClaims, SigningAlgorithm, SigningKeyPair, TokenKind,
};
use crate::config::{AuthConfig, TokenConfig};
use crate::{AuthError, AuthResult};

/// A freshly minted access/refresh pair.
///
/// Only the transport layer ever sees the raw token strings; response bodies
/// carry the expiry times.
#[derive(Clone)]
pub struct TokenPair {
    /// Signed access token.
    pub access_token: String,
    /// Signed refresh token.
    pub refresh_token: String,
    /// Access token expiry.
    pub access_expires_at: OffsetDateTime,
    /// Refresh token expiry.
    pub refresh_expires_at: OffsetDateTime,
    /// Access token id.
    pub access_jti: Uuid,
    /// Refresh token id.
    pub refresh_jti: Uuid,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_jti", &self.access_jti)
            .field("refresh_jti", &self.refresh_jti)
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish_non_exhaustive()
    }
}

/// Issues and validates session tokens with the configured lifetimes.
#[derive(Debug)]
pub struct TokenService {
    jwt: JwtService,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    /// Creates a token service around an existing JWT service.
    #[must_use]
    pub fn new(jwt: JwtService, tokens: &TokenConfig) -> Self {
        Self {
            jwt,
            access_ttl: tokens.access_token_lifetime,
            refresh_ttl: tokens.refresh_token_lifetime,
        }
    }

    /// Builds the token service from configuration.
    ///
    /// Loads the signing key pair from the configured PEM files. Without
    /// them a key pair is generated, which only works for a single instance:
    /// tokens signed here cannot be verified anywhere else and do not survive
    /// a restart.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the algorithm is unsupported or the PEM
    /// files cannot be read or parsed.
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        let algorithm = config
            .signing
            .algorithm()
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        let key_pair = match (
            &config.signing.private_key_path,
            &config.signing.public_key_path,
        ) {
            (Some(private_path), Some(public_path)) => {
                let private_pem = std::fs::read_to_string(private_path).map_err(|e| {
                    AuthError::configuration(format!(
                        "cannot read signing key {}: {}",
                        private_path.display(),
                        e
                    ))
                })?;
                let public_pem = std::fs::read_to_string(public_path).map_err(|e| {
                    AuthError::configuration(format!(
                        "cannot read verification key {}: {}",
                        public_path.display(),
                        e
                    ))
                })?;
                let kid = config
                    .signing
                    .kid
                    .clone()
                    .unwrap_or_else(|| format!("{}-1", algorithm.as_str().to_lowercase()));

                let key_pair = SigningKeyPair::from_pem(kid, algorithm, &private_pem, &public_pem)
                    .map_err(|e| AuthError::configuration(e.to_string()))?;
                info!(kid = %key_pair.kid, algorithm = %algorithm, "Loaded signing key pair");
                key_pair
            }
            _ => {
                warn!(
                    algorithm = %algorithm,
                    "No signing keys configured, generating an ephemeral key pair. \
                     Tokens will not validate on other instances or after a restart."
                );
                generate_key_pair(algorithm)?
            }
        };

        Ok(Self::new(
            JwtService::new(key_pair, config.issuer.clone()),
            &config.tokens,
        ))
    }

    /// Mints a new pair for `principal_id`, each token with a fresh random id.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if signing fails.
    pub fn issue_pair(&self, principal_id: Uuid, username: &str) -> AuthResult<TokenPair> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let access_exp = now + lifetime_secs(self.access_ttl);
        let refresh_exp = now + lifetime_secs(self.refresh_ttl);

        let access = AccessTokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: principal_id,
            iat: now,
            exp: access_exp,
            jti: Uuid::new_v4(),
            kind: TokenKind::Access,
        };
        let refresh = RefreshTokenClaims {
            iss: self.jwt.issuer().to_string(),
            sub: principal_id,
            iat: now,
            exp: refresh_exp,
            jti: Uuid::new_v4(),
            kind: TokenKind::Refresh,
            username: username.to_string(),
        };

        Ok(TokenPair {
            access_token: self.jwt.encode(&access)?,
            refresh_token: self.jwt.encode(&refresh)?,
            access_expires_at: timestamp(access_exp)?,
            refresh_expires_at: timestamp(refresh_exp)?,
            access_jti: access.jti,
            refresh_jti: refresh.jti,
        })
    }

    /// Validates an access token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` on any signature, expiry, issuer, claim or type failure.
    pub fn validate_access(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        Ok(self.jwt.decode(token)?)
    }

    /// Validates a refresh token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidToken` on any signature, expiry, issuer, claim or type failure.
    pub fn validate_refresh(&self, token: &str) -> AuthResult<RefreshTokenClaims> {
        Ok(self.jwt.decode(token)?)
    }

    /// Access token lifetime.
    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Refresh token lifetime.
    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// The underlying JWT service.
    #[must_use]
    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }
}

fn generate_key_pair(algorithm: SigningAlgorithm) -> AuthResult<SigningKeyPair> {
    let generated = if algorithm.is_rsa() {
        SigningKeyPair::generate_rsa(algorithm)
    } else {
        SigningKeyPair::generate_ec()
    };
    generated.map_err(|e| AuthError::internal(e.to_string()))
}

fn lifetime_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2)
}

fn timestamp(unix: i64) -> AuthResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(unix)
        .map_err(|e| AuthError::internal(format!("token expiry out of range: {}", e)))
}
