//! Session lifecycle facade.
//!
//! [`SessionService`] composes the components into the four session flows:
//!
//! - **login**: rate-limit gate, credential check, principal reconciliation,
//!   pair issuance, bucket reset
//! - **protected request**: access token validation plus revocation lookup
//! - **refresh**: single-use rotation of the refresh token
//! - **logout**: revocation of whatever tokens are presented
//!
//! The HTTP layer talks to this type only.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::identity::{CredentialValidator, IdentityReconciler, Principal};
use crate::permission::PermissionCache;
use crate::rate_limit::{ClientAddressResolver, RateLimitDecision, RateLimiter};
use crate::session::transport::SessionTransport;
use crate::storage::{
    AccountStore, Authorities, PermissionSource, PrincipalStore, RevocationStore, SharedStore,
    with_timeout,
};
use crate::token::{AccessTokenClaims, RefreshRotator, SessionClaims, TokenPair, TokenService};
use crate::{AuthError, AuthResult};

/// The identity and permission stores the session layer reads from.
#[derive(Clone)]
pub struct Collaborators {
    /// Account credentials and status flags (modern and legacy).
    pub accounts: Arc<dyn AccountStore>,
    /// The modern principal directory.
    pub principals: Arc<dyn PrincipalStore>,
    /// Role and permission assignments.
    pub permissions: Arc<dyn PermissionSource>,
}

/// A session that was just opened or rotated.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    /// Who the session belongs to.
    pub principal: Principal,
    /// The tokens to hand to the transport.
    pub tokens: TokenPair,
}

/// What `/auth/me` reports.
#[derive(Debug, Clone)]
pub struct SessionView {
    /// The principal behind the access token.
    pub principal: Principal,
    /// Current roles and permissions.
    pub authorities: Arc<Authorities>,
}

/// What a logout managed to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// Every presented token is revoked, or none was presented.
    Complete,
    /// The revocation store failed for at least one token.
    Unrecorded,
}

impl LogoutOutcome {
    fn and(self, other: Self) -> Self {
        if self == Self::Complete { other } else { self }
    }
}

/// Entry point for every session operation.
#[derive(Clone)]
pub struct SessionService {
    credentials: CredentialValidator,
    reconciler: IdentityReconciler,
    tokens: Arc<TokenService>,
    revocations: RevocationStore,
    rotator: RefreshRotator,
    limiter: RateLimiter,
    permissions: PermissionCache,
    transport: SessionTransport,
    addresses: ClientAddressResolver,
    store: Arc<dyn SharedStore>,
    store_timeout: std::time::Duration,
}

impl SessionService {
    /// Builds the service from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration is invalid or the signing
    /// keys cannot be loaded.
    pub fn new(
        config: &AuthConfig,
        collaborators: Collaborators,
        store: Arc<dyn SharedStore>,
    ) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;
        let tokens = Arc::new(TokenService::from_config(config)?);
        Self::with_tokens(config, collaborators, store, tokens)
    }

    /// Builds the service around an existing token service.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the cookie or proxy settings are invalid.
    pub fn with_tokens(
        config: &AuthConfig,
        collaborators: Collaborators,
        store: Arc<dyn SharedStore>,
        tokens: Arc<TokenService>,
    ) -> AuthResult<Self> {
        let timeout = config.store.timeout;
        let configuration = |e: crate::config::ConfigError| AuthError::configuration(e.to_string());

        let reconciler = IdentityReconciler::new(
            collaborators.principals,
            collaborators.accounts.clone(),
            timeout,
        );
        let revocations = RevocationStore::new(store.clone(), timeout);

        Ok(Self {
            credentials: CredentialValidator::new(collaborators.accounts, timeout),
            rotator: RefreshRotator::new(tokens.clone(), revocations.clone(), reconciler.clone()),
            reconciler,
            tokens,
            revocations,
            limiter: RateLimiter::new(store.clone(), &config.rate_limiting, timeout),
            permissions: PermissionCache::new(
                store.clone(),
                collaborators.permissions,
                config.permission_cache.ttl,
                timeout,
            ),
            transport: SessionTransport::new(&config.cookies, &config.api_path, &config.tokens)
                .map_err(configuration)?,
            addresses: ClientAddressResolver::new(config.trusted_proxies.as_slice())
                .map_err(configuration)?,
            store,
            store_timeout: timeout,
        })
    }

    /// Opens a session.
    ///
    /// Every attempt is charged to `client` before credentials are looked
    /// at; a successful login clears the bucket.
    ///
    /// # Errors
    ///
    /// `TooManyRequests`, any credential or account status error, or a
    /// server error.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        client: IpAddr,
    ) -> AuthResult<IssuedSession> {
        self.charge_attempt(client).await?;

        if let Err(err) = self.credentials.authenticate(username, password).await {
            if err.is_server_error() {
                warn!(client_address = %client, error = %err, "Login failed");
            } else {
                info!(client_address = %client, reason = err.error_code(), "Login failed");
            }
            return Err(err);
        }

        let principal = self.reconciler.reconcile(username).await?;
        let tokens = self.tokens.issue_pair(principal.id, username)?;

        if let Err(err) = self.limiter.reset(client).await {
            warn!(client_address = %client, error = %err, "Failed to reset rate limit bucket");
        }

        info!(
            principal_id = %principal.id,
            origin = ?principal.origin,
            client_address = %client,
            jti = %tokens.refresh_jti,
            "Login succeeded"
        );
        Ok(IssuedSession { principal, tokens })
    }

    /// Charges one login attempt to `client`.
    ///
    /// Called by `login` and by the HTTP layer for attempts whose body could
    /// not be read.
    ///
    /// # Errors
    ///
    /// `TooManyRequests` once the client's bucket is exhausted.
    pub async fn charge_attempt(&self, client: IpAddr) -> AuthResult<()> {
        let decision = self.limiter.allow(client).await;
        if let RateLimitDecision::Limited { .. } = decision {
            let retry_after = decision.retry_after_secs().unwrap_or(1);
            info!(client_address = %client, retry_after, "Login refused, rate limit exceeded");
            return Err(AuthError::too_many_requests(retry_after));
        }
        Ok(())
    }

    /// Validates an access token for a protected request.
    ///
    /// # Errors
    ///
    /// `InvalidToken` for a token that does not validate or whose revocation
    /// status cannot be determined, `TokenRevoked` after logout.
    pub async fn authenticate(&self, access_token: &str) -> AuthResult<AccessTokenClaims> {
        let claims = self.tokens.validate_access(access_token)?;

        match self.revocations.is_revoked(claims.jti).await {
            Ok(false) => Ok(claims),
            Ok(true) => Err(AuthError::TokenRevoked),
            Err(err) => {
                warn!(jti = %claims.jti, error = %err, "Revocation lookup failed, rejecting token");
                Err(AuthError::invalid_token("revocation status unavailable"))
            }
        }
    }

    /// Exchanges a refresh token for a new pair.
    ///
    /// # Errors
    ///
    /// See [`RefreshRotator::rotate`].
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<IssuedSession> {
        let rotation = self.rotator.rotate(refresh_token).await?;
        info!(
            principal_id = %rotation.principal.id,
            jti = %rotation.tokens.refresh_jti,
            "Session refreshed"
        );
        Ok(IssuedSession {
            principal: rotation.principal,
            tokens: rotation.tokens,
        })
    }

    /// Ends a session by revoking whatever tokens are presented.
    ///
    /// Lenient: missing, malformed or already expired tokens are skipped
    /// and revoking an already revoked token succeeds, so logging out twice
    /// succeeds twice. A revocation store failure is logged and reported as
    /// [`LogoutOutcome::Unrecorded`]; the caller still ends the session on
    /// its side.
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> LogoutOutcome {
        let access = access_token.and_then(|t| usable(self.tokens.validate_access(t)));
        let refresh = refresh_token.and_then(|t| usable(self.tokens.validate_refresh(t)));

        let mut outcome = LogoutOutcome::Complete;
        let mut principal_id = None;
        if let Some(claims) = &access {
            outcome = outcome.and(self.revoke(claims).await);
            principal_id = Some(claims.sub);
        }
        if let Some(claims) = &refresh {
            outcome = outcome.and(self.revoke(claims).await);
            principal_id = principal_id.or(Some(claims.sub));
        }

        match principal_id {
            Some(id) => {
                self.permissions.evict(id).await;
                info!(principal_id = %id, ?outcome, "Logged out");
            }
            None => debug!("Logout without a live token"),
        }
        outcome
    }

    async fn revoke<C: SessionClaims>(&self, claims: &C) -> LogoutOutcome {
        match self
            .revocations
            .add(claims.jti(), claims.expires_at())
            .await
        {
            Ok(revocation) => {
                debug!(jti = %claims.jti(), kind = %C::KIND, ?revocation, "Token revocation");
                LogoutOutcome::Complete
            }
            Err(err) => {
                error!(
                    jti = %claims.jti(),
                    kind = %C::KIND,
                    error = %err,
                    "Token revocation failed, token stays valid until it expires"
                );
                LogoutOutcome::Unrecorded
            }
        }
    }

    /// Describes the session behind validated access claims.
    ///
    /// Permissions come from the permission cache, never from the token.
    ///
    /// # Errors
    ///
    /// Returns a server error if the directory or permission source fails.
    pub async fn me(&self, claims: &AccessTokenClaims) -> AuthResult<SessionView> {
        let principal = self.reconciler.describe(claims.sub).await?;
        let authorities = self.permissions.get_or_resolve(claims.sub).await?;
        Ok(SessionView {
            principal,
            authorities,
        })
    }

    /// Clears the caller's cached permissions and roles.
    pub async fn clear_cache(&self, principal_id: Uuid) -> Vec<&'static str> {
        let cleared = self.permissions.clear(principal_id).await;
        info!(principal_id = %principal_id, "Permission cache cleared");
        cleared
    }

    /// Checks that the shared store is reachable.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails or times out.
    pub async fn ready(&self) -> AuthResult<()> {
        with_timeout(self.store_timeout, "store ping", self.store.ping()).await
    }

    /// Cookie transport.
    #[must_use]
    pub fn transport(&self) -> &SessionTransport {
        &self.transport
    }

    /// Client address resolver.
    #[must_use]
    pub fn addresses(&self) -> &ClientAddressResolver {
        &self.addresses
    }

    /// Permission cache, for wiring cross-instance invalidation.
    #[must_use]
    pub fn permissions(&self) -> &PermissionCache {
        &self.permissions
    }

    /// Token service.
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }
}

fn usable<T>(result: AuthResult<T>) -> Option<T> {
    match result {
        Ok(claims) => Some(claims),
        Err(err) => {
            debug!(error = %err, "Ignoring unusable token on logout");
            None
        }
    }
}
