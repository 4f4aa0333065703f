//! Refresh token rotation.
//!
//! A refresh token is single use. Presenting it walks a fixed sequence of
//! states; any failed step moves to [`RotationState::Rejected`] and nothing
//! is written:
//!
//! ```text
//! Presented -> SignatureChecked -> RevocationChecked -> AccountVerified -> Rotated
//!     \________________\___________________\__________________\-> Rejected
//! ```
//!
//! The old token id is claimed with a single atomic insert-if-absent as the
//! last step. The new pair is signed before the claim but is only handed out
//! by the request that wins it, so of any number of concurrent requests
//! presenting the same token exactly one succeeds.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use super::jwt::SessionClaims;
use super::service::{TokenPair, TokenService};
use crate::identity::{IdentityReconciler, Principal};
use crate::storage::RevocationStore;
use crate::{AuthError, AuthResult};

/// States a presented refresh token moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    /// Token received, nothing checked yet.
    Presented,
    /// Signature, expiry, issuer and `type` are valid.
    SignatureChecked,
    /// The token id is not revoked.
    RevocationChecked,
    /// The account may still hold a session.
    AccountVerified,
    /// Old id claimed, new pair issued. Terminal.
    Rotated,
    /// Some step failed. Terminal.
    Rejected,
}

impl RotationState {
    /// Returns `true` for `Rotated` and `Rejected`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rotated | Self::Rejected)
    }
}

impl fmt::Display for RotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Presented => "presented",
            Self::SignatureChecked => "signature_checked",
            Self::RevocationChecked => "revocation_checked",
            Self::AccountVerified => "account_verified",
            Self::Rotated => "rotated",
            Self::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Result of a successful rotation.
#[derive(Debug, Clone)]
pub struct Rotation {
    /// The principal the new pair belongs to.
    pub principal: Principal,
    /// The new pair.
    pub tokens: TokenPair,
}

/// Tracks the current state and logs every transition.
struct Progress {
    state: RotationState,
    jti: Option<Uuid>,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: RotationState::Presented,
            jti: None,
        }
    }

    fn advance(&mut self, next: RotationState) {
        debug!(
            jti = ?self.jti,
            from = %self.state,
            state = %next,
            "refresh rotation transition"
        );
        self.state = next;
    }
}

/// Exchanges a refresh token for a new pair, exactly once.
#[derive(Clone)]
pub struct RefreshRotator {
    tokens: Arc<TokenService>,
    revocations: RevocationStore,
    reconciler: IdentityReconciler,
}

impl RefreshRotator {
    /// Creates a rotator.
    pub fn new(
        tokens: Arc<TokenService>,
        revocations: RevocationStore,
        reconciler: IdentityReconciler,
    ) -> Self {
        Self {
            tokens,
            revocations,
            reconciler,
        }
    }

    /// Rotates `refresh_token`.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` if the token does not validate, the account is no
    ///   longer eligible, or a store needed for the decision is unavailable
    /// - `TokenRevoked` if the token was already used or logged out,
    ///   including losing a race against a concurrent rotation
    /// - `Internal` if signing the new pair fails
    pub async fn rotate(&self, refresh_token: &str) -> AuthResult<Rotation> {
        let mut progress = Progress::new();

        match self.run(refresh_token, &mut progress).await {
            Ok(rotation) => {
                progress.advance(RotationState::Rotated);
                Ok(rotation)
            }
            Err(err) => {
                progress.advance(RotationState::Rejected);
                debug!(jti = ?progress.jti, error = %err, "refresh rejected");
                Err(err)
            }
        }
    }

    async fn run(&self, refresh_token: &str, progress: &mut Progress) -> AuthResult<Rotation> {
        let claims = self.tokens.validate_refresh(refresh_token)?;
        progress.jti = Some(claims.jti);
        progress.advance(RotationState::SignatureChecked);

        match self.revocations.is_revoked(claims.jti).await {
            Ok(false) => {}
            Ok(true) => return Err(AuthError::TokenRevoked),
            Err(err) => {
                warn!(jti = %claims.jti, error = %err, "Revocation lookup failed, rejecting refresh");
                return Err(AuthError::invalid_token("revocation status unavailable"));
            }
        }
        progress.advance(RotationState::RevocationChecked);

        let principal = self
            .reconciler
            .verify_eligible(&claims.username, claims.sub)
            .await
            .map_err(|err| {
                if err.is_server_error() {
                    warn!(jti = %claims.jti, error = %err, "Account re-verification failed, rejecting refresh");
                }
                AuthError::invalid_token("account is no longer eligible for a session")
            })?;
        progress.advance(RotationState::AccountVerified);

        let tokens = self.tokens.issue_pair(principal.id, &claims.username)?;

        let claimed = self
            .revocations
            .claim(claims.jti, claims.expires_at())
            .await
            .map_err(|err| {
                warn!(jti = %claims.jti, error = %err, "Refresh claim failed, rejecting refresh");
                AuthError::invalid_token("revocation status unavailable")
            })?;
        if !claimed {
            // lost the race; the pair signed above is dropped
            return Err(AuthError::TokenRevoked);
        }

        Ok(Rotation { principal, tokens })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::TokenConfig;
    use crate::identity::legacy_principal_id;
    use crate::storage::testing::UnavailableStore;
    use crate::storage::{
        Account, AccountStatus, AccountStore, InMemoryAccountStore, InMemoryPrincipalStore,
        MemoryStore,
    };
    use crate::token::jwt::{JwtService, SigningKeyPair};

    const TIMEOUT: Duration = Duration::from_millis(200);

    struct Fixture {
        accounts: Arc<InMemoryAccountStore>,
        tokens: Arc<TokenService>,
        revocations: RevocationStore,
        rotator: RefreshRotator,
    }

    fn fixture() -> Fixture {
        let accounts = Arc::new(InMemoryAccountStore::new());
        accounts.insert(Account {
            username: "otm401".to_string(),
            password_hash: String::new(),
            status: AccountStatus::default(),
            legacy: None,
        });
        let reconciler = IdentityReconciler::new(
            Arc::new(InMemoryPrincipalStore::new()),
            accounts.clone(),
            TIMEOUT,
        );
        let tokens = Arc::new(TokenService::new(
            JwtService::new(SigningKeyPair::generate_ec().unwrap(), "eduhub"),
            &TokenConfig::default(),
        ));
        let revocations = RevocationStore::new(Arc::new(MemoryStore::new()), TIMEOUT);
        let rotator = RefreshRotator::new(tokens.clone(), revocations.clone(), reconciler);

        Fixture {
            accounts,
            tokens,
            revocations,
            rotator,
        }
    }

    fn issue(f: &Fixture) -> TokenPair {
        f.tokens
            .issue_pair(legacy_principal_id("otm401"), "otm401")
            .unwrap()
    }

    #[tokio::test]
    async fn test_rotation_issues_new_pair_and_revokes_old() {
        let f = fixture();
        let old = issue(&f);

        let rotation = f.rotator.rotate(&old.refresh_token).await.unwrap();
        assert_eq!(rotation.principal.id, legacy_principal_id("otm401"));
        assert_ne!(rotation.tokens.refresh_jti, old.refresh_jti);
        assert!(f.revocations.is_revoked(old.refresh_jti).await.unwrap());
        assert!(!f
            .revocations
            .is_revoked(rotation.tokens.refresh_jti)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_reuse_is_rejected_as_revoked() {
        let f = fixture();
        let old = issue(&f);

        f.rotator.rotate(&old.refresh_token).await.unwrap();
        let err = f.rotator.rotate(&old.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenRevoked));
    }

    #[tokio::test]
    async fn test_concurrent_rotation_has_one_winner() {
        let f = fixture();
        let old = issue(&f);

        let attempts = (0..16).map(|_| {
            let rotator = f.rotator.clone();
            let token = old.refresh_token.clone();
            tokio::spawn(async move { rotator.rotate(&token).await })
        });
        let results: Vec<_> = collect_results(attempts).await;

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AuthError::TokenRevoked)));
    }

    async fn collect_results<I>(handles: I) -> Vec<AuthResult<Rotation>>
    where
        I: IntoIterator<Item = tokio::task::JoinHandle<AuthResult<Rotation>>>,
    {
        let mut results = Vec::new();
        for handle in handles.into_iter().collect::<Vec<_>>() {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn test_access_token_cannot_refresh() {
        let f = fixture();
        let pair = issue(&f);
        let err = f.rotator.rotate(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken { .. }));
    }

    #[tokio::test]
    async fn test_ineligible_account_rejected_without_claim() {
        let f = fixture();
        let old = issue(&f);
        f.accounts.set_status(
            "otm401",
            AccountStatus {
                enabled: false,
                ..AccountStatus::default()
            },
        );

        let err = f.rotator.rotate(&old.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken { .. }));
        // a rejected rotation leaves no trace
        assert!(!f.revocations.is_revoked(old.refresh_jti).await.unwrap());
    }

    #[tokio::test]
    async fn test_revocation_store_failure_fails_closed() {
        let f = fixture();
        let old = issue(&f);
        let reconciler = IdentityReconciler::new(
            Arc::new(InMemoryPrincipalStore::new()),
            f.accounts.clone(),
            TIMEOUT,
        );
        let rotator = RefreshRotator::new(
            f.tokens.clone(),
            RevocationStore::new(Arc::new(UnavailableStore::stalled()), Duration::from_millis(20)),
            reconciler,
        );

        let err = rotator.rotate(&old.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken { .. }));
    }

    /// Account store that never answers within any sane timeout.
    struct StalledAccounts;

    #[async_trait::async_trait]
    impl AccountStore for StalledAccounts {
        async fn find_account(&self, _: &str) -> AuthResult<Option<Account>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_account_status_timeout_fails_closed() {
        let f = fixture();
        let old = issue(&f);
        let reconciler = IdentityReconciler::new(
            Arc::new(InMemoryPrincipalStore::new()),
            Arc::new(StalledAccounts),
            Duration::from_millis(20),
        );
        let rotator = RefreshRotator::new(f.tokens.clone(), f.revocations.clone(), reconciler);

        let err = rotator.rotate(&old.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken { .. }));
        // the old token stays usable once the directory recovers
        assert!(!f.revocations.is_revoked(old.refresh_jti).await.unwrap());
        f.rotator.rotate(&old.refresh_token).await.unwrap();
    }

    #[test]
    fn test_terminal_states() {
        assert!(RotationState::Rotated.is_terminal());
        assert!(RotationState::Rejected.is_terminal());
        assert!(!RotationState::AccountVerified.is_terminal());
        assert_eq!(RotationState::SignatureChecked.to_string(), "signature_checked");
    }
}
