//! Principal reconciliation across the modern and legacy identity stores.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use super::{Principal, PrincipalOrigin, check_account_status};
use crate::storage::{AccountStore, PrincipalStore, with_timeout};
use crate::{AuthError, AuthResult};

/// Namespace for synthesized legacy principal ids.
///
/// Changing it changes every legacy principal id and orphans their
/// permission assignments.
pub const LEGACY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_9b3d_5c7a_8e21_4d0f_b6a9_3c57);

/// Deterministic id for a username that has no directory record.
///
/// Name-based (UUID v5): the same username always yields the same id and the
/// id does not reveal the username. The username is used byte-exact.
#[must_use]
pub fn legacy_principal_id(username: &str) -> Uuid {
    Uuid::new_v5(&LEGACY_NAMESPACE, format!("legacy:{}", username).as_bytes())
}

/// Resolves one stable principal for an authenticated username.
#[derive(Clone)]
pub struct IdentityReconciler {
    principals: Arc<dyn PrincipalStore>,
    accounts: Arc<dyn AccountStore>,
    timeout: Duration,
}

impl IdentityReconciler {
    /// Creates a reconciler whose store calls are bounded by `timeout`.
    pub fn new(
        principals: Arc<dyn PrincipalStore>,
        accounts: Arc<dyn AccountStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            principals,
            accounts,
            timeout,
        }
    }

    /// Returns the directory principal for `username`, or a synthesized one.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the directory fails or times out.
    pub async fn reconcile(&self, username: &str) -> AuthResult<Principal> {
        let record = with_timeout(
            self.timeout,
            "principal lookup",
            self.principals.find_by_username(username),
        )
        .await?;

        Ok(match record {
            Some(record) => Principal {
                id: record.id,
                username: Some(record.username),
                origin: PrincipalOrigin::Directory,
            },
            None => Principal {
                id: legacy_principal_id(username),
                username: Some(username.to_string()),
                origin: PrincipalOrigin::Legacy,
            },
        })
    }

    /// Re-checks that a session opened as `username` for `subject` may continue.
    ///
    /// Fails if the account is gone, disabled, locked, has expired
    /// credentials (legacy: inactive or pending password change), or if
    /// `username` no longer reconciles to `subject`.
    ///
    /// # Errors
    ///
    /// Returns the account status error, `InvalidToken` on a subject
    /// mismatch, or `Storage` if a store fails or times out.
    pub async fn verify_eligible(&self, username: &str, subject: Uuid) -> AuthResult<Principal> {
        let account = with_timeout(
            self.timeout,
            "account lookup",
            self.accounts.find_account(username),
        )
        .await?
        .ok_or_else(|| AuthError::invalid_token("account no longer exists"))?;

        check_account_status(&account)?;

        let principal = self.reconcile(username).await?;
        if principal.id != subject {
            return Err(AuthError::invalid_token(
                "token subject does not match account",
            ));
        }

        Ok(principal)
    }

    /// Describes a principal by id, as needed when only a token subject is known.
    ///
    /// Ids without a directory record are reported as legacy principals
    /// without a username.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the directory fails or times out.
    pub async fn describe(&self, id: Uuid) -> AuthResult<Principal> {
        let record = with_timeout(
            self.timeout,
            "principal lookup",
            self.principals.find_by_id(id),
        )
        .await?;

        Ok(match record {
            Some(record) => Principal {
                id,
                username: Some(record.username),
                origin: PrincipalOrigin::Directory,
            },
            None => Principal {
                id,
                username: None,
                origin: PrincipalOrigin::Legacy,
            },
        })
    }
}
