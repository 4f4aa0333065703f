//! Username/password authentication.

use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::password::{TIMING_DUMMY_HASH, verify_password};
use crate::storage::{Account, AccountStore, with_timeout};
use crate::{AuthError, AuthResult};

use super::check_account_status;

/// Checks a username/password pair against the account store.
///
/// The checks run in a fixed order and stop at the first failure: password,
/// enabled, not locked, credentials not expired. An unknown username is
/// reported exactly like a wrong password and costs the same Argon2 work.
#[derive(Clone)]
pub struct CredentialValidator {
    accounts: Arc<dyn AccountStore>,
    timeout: Duration,
}

impl CredentialValidator {
    /// Creates a validator whose store calls are bounded by `timeout`.
    pub fn new(accounts: Arc<dyn AccountStore>, timeout: Duration) -> Self {
        Self { accounts, timeout }
    }

    /// Authenticates a user.
    ///
    /// # Errors
    ///
    /// - `InvalidCredentials` for an unknown username, a wrong password or an
    ///   unreadable stored hash
    /// - `AccountDisabled`, `AccountLocked`, `CredentialsExpired` for an
    ///   account that may not sign in
    /// - `Storage` if the account store fails or times out
    pub async fn authenticate(&self, username: &str, password: &str) -> AuthResult<Account> {
        let account = with_timeout(
            self.timeout,
            "account lookup",
            self.accounts.find_account(username),
        )
        .await?;

        let hash = account
            .as_ref()
            .map_or(TIMING_DUMMY_HASH, |a| a.password_hash.as_str())
            .to_string();
        let password = password.to_string();
        let user = username.to_string();

        let matches = tokio::task::spawn_blocking(move || {
            verify_password(&password, &hash).unwrap_or_else(|err| {
                // Must be indistinguishable from a wrong password.
                error!(username = %user, error = %err, "Stored password hash is unreadable");
                let _ = verify_password(&password, TIMING_DUMMY_HASH);
                false
            })
        })
        .await
        .map_err(|e| AuthError::internal(format!("password verification task failed: {}", e)))?;

        let account = match account {
            Some(account) if matches => account,
            _ => return Err(AuthError::InvalidCredentials),
        };

        check_account_status(&account)?;
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use argon2::Params;

    use super::*;
    use crate::password::hash_password_with;
    use crate::storage::{AccountStatus, InMemoryAccountStore, LegacyState};

    type Seed<'a> = (&'a str, &'a str, AccountStatus, Option<LegacyState>);

    fn validator_with(accounts: &[Seed<'_>]) -> CredentialValidator {
        let store = InMemoryAccountStore::new();
        for (username, password, status, legacy) in accounts {
            store.insert(Account {
                username: username.to_string(),
                password_hash: hash_password_with(password, Params::new(1024, 1, 1, None).unwrap())
                    .unwrap(),
                status: *status,
                legacy: *legacy,
            });
        }
        CredentialValidator::new(Arc::new(store), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_valid_credentials() {
        let validator = validator_with(&[("otm401", "correct", AccountStatus::default(), None)]);
        let account = validator.authenticate("otm401", "correct").await.unwrap();
        assert_eq!(account.username, "otm401");
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_user_look_the_same() {
        let validator = validator_with(&[("otm401", "correct", AccountStatus::default(), None)]);

        let wrong = validator.authenticate("otm401", "nope").await.unwrap_err();
        let unknown = validator.authenticate("ghost", "nope").await.unwrap_err();

        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn test_unreadable_hash_looks_like_wrong_password() {
        let store = InMemoryAccountStore::new();
        for (username, hash) in [("blank", ""), ("mangled", "$argon2id$not-a-hash")] {
            store.insert(Account {
                username: username.to_string(),
                password_hash: hash.to_string(),
                status: AccountStatus::default(),
                legacy: None,
            });
        }
        let validator = CredentialValidator::new(Arc::new(store), Duration::from_millis(200));

        for username in ["blank", "mangled", "ghost"] {
            let err = validator.authenticate(username, "anything").await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials), "{username}: {err}");
        }
    }

    #[tokio::test]
    async fn test_password_checked_before_status() {
        let status = AccountStatus {
            enabled: false,
            locked: true,
            credentials_expired: true,
        };
        let validator = validator_with(&[("frozen", "correct", status, None)]);

        // a wrong password must not reveal the account state
        let err = validator.authenticate("frozen", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        // right password: disabled wins over locked and expired
        let err = validator.authenticate("frozen", "correct").await.unwrap_err();
        assert!(matches!(err, AuthError::AccountDisabled));
    }

    #[tokio::test]
    async fn test_status_order() {
        let locked_and_expired = AccountStatus {
            enabled: true,
            locked: true,
            credentials_expired: true,
        };
        let expired = AccountStatus {
            credentials_expired: true,
            ..AccountStatus::default()
        };
        let validator = validator_with(&[
            ("locked", "pw", locked_and_expired, None),
            ("expired", "pw", expired, None),
        ]);

        assert!(matches!(
            validator.authenticate("locked", "pw").await.unwrap_err(),
            AuthError::AccountLocked
        ));
        assert!(matches!(
            validator.authenticate("expired", "pw").await.unwrap_err(),
            AuthError::CredentialsExpired
        ));
    }

    #[tokio::test]
    async fn test_legacy_flags() {
        let inactive = LegacyState {
            active: false,
            must_change_password: false,
        };
        let must_change = LegacyState {
            active: true,
            must_change_password: true,
        };
        let validator = validator_with(&[
            ("old1", "pw", AccountStatus::default(), Some(inactive)),
            ("old2", "pw", AccountStatus::default(), Some(must_change)),
        ]);

        assert!(matches!(
            validator.authenticate("old1", "pw").await.unwrap_err(),
            AuthError::AccountDisabled
        ));
        assert!(matches!(
            validator.authenticate("old2", "pw").await.unwrap_err(),
            AuthError::CredentialsExpired
        ));
    }

    #[tokio::test]
    async fn test_store_failure_is_server_error() {
        let validator =
            CredentialValidator::new(Arc::new(UnreachableDirectory), Duration::from_millis(50));
        let err = validator.authenticate("otm401", "pw").await.unwrap_err();
        assert!(err.is_server_error());
    }

    struct UnreachableDirectory;

    #[async_trait::async_trait]
    impl AccountStore for UnreachableDirectory {
        async fn find_account(&self, _: &str) -> AuthResult<Option<Account>> {
            Err(AuthError::storage("directory unavailable"))
        }
    }
}
