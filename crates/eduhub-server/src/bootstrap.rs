//! Seeds the in-memory account directory from `[bootstrap]`.

use std::sync::Arc;

use eduhub_auth::Collaborators;
use eduhub_auth::identity::legacy_principal_id;
use eduhub_auth::password::hash_password;
use eduhub_auth::storage::{
    Account, AccountStatus, Authorities, InMemoryAccountStore, InMemoryPermissionSource,
    InMemoryPrincipalStore, LegacyState, PrincipalRecord,
};
use uuid::Uuid;

use crate::config::{BootstrapAccount, BootstrapConfig};

/// The seeded stores, kept concrete so callers can still mutate them.
#[derive(Clone, Default)]
pub struct Directory {
    pub accounts: Arc<InMemoryAccountStore>,
    pub principals: Arc<InMemoryPrincipalStore>,
    pub permissions: Arc<InMemoryPermissionSource>,
}

impl Directory {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            accounts: self.accounts.clone(),
            principals: self.principals.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

/// Hashes every configured password and fills a fresh [`Directory`].
pub async fn seed(config: &BootstrapConfig) -> anyhow::Result<Directory> {
    let directory = Directory::default();

    for entry in &config.accounts {
        let password = entry.password.clone();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;
        let principal_id = seed_account(&directory, entry, password_hash);

        tracing::info!(
            username = %entry.username,
            principal_id = %principal_id,
            legacy = entry.legacy,
            "Seeded account"
        );
    }

    Ok(directory)
}

fn seed_account(directory: &Directory, entry: &BootstrapAccount, password_hash: String) -> Uuid {
    let principal_id = if entry.legacy {
        legacy_principal_id(&entry.username)
    } else {
        let id = entry.id.unwrap_or_else(Uuid::new_v4);
        directory.principals.insert(PrincipalRecord {
            id,
            username: entry.username.clone(),
        });
        id
    };

    directory.accounts.insert(Account {
        username: entry.username.clone(),
        password_hash,
        status: AccountStatus {
            enabled: entry.enabled,
            locked: entry.locked,
            credentials_expired: entry.credentials_expired,
        },
        legacy: entry.legacy.then_some(LegacyState {
            active: true,
            must_change_password: false,
        }),
    });

    directory.permissions.set(
        principal_id,
        Authorities::new(entry.roles.iter().cloned(), entry.permissions.iter().cloned()),
    );

    principal_id
}

#[cfg(test)]
mod tests {
    use eduhub_auth::password::verify_password;
    use eduhub_auth::storage::{AccountStore, PermissionSource, PrincipalStore};

    use super::*;

    fn entry(username: &str, legacy: bool) -> BootstrapAccount {
        BootstrapAccount {
            username: username.to_string(),
            password: "pw-123".to_string(),
            id: None,
            legacy,
            enabled: true,
            locked: false,
            credentials_expired: false,
            roles: vec!["teacher".to_string()],
            permissions: vec!["course:read".to_string()],
        }
    }

    #[tokio::test]
    async fn test_seeds_directory_account() {
        let id = Uuid::new_v4();
        let mut account = entry("m.keller", false);
        account.id = Some(id);
        account.locked = true;

        let directory = seed(&BootstrapConfig {
            accounts: vec![account],
        })
        .await
        .unwrap();

        let stored = directory
            .accounts
            .find_account("m.keller")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.status.locked);
        assert!(stored.legacy.is_none());
        assert!(verify_password("pw-123", &stored.password_hash).unwrap());

        let record = directory.principals.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.username, "m.keller");

        let authorities = directory.permissions.resolve(id).await.unwrap();
        assert!(authorities.roles.contains("teacher"));
        assert!(authorities.permissions.contains("course:read"));
    }

    #[tokio::test]
    async fn test_seeds_legacy_account_without_principal() {
        let directory = seed(&BootstrapConfig {
            accounts: vec![entry("old.admin", true)],
        })
        .await
        .unwrap();

        assert!(
            directory
                .principals
                .find_by_username("old.admin")
                .await
                .unwrap()
                .is_none()
        );

        let stored = directory
            .accounts
            .find_account("old.admin")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            stored.legacy,
            Some(LegacyState {
                active: true,
                must_change_password: false
            })
        );

        let authorities = directory
            .permissions
            .resolve(legacy_principal_id("old.admin"))
            .await
            .unwrap();
        assert!(authorities.roles.contains("teacher"));
    }
}
