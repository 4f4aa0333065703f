//! In-memory collaborator stores.
//!
//! Used by tests and by the server's bootstrap seeding. Each store is a
//! `DashMap` and can be mutated while the service is running, which is how
//! tests simulate an account being locked or a role being withdrawn.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::identity::{
    Account, AccountStatus, AccountStore, Authorities, LegacyState, PermissionSource,
    PrincipalRecord, PrincipalStore,
};
use crate::AuthResult;

/// In-memory [`AccountStore`].
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: DashMap<String, Account>,
}

impl InMemoryAccountStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an account.
    pub fn insert(&self, account: Account) {
        self.accounts.insert(account.username.clone(), account);
    }

    /// Replaces the status flags of an account. Returns `false` if unknown.
    pub fn set_status(&self, username: &str, status: AccountStatus) -> bool {
        match self.accounts.get_mut(username) {
            Some(mut account) => {
                account.status = status;
                true
            }
            None => false,
        }
    }

    /// Replaces the legacy flags of an account. Returns `false` if unknown.
    pub fn set_legacy_state(&self, username: &str, legacy: Option<LegacyState>) -> bool {
        match self.accounts.get_mut(username) {
            Some(mut account) => {
                account.legacy = legacy;
                true
            }
            None => false,
        }
    }

    /// Removes an account.
    pub fn remove(&self, username: &str) {
        self.accounts.remove(username);
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_account(&self, username: &str) -> AuthResult<Option<Account>> {
        Ok(self.accounts.get(username).map(|a| a.value().clone()))
    }
}

/// In-memory [`PrincipalStore`].
#[derive(Debug, Default)]
pub struct InMemoryPrincipalStore {
    by_username: DashMap<String, PrincipalRecord>,
    by_id: DashMap<Uuid, PrincipalRecord>,
}

impl InMemoryPrincipalStore {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a principal record.
    pub fn insert(&self, record: PrincipalRecord) {
        self.by_username
            .insert(record.username.clone(), record.clone());
        self.by_id.insert(record.id, record);
    }
}

#[async_trait]
impl PrincipalStore for InMemoryPrincipalStore {
    async fn find_by_username(&self, username: &str) -> AuthResult<Option<PrincipalRecord>> {
        Ok(self.by_username.get(username).map(|r| r.value().clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<PrincipalRecord>> {
        Ok(self.by_id.get(&id).map(|r| r.value().clone()))
    }
}

/// In-memory [`PermissionSource`].
#[derive(Debug, Default)]
pub struct InMemoryPermissionSource {
    grants: DashMap<Uuid, Authorities>,
    resolutions: AtomicU64,
}

impl InMemoryPermissionSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the authorities of a principal.
    pub fn set(&self, principal_id: Uuid, authorities: Authorities) {
        self.grants.insert(principal_id, authorities);
    }

    /// Number of times `resolve` has been called.
    #[must_use]
    pub fn resolutions(&self) -> u64 {
        self.resolutions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PermissionSource for InMemoryPermissionSource {
    async fn resolve(&self, principal_id: Uuid) -> AuthResult<Authorities> {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .grants
            .get(&principal_id)
            .map(|a| a.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(username: &str) -> Account {
        Account {
            username: username.to_string(),
            password_hash: "$argon2id$placeholder".to_string(),
            status: AccountStatus::default(),
            legacy: None,
        }
    }

    #[tokio::test]
    async fn test_account_store_lookup_and_status_update() {
        let store = InMemoryAccountStore::new();
        store.insert(account("otm401"));

        assert!(store.find_account("otm401").await.unwrap().is_some());
        assert!(store.find_account("OTM401").await.unwrap().is_none());

        let locked = AccountStatus {
            locked: true,
            ..AccountStatus::default()
        };
        assert!(store.set_status("otm401", locked));
        assert!(!store.set_status("nobody", locked));

        let found = store.find_account("otm401").await.unwrap().unwrap();
        assert!(found.status.locked);
    }

    #[tokio::test]
    async fn test_principal_store_both_indexes() {
        let store = InMemoryPrincipalStore::new();
        let id = Uuid::new_v4();
        store.insert(PrincipalRecord {
            id,
            username: "teacher7".to_string(),
        });

        assert_eq!(
            store.find_by_username("teacher7").await.unwrap().unwrap().id,
            id
        );
        assert_eq!(
            store.find_by_id(id).await.unwrap().unwrap().username,
            "teacher7"
        );
        assert!(store.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_permission_source_counts_resolutions() {
        let source = InMemoryPermissionSource::new();
        let id = Uuid::new_v4();
        source.set(id, Authorities::new(["teacher"], ["journal:read"]));

        let resolved = source.resolve(id).await.unwrap();
        assert!(resolved.permissions.contains("journal:read"));

        let unknown = source.resolve(Uuid::new_v4()).await.unwrap();
        assert_eq!(unknown, Authorities::default());
        assert_eq!(source.resolutions(), 2);
    }
}
