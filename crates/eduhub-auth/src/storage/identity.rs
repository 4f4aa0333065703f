//! Identity and permission collaborator traits.
//!
//! The session layer consumes three external stores:
//!
//! - [`AccountStore`] - credentials and status flags for every account,
//!   whether it lives in the modern directory or only in the legacy store
//! - [`PrincipalStore`] - the modern directory, keyed by stable principal id
//! - [`PermissionSource`] - the authoritative role/permission assignment
//!
//! Deployments implement these against their databases; in-memory versions
//! live in [`super::directory`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AuthResult;

/// Account status flags checked at login and on every refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountStatus {
    /// Account may sign in.
    pub enabled: bool,
    /// Account is locked.
    pub locked: bool,
    /// Password must be changed before signing in.
    pub credentials_expired: bool,
}

impl Default for AccountStatus {
    fn default() -> Self {
        Self {
            enabled: true,
            locked: false,
            credentials_expired: false,
        }
    }
}

/// Extra flags only carried by accounts of the legacy store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyState {
    /// Legacy activation flag; an inactive legacy account behaves as disabled.
    pub active: bool,
    /// The legacy store demands a password change before further use.
    pub must_change_password: bool,
}

/// An account as seen by the credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Login name, byte-exact.
    pub username: String,
    /// Argon2 PHC-format password hash.
    pub password_hash: String,
    /// Status flags.
    pub status: AccountStatus,
    /// Present for accounts that originate in the legacy store.
    pub legacy: Option<LegacyState>,
}

/// A record in the modern principal directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalRecord {
    /// Stable opaque id.
    pub id: Uuid,
    /// Login name.
    pub username: String,
}

/// Resolved roles and permissions of a principal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorities {
    /// Role names.
    pub roles: BTreeSet<String>,
    /// Permission strings.
    pub permissions: BTreeSet<String>,
}

impl Authorities {
    /// Builds a set from role and permission names.
    pub fn new<R, P>(roles: R, permissions: P) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        P: IntoIterator,
        P::Item: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }
}

/// Account lookup used for credential checks and status re-verification.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Finds an account by username.
    ///
    /// Returns `None` if neither store knows the username.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_account(&self, username: &str) -> AuthResult<Option<Account>>;
}

/// The modern principal directory.
#[async_trait]
pub trait PrincipalStore: Send + Sync {
    /// Finds a principal by username.
    async fn find_by_username(&self, username: &str) -> AuthResult<Option<PrincipalRecord>>;

    /// Finds a principal by id.
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<PrincipalRecord>>;
}

/// Authoritative role and permission assignment.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Resolves the roles and permissions of a principal.
    ///
    /// Unknown principals resolve to an empty set.
    async fn resolve(&self, principal_id: Uuid) -> AuthResult<Authorities>;
}
