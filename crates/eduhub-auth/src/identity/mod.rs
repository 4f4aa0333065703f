//! Identity: credential checks and principal reconciliation.
//!
//! Accounts live in two stores. The modern directory gives every principal a
//! stable id; the legacy store has only usernames. [`IdentityReconciler`]
//! turns either into one [`Principal`] so nothing downstream needs to know
//! where an account came from.

pub mod credentials;
pub mod reconciler;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use credentials::CredentialValidator;
pub use reconciler::{IdentityReconciler, legacy_principal_id};

use crate::storage::Account;
use crate::{AuthError, AuthResult};

/// Where a principal's id comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalOrigin {
    /// A record in the modern directory.
    Directory,
    /// Synthesized from a legacy username.
    Legacy,
}

/// The identity a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable id, used as the token subject.
    pub id: Uuid,
    /// Login name, when known. Synthesized ids cannot be reversed, so a
    /// legacy principal looked up by id has none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Which store the id comes from.
    pub origin: PrincipalOrigin,
}

/// Applies the status checks shared by login and refresh.
///
/// Order: enabled (legacy: active), not locked, credentials not expired
/// (legacy: no pending password change).
pub(crate) fn check_account_status(account: &Account) -> AuthResult<()> {
    let legacy_inactive = account.legacy.is_some_and(|l| !l.active);
    let legacy_must_change = account.legacy.is_some_and(|l| l.must_change_password);

    if !account.status.enabled || legacy_inactive {
        return Err(AuthError::AccountDisabled);
    }
    if account.status.locked {
        return Err(AuthError::AccountLocked);
    }
    if account.status.credentials_expired || legacy_must_change {
        return Err(AuthError::CredentialsExpired);
    }
    Ok(())
}
