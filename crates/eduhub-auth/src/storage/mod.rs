//! Storage traits and in-memory implementations.
//!
//! - [`shared`] - the atomic expiring key-value store shared by all instances
//! - [`revocation`] - revoked token ids on top of the shared store
//! - [`identity`] - account, principal and permission collaborator traits
//! - [`memory`] / [`directory`] - in-process implementations

pub mod directory;
pub mod identity;
pub mod memory;
pub mod revocation;
pub mod shared;

#[cfg(test)]
pub(crate) mod testing;

pub use directory::{InMemoryAccountStore, InMemoryPermissionSource, InMemoryPrincipalStore};
pub use identity::{
    Account, AccountStatus, AccountStore, Authorities, LegacyState, PermissionSource,
    PrincipalRecord, PrincipalStore,
};
pub use memory::MemoryStore;
pub use revocation::{Revocation, RevocationStore};
pub use shared::{Counter, SharedStore, with_timeout};
