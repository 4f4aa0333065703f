//! Permission caching.

pub mod cache;

pub use cache::{CLEARED_CACHES, INVALIDATION_CHANNEL, PermissionCache};
