//! Session and token lifecycle for EduHub.
//!
//! This crate owns everything between a username/password and an
//! authenticated request:
//!
//! - credential validation against the modern and legacy account stores
//! - signed access/refresh token pairs delivered as HttpOnly cookies
//! - single-use refresh rotation with cross-instance revocation
//! - per-address login throttling that cannot be spoofed through headers
//! - a two-tier cache of each principal's roles and permissions
//!
//! State that must agree across instances lives behind [`SharedStore`]
//! (Redis in production, [`MemoryStore`] for a single process).
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use eduhub_auth::{AuthConfig, Collaborators, MemoryStore, SessionService, http::auth_router};
//!
//! let service = SessionService::new(&AuthConfig::default(), collaborators, Arc::new(MemoryStore::new()))?;
//! let app = axum::Router::new().nest("/api", auth_router(Arc::new(service)));
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod password;
pub mod permission;
pub mod rate_limit;
pub mod session;
pub mod storage;
pub mod token;

pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCategory};
pub use identity::{Principal, PrincipalOrigin};
pub use permission::PermissionCache;
pub use session::{Collaborators, IssuedSession, LogoutOutcome, SessionService, SessionView};
pub use storage::{MemoryStore, SharedStore};

/// Result type for session operations.
pub type AuthResult<T> = Result<T, AuthError>;
