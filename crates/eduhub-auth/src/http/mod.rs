//! HTTP surface of the session layer.
//!
//! [`auth_router`] serves the session endpoints relative to the API path;
//! the server nests it there. The login handler needs the peer address, so
//! the router must be served with
//! `into_make_service_with_connect_info::<SocketAddr>()`.

pub mod error;
pub mod handlers;

use axum::{
    Router,
    routing::{get, post},
};

pub use error::ErrorBody;
pub use handlers::{Authenticated, SessionState};

/// Builds the session router.
///
/// | Method | Path |
/// |--------|------|
/// | POST | `/auth/login` |
/// | POST | `/auth/logout` |
/// | POST | `/auth/refresh` |
/// | GET | `/auth/me` |
/// | POST | `/auth/cache/clear` |
pub fn auth_router(state: SessionState) -> Router {
    Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/auth/me", get(handlers::me))
        .route("/auth/cache/clear", post(handlers::clear_cache))
        .with_state(state)
}
