//! Session lifecycle: the service facade and the cookie transport.

pub mod service;
pub mod transport;

pub use service::{Collaborators, IssuedSession, LogoutOutcome, SessionService, SessionView};
pub use transport::{ACCESS_COOKIE, REFRESH_COOKIE, SessionTransport};
