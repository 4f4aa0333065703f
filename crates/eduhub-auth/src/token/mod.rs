//! Session tokens: signing, issuance and refresh rotation.

pub mod jwt;
pub mod rotation;
pub mod service;

pub use jwt::{
    AccessTokenClaims, JwtError, JwtService, RefreshTokenClaims, SessionClaims, SigningAlgorithm,
    SigningKeyPair, TokenKind,
};
pub use rotation::{RefreshRotator, Rotation, RotationState};
pub use service::{TokenPair, TokenService};
