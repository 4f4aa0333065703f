//! Session and token error types.
//!
//! Every failure the session layer can produce is an [`AuthError`]. Client
//! facing variants carry only non-enumerating information; the server-side
//! variants keep the real cause for logging and are rendered as a generic
//! `server_error` by the HTTP layer.

use std::fmt;

use axum::http::StatusCode;

use crate::token::jwt::JwtError;

/// Errors that can occur during session and token operations.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Wrong password or unknown username. The two are indistinguishable.
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// The account exists but has been disabled (or is an inactive legacy account).
    #[error("Account is disabled")]
    AccountDisabled,

    /// The account is locked.
    #[error("Account is locked")]
    AccountLocked,

    /// The account's credentials have expired and must be changed.
    #[error("Credentials have expired")]
    CredentialsExpired,

    /// The client address exhausted its login attempts for the current window.
    #[error("Too many requests, retry after {retry_after_secs}s")]
    TooManyRequests {
        /// Seconds until the rate-limit window resets.
        retry_after_secs: u64,
    },

    /// The token is malformed, expired, badly signed or of the wrong kind.
    #[error("Invalid token: {message}")]
    InvalidToken {
        /// Description of why the token is invalid.
        message: String,
    },

    /// The token id is present in the revocation store.
    #[error("Token revoked")]
    TokenRevoked,

    /// The shared store or a collaborator store failed or timed out.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The session configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `TooManyRequests` error.
    #[must_use]
    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        Self::TooManyRequests { retry_after_secs }
    }

    /// Creates a new `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a client error (4xx category).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        !self.is_server_error()
    }

    /// Returns `true` if this is a server error (5xx category).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. }
        )
    }

    /// Returns `true` if this error concerns a presented token.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(self, Self::InvalidToken { .. } | Self::TokenRevoked)
    }

    /// Returns `true` if the credentials were right but the account is not usable.
    #[must_use]
    pub fn is_account_error(&self) -> bool {
        matches!(
            self,
            Self::AccountDisabled | Self::AccountLocked | Self::CredentialsExpired
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidCredentials => ErrorCategory::Authentication,
            Self::AccountDisabled | Self::AccountLocked | Self::CredentialsExpired => {
                ErrorCategory::Account
            }
            Self::TooManyRequests { .. } => ErrorCategory::RateLimit,
            Self::InvalidToken { .. } | Self::TokenRevoked => ErrorCategory::Token,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the HTTP status this error is reported with.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials | Self::InvalidToken { .. } | Self::TokenRevoked => {
                StatusCode::UNAUTHORIZED
            }
            Self::AccountDisabled | Self::AccountLocked | Self::CredentialsExpired => {
                StatusCode::FORBIDDEN
            }
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the machine-readable error code sent to clients.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountDisabled => "account_disabled",
            Self::AccountLocked => "account_locked",
            Self::CredentialsExpired => "credentials_expired",
            Self::TooManyRequests { .. } => "too_many_requests",
            Self::InvalidToken { .. } => "invalid_token",
            Self::TokenRevoked => "token_revoked",
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                "server_error"
            }
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        if err.is_key_error() || matches!(err, JwtError::EncodingError { .. }) {
            Self::internal(err.to_string())
        } else {
            Self::invalid_token(err.to_string())
        }
    }
}

/// Categories of session errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Credential checks.
    Authentication,
    /// Account status flags.
    Account,
    /// Login throttling.
    RateLimit,
    /// Token validation and revocation.
    Token,
    /// Shared store and collaborator failures.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal server errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::Account => write!(f, "account"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Token => write!(f, "token"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "Invalid username or password"
        );
        assert_eq!(
            AuthError::too_many_requests(42).to_string(),
            "Too many requests, retry after 42s"
        );
        assert_eq!(
            AuthError::invalid_token("bad signature").to_string(),
            "Invalid token: bad signature"
        );
    }

    #[test]
    fn test_error_predicates() {
        assert!(AuthError::InvalidCredentials.is_client_error());
        assert!(!AuthError::InvalidCredentials.is_server_error());

        assert!(AuthError::AccountLocked.is_account_error());
        assert!(!AuthError::AccountLocked.is_token_error());

        assert!(AuthError::TokenRevoked.is_token_error());
        assert!(AuthError::invalid_token("x").is_token_error());

        let err = AuthError::storage("redis down");
        assert!(err.is_server_error());
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AuthError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AuthError::TokenRevoked.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::AccountLocked.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::too_many_requests(5).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::storage("down").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            AuthError::InvalidCredentials.category(),
            ErrorCategory::Authentication
        );
        assert_eq!(AuthError::AccountDisabled.category(), ErrorCategory::Account);
        assert_eq!(
            AuthError::too_many_requests(1).category(),
            ErrorCategory::RateLimit
        );
        assert_eq!(AuthError::TokenRevoked.category(), ErrorCategory::Token);
        assert_eq!(
            AuthError::storage("x").category(),
            ErrorCategory::Infrastructure
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AuthError::InvalidCredentials.error_code(),
            "invalid_credentials"
        );
        assert_eq!(AuthError::AccountLocked.error_code(), "account_locked");
        assert_eq!(
            AuthError::too_many_requests(5).error_code(),
            "too_many_requests"
        );
        assert_eq!(AuthError::TokenRevoked.error_code(), "token_revoked");
        assert_eq!(AuthError::internal("boom").error_code(), "server_error");
        assert_eq!(AuthError::configuration("x").error_code(), "server_error");
    }

    #[test]
    fn test_jwt_error_conversion() {
        let err: AuthError = JwtError::Expired.into();
        assert!(matches!(err, AuthError::InvalidToken { .. }));

        let err: AuthError = JwtError::InvalidSignature.into();
        assert!(matches!(err, AuthError::InvalidToken { .. }));

        let err: AuthError = JwtError::invalid_key("bad pem").into();
        assert!(matches!(err, AuthError::Internal { .. }));
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Authentication.to_string(), "authentication");
        assert_eq!(ErrorCategory::RateLimit.to_string(), "rate_limit");
        assert_eq!(ErrorCategory::Infrastructure.to_string(), "infrastructure");
    }
}
