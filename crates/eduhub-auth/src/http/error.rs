//! Error responses for the session endpoints.
//!
//! Body: `{"error": <code>, "message": <text>}` plus `retryAfter` on 429 and
//! `correlationId` on 500. Messages never say whether a username exists, and
//! server-side causes stay in the log.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AuthError;

const REALM: &str = "eduhub";

/// Error body sent to clients.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Machine-readable code.
    pub error: &'static str,
    /// Human-readable, non-enumerating text.
    pub message: String,
    /// Seconds until retry is allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Id under which a server fault was logged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut headers = HeaderMap::new();
        let mut body = ErrorBody {
            error: self.error_code(),
            message: public_message(&self),
            retry_after: None,
            correlation_id: None,
        };

        match &self {
            AuthError::TooManyRequests { retry_after_secs } => {
                body.retry_after = Some(*retry_after_secs);
                headers.insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            err if err.is_server_error() => {
                let correlation_id = Uuid::new_v4();
                tracing::error!(
                    correlation_id = %correlation_id,
                    category = %err.category(),
                    error = %err,
                    "Session request failed"
                );
                body.correlation_id = Some(correlation_id);
            }
            _ => {}
        }

        if status == StatusCode::UNAUTHORIZED
            && let Ok(value) = HeaderValue::from_str(&www_authenticate(&self, &body.message))
        {
            headers.insert(header::WWW_AUTHENTICATE, value);
        }

        (status, headers, Json(body)).into_response()
    }
}

fn public_message(error: &AuthError) -> String {
    match error {
        AuthError::InvalidCredentials
        | AuthError::AccountDisabled
        | AuthError::AccountLocked
        | AuthError::CredentialsExpired
        | AuthError::TooManyRequests { .. } => error.to_string(),
        AuthError::InvalidToken { .. } => "Invalid or expired token".to_string(),
        AuthError::TokenRevoked => "Token has been revoked".to_string(),
        AuthError::Storage { .. } | AuthError::Configuration { .. } | AuthError::Internal { .. } => {
            "An internal error occurred".to_string()
        }
    }
}

/// `WWW-Authenticate` value for a 401. Token failures use the RFC 6750
/// `invalid_token` code; a failed login only names the scheme.
fn www_authenticate(error: &AuthError, description: &str) -> String {
    if error.is_token_error() {
        format!(
            "Bearer realm=\"{}\", error=\"invalid_token\", error_description=\"{}\"",
            REALM,
            description.replace('"', "\\\"")
        )
    } else {
        format!("Bearer realm=\"{}\"", REALM)
    }
}
