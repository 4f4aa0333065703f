//! Session endpoint handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{HeaderMap, request::Parts},
};
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::error::AuthError;
use crate::identity::Principal;
use crate::session::SessionService;
use crate::token::AccessTokenClaims;

/// Router state.
pub type SessionState = Arc<SessionService>;

// ============================================================================
// Request / Response Types
// ============================================================================

/// Login request body.
#[derive(Deserialize)]
pub struct LoginRequest {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Optional body of refresh and logout requests, for clients that cannot
/// send cookies.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBody {
    refresh_token: Option<String>,
}

impl TokenBody {
    /// Lenient parse: an empty or malformed body is an empty one.
    fn parse(body: &Bytes) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

/// Successful login response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Principal id.
    pub principal_id: Uuid,
    /// Username the session was opened with.
    pub username: String,
    /// Access token expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub access_token_expires_at: OffsetDateTime,
    /// Refresh token expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_token_expires_at: OffsetDateTime,
}

/// Successful refresh response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    /// Principal id.
    pub principal_id: Uuid,
    /// Access token expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub access_token_expires_at: OffsetDateTime,
    /// Refresh token expiry.
    #[serde(with = "time::serde::rfc3339")]
    pub refresh_token_expires_at: OffsetDateTime,
}

/// Logout response.
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    /// Always `true`.
    pub success: bool,
    /// Confirmation text.
    pub message: &'static str,
}

/// `/auth/me` response.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    /// The principal behind the token.
    pub principal: Principal,
    /// Role names.
    pub roles: Vec<String>,
    /// Permission strings.
    pub permissions: Vec<String>,
}

/// Cache clear response.
#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    /// Names of the cleared caches.
    pub cleared: Vec<&'static str>,
}

// ============================================================================
// Extractors
// ============================================================================

/// Validated access token claims of the current request.
///
/// Rejects with `InvalidToken` if no token is presented.
#[derive(Debug, Clone)]
pub struct Authenticated(pub AccessTokenClaims);

impl FromRequestParts<SessionState> for Authenticated {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SessionState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let token = state
            .transport()
            .access_token(&jar, &parts.headers)
            .ok_or_else(|| AuthError::invalid_token("no access token presented"))?;

        state.authenticate(&token).await.map(Self)
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /auth/login`
pub async fn login(
    State(service): State<SessionState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<LoginResponse>), AuthError> {
    let client = service.addresses().resolve(peer.ip(), &headers);
    let request = match serde_json::from_slice::<LoginRequest>(&body) {
        Ok(request) => request,
        Err(err) => {
            // Unreadable attempts still count against the client.
            service.charge_attempt(client).await?;
            debug!(client_address = %client, error = %err, "Unreadable login body");
            return Err(AuthError::InvalidCredentials);
        }
    };
    let session = service
        .login(&request.username, &request.password, client)
        .await?;

    let jar = service.transport().set(jar, &session.tokens);
    Ok((
        jar,
        Json(LoginResponse {
            principal_id: session.principal.id,
            username: request.username,
            access_token_expires_at: session.tokens.access_expires_at,
            refresh_token_expires_at: session.tokens.refresh_expires_at,
        }),
    ))
}

/// `POST /auth/refresh`
pub async fn refresh(
    State(service): State<SessionState>,
    jar: CookieJar,
    body: Bytes,
) -> Result<(CookieJar, Json<RefreshResponse>), AuthError> {
    let body = TokenBody::parse(&body);
    let token = service
        .transport()
        .refresh_token(&jar, body.refresh_token.as_deref())
        .ok_or_else(|| AuthError::invalid_token("no refresh token presented"))?;

    let session = service.refresh(&token).await?;

    let jar = service.transport().set(jar, &session.tokens);
    Ok((
        jar,
        Json(RefreshResponse {
            principal_id: session.principal.id,
            access_token_expires_at: session.tokens.access_expires_at,
            refresh_token_expires_at: session.tokens.refresh_expires_at,
        }),
    ))
}

/// `POST /auth/logout`
///
/// Always answers 200 and clears the cookies. Revokes whatever is presented.
pub async fn logout(
    State(service): State<SessionState>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> (CookieJar, Json<LogoutResponse>) {
    let body = TokenBody::parse(&body);
    let transport = service.transport();
    let access = transport.access_token(&jar, &headers);
    let refresh = transport.refresh_token(&jar, body.refresh_token.as_deref());

    service.logout(access.as_deref(), refresh.as_deref()).await;

    (
        transport.clear(jar),
        Json(LogoutResponse {
            success: true,
            message: "Logged out",
        }),
    )
}

/// `GET /auth/me`
pub async fn me(
    State(service): State<SessionState>,
    Authenticated(claims): Authenticated,
) -> Result<Json<MeResponse>, AuthError> {
    let view = service.me(&claims).await?;
    Ok(Json(MeResponse {
        principal: view.principal,
        roles: view.authorities.roles.iter().cloned().collect(),
        permissions: view.authorities.permissions.iter().cloned().collect(),
    }))
}

/// `POST /auth/cache/clear`
pub async fn clear_cache(
    State(service): State<SessionState>,
    Authenticated(claims): Authenticated,
) -> Json<CacheClearResponse> {
    Json(CacheClearResponse {
        cleared: service.clear_cache(claims.sub).await,
    })
}
