//! API-key authentication extractors for Axum handlers.
//!
//! Management and query endpoints authenticate with the `X-API-Key` header
//! alone. Callback endpoints also carry an HMAC signature over the raw
//! body, so they read the body themselves and call [`authenticate_signed`].

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method};
use docrelay_core::error::CoreError;
use docrelay_core::signing::{HEADER_API_KEY, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use docrelay_core::types::EntityId;
use docrelay_store::models::api_key::Permission;

use crate::auth::manager::AUTH_FAILED;
use crate::auth::{AuthenticationRequest, AuthenticationResult};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// The key that authenticated the current request.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    pub key_id: EntityId,
    pub permissions: Vec<Permission>,
}

impl ApiKeyAuth {
    /// Reject with 403 unless the key holds `permission` (or `admin`).
    pub fn require(&self, permission: Permission) -> AppResult<()> {
        if self.permissions.contains(&Permission::Admin) || self.permissions.contains(&permission) {
            return Ok(());
        }
        Err(AppError::Core(CoreError::Forbidden(
            "API key lacks the required permission".into(),
        )))
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn into_auth(result: AuthenticationResult) -> AppResult<ApiKeyAuth> {
    match (result.authenticated, result.key_id) {
        (true, Some(key_id)) => Ok(ApiKeyAuth {
            key_id,
            permissions: result.permissions,
        }),
        _ => Err(AppError::Core(CoreError::Unauthorized(AUTH_FAILED.into()))),
    }
}

impl FromRequestParts<AppState> for ApiKeyAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let request = AuthenticationRequest {
            api_key: header(&parts.headers, HEADER_API_KEY),
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            require_signature: false,
            ..Default::default()
        };
        into_auth(state.auth.authenticate_request(&request).await)
    }
}

/// Authenticate a signed callback and check its permission.
pub async fn authenticate_signed(
    state: &AppState,
    headers: &HeaderMap,
    method: &Method,
    path: &str,
    body: &[u8],
    permission: Permission,
) -> AppResult<ApiKeyAuth> {
    let request = AuthenticationRequest {
        api_key: header(headers, HEADER_API_KEY),
        signature: header(headers, HEADER_SIGNATURE),
        timestamp: header(headers, HEADER_TIMESTAMP),
        method: method.to_string(),
        path: path.to_string(),
        body: body.to_vec(),
        require_signature: true,
    };
    let auth = into_auth(state.auth.authenticate_request(&request).await)?;
    auth.require(permission)?;
    Ok(auth)
}

/// Requires a key with the `admin` permission.
pub struct RequireAdminKey(pub ApiKeyAuth);

impl FromRequestParts<AppState> for RequireAdminKey {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = ApiKeyAuth::from_request_parts(parts, state).await?;
        auth.require(Permission::Admin)?;
        Ok(RequireAdminKey(auth))
    }
}

/// Requires `submit_documents` (or `admin`).
pub struct RequireSubmitDocuments(pub ApiKeyAuth);

impl FromRequestParts<AppState> for RequireSubmitDocuments {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = ApiKeyAuth::from_request_parts(parts, state).await?;
        auth.require(Permission::SubmitDocuments)?;
        Ok(RequireSubmitDocuments(auth))
    }
}

/// Requires `read_status` (or `admin`).
pub struct RequireReadStatus(pub ApiKeyAuth);

impl FromRequestParts<AppState> for RequireReadStatus {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = ApiKeyAuth::from_request_parts(parts, state).await?;
        auth.require(Permission::ReadStatus)?;
        Ok(RequireReadStatus(auth))
    }
}
