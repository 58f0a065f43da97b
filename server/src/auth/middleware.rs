//! Authentication Middleware

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use sb_common::Identity;

use crate::api::AppState;

use super::error::AuthError;
use super::jwt::validate_handshake_token;

/// Authenticated identity injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthIdentity(pub Identity);

/// Middleware to require a valid handshake token on HTTP routes.
///
/// Extracts the Bearer token from the Authorization header, validates it and
/// injects [`AuthIdentity`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingAuthHeader)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidAuthHeader)?;

    let identity = validate_handshake_token(token, &state.config.jwt_public_key)?;
    request.extensions_mut().insert(AuthIdentity(identity));

    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for AuthIdentity
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}
