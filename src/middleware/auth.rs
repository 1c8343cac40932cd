//! Bearer-token authentication for the read-side API.
//!
//! Token issuance lives elsewhere; this middleware only verifies the
//! HS256 signature and attaches the authenticated user id to the request.

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use std::sync::Arc;

use crate::config::AuthSettings;
use crate::error::AppError;
use crate::models::{AuthenticatedUser, Claims};

pub async fn auth_middleware(
    State(auth): State<Arc<AuthSettings>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::TokenRequired)?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AppError::TokenRequired)?;

    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(auth.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;

    request.extensions_mut().insert(AuthenticatedUser {
        id: decoded.claims.sub,
    });

    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(AppError::TokenRequired)
    }
}
