use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{
    error::{AppError, StoreError},
    state::AppState,
    users::repo_types::User,
};

/// Why a bearer authentication attempt stopped short of a principal.
#[derive(Debug)]
pub enum BearerFailure {
    MissingHeader,
    MalformedHeader,
    InvalidToken,
    UnknownPrincipal,
    Store(StoreError),
}

impl BearerFailure {
    pub fn category(&self) -> &'static str {
        match self {
            BearerFailure::MissingHeader => "missing_header",
            BearerFailure::MalformedHeader => "malformed_header",
            BearerFailure::InvalidToken => "invalid_token",
            BearerFailure::UnknownPrincipal => "unknown_principal",
            BearerFailure::Store(_) => "store_error",
        }
    }
}

impl From<BearerFailure> for AppError {
    fn from(failure: BearerFailure) -> Self {
        match failure {
            BearerFailure::MissingHeader => AppError::Unauthorized("authorization header is missing"),
            BearerFailure::MalformedHeader => {
                AppError::Unauthorized("authorization header is malformed")
            }
            BearerFailure::InvalidToken => AppError::Unauthorized("invalid or expired token"),
            BearerFailure::UnknownPrincipal => AppError::Unauthorized("unknown principal"),
            BearerFailure::Store(e) => e.into(),
        }
    }
}

/// Extracts `<token>` from a header of the exact form `Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, BearerFailure> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(BearerFailure::MissingHeader)?
        .to_str()
        .map_err(|_| BearerFailure::MalformedHeader)?;

    match value.split(' ').collect::<Vec<_>>().as_slice() {
        ["Bearer", token] if !token.is_empty() => Ok(*token),
        _ => Err(BearerFailure::MalformedHeader),
    }
}

/// Resolves the bearer token to a stored principal. One store read per
/// call, no caching: a deleted account must fail even with a valid token.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<User, BearerFailure> {
    let token = bearer_token(headers)?;
    let claims = state
        .jwt
        .verify(token)
        .map_err(|_| BearerFailure::InvalidToken)?;

    match state.users.get_by_id(claims.sub).await {
        Ok(user) => Ok(user),
        Err(StoreError::NotFound) => Err(BearerFailure::UnknownPrincipal),
        Err(e) => Err(BearerFailure::Store(e)),
    }
}

/// Route layer for every bearer-protected endpoint.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let outcome = authenticate(&state, req.headers()).await;
    match outcome {
        Ok(user) => {
            req.extensions_mut().insert(AuthUser(user));
            Ok(next.run(req).await)
        }
        Err(failure) => {
            warn!(
                method = %req.method(),
                path = %req.uri().path(),
                category = failure.category(),
                "bearer authentication failed"
            );
            Err(failure.into())
        }
    }
}

/// The principal attached by [`require_bearer`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthUser>().cloned().ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!(
                "AuthUser requested on a route without require_bearer"
            ))
        })
    }
}
