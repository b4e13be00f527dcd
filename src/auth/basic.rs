use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::{config::BasicAuthConfig, error::AppError, state::AppState};

/// Checks `Authorization: Basic <base64(user:pass)>` against the operator
/// credentials. The error is a failure category for the audit log.
pub fn check_basic(headers: &HeaderMap, expected: &BasicAuthConfig) -> Result<(), &'static str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or("missing_header")?
        .to_str()
        .map_err(|_| "malformed_header")?;

    let encoded = match value.split(' ').collect::<Vec<_>>().as_slice() {
        ["Basic", encoded] => *encoded,
        _ => return Err("malformed_header"),
    };

    let decoded = STANDARD.decode(encoded).map_err(|_| "malformed_credentials")?;
    let decoded = String::from_utf8(decoded).map_err(|_| "malformed_credentials")?;
    let (user, pass) = decoded.split_once(':').ok_or("malformed_credentials")?;

    // Both halves are compared in full so timing does not reveal which one differs.
    let user_ok = user.as_bytes().ct_eq(expected.user.as_bytes());
    let pass_ok = pass.as_bytes().ct_eq(expected.pass.as_bytes());
    if bool::from(user_ok & pass_ok) {
        Ok(())
    } else {
        Err("invalid_credentials")
    }
}

/// Route layer for operator endpoints.
pub async fn require_basic(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Err(category) = check_basic(req.headers(), &state.config.basic_auth) {
        warn!(
            method = %req.method(),
            path = %req.uri().path(),
            category,
            "basic authentication failed"
        );
        return Err(AppError::BasicUnauthorized);
    }
    Ok(next.run(req).await)
}
