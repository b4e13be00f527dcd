use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use super::{
    dto::{LoginRequest, TokenResponse},
    password::verify_password_blocking,
};
use crate::{
    error::{AppError, StoreError},
    state::AppState,
    users::dto::is_valid_email,
};

const INVALID_CREDENTIALS: &str = "invalid credentials";

pub fn auth_routes() -> Router<AppState> {
    Router::new().route("/authentication/token", post(login))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AppError> {
    let Json(mut payload) = payload?;
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) || payload.password.is_empty() {
        return Err(AppError::Validation("email and password are required".into()));
    }

    let user = match state.users.get_by_email(&payload.email).await {
        Ok(u) => u,
        Err(StoreError::NotFound) => {
            warn!(category = "unknown_email", "login failed");
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS));
        }
        Err(e) => return Err(e.into()),
    };

    let ok = verify_password_blocking(payload.password, user.password_hash.clone())
        .await
        .map_err(AppError::Internal)?;
    if !ok {
        warn!(user_id = user.id, category = "wrong_password", "login failed");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS));
    }
    if !user.is_active {
        warn!(user_id = user.id, category = "inactive_account", "login failed");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS));
    }

    let token = state.jwt.sign(user.id).map_err(|e| {
        error!(error = %e, "jwt sign failed");
        AppError::Internal(e.into())
    })?;

    info!(user_id = user.id, "user logged in");
    Ok(Json(TokenResponse {
        token,
        user: user.into(),
    }))
}
