use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{info, instrument};

use super::dto::{PublicUser, RegisterRequest, RegisterResponse};
use crate::{
    auth::{
        extractors::{require_bearer, AuthUser},
        guard::{require_owner_or_role, ADMIN},
    },
    error::AppError,
    state::AppState,
};

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/authentication/user", post(register))
        .route("/users/activate/:token", put(activate))
}

pub fn protected_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/users/:id", get(get_user).delete(delete_user))
        .route_layer(middleware::from_fn_with_state(state, require_bearer))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let Json(payload) = payload?;
    let registration = payload.validate()?;
    let registered = state.accounts.register(registration).await?;

    let token = state
        .config
        .mail
        .expose_invitation_token
        .then_some(registered.invitation_token);
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: registered.user.into(),
            token,
        }),
    ))
}

#[instrument(skip_all)]
pub async fn activate(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<StatusCode, AppError> {
    state.accounts.activate(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all, fields(user_id = id))]
pub async fn get_user(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<PublicUser>, AppError> {
    let user = state.users.get_by_id(id).await?;
    Ok(Json(user.into()))
}

#[instrument(skip_all, fields(actor_id = actor.id, user_id = id))]
pub async fn delete_user(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let target = state.users.get_by_id(id).await?;
    require_owner_or_role(state.roles.as_ref(), &actor, target.id, ADMIN).await?;
    state.accounts.delete(target.id).await?;
    info!(user_id = target.id, "account removed");
    Ok(StatusCode::NO_CONTENT)
}
