use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::{
    dto::{CreatePostRequest, UpdatePostRequest},
    repo_types::{NewPost, Post},
};
use crate::{
    auth::{
        extractors::{require_bearer, AuthUser},
        guard::{require_owner_or_role, ADMIN, MODERATOR},
    },
    error::{AppError, StoreError},
    state::AppState,
};

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/posts", post(create_post))
        .route(
            "/posts/:id",
            get(get_post).patch(update_post).delete(delete_post),
        )
        .route_layer(middleware::from_fn_with_state(state, require_bearer))
}

/// Loads the post a request targets; the owner id feeds the guard.
async fn load_post(state: &AppState, id: i64) -> Result<Post, AppError> {
    state.posts.get_by_id(id).await.map_err(|e| match e {
        StoreError::NotFound => AppError::NotFound("post not found"),
        other => other.into(),
    })
}

#[instrument(skip_all, fields(actor_id = actor.id))]
pub async fn create_post(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    payload: Result<Json<CreatePostRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Post>), AppError> {
    let Json(payload) = payload?;
    payload.validate()?;
    let post = state
        .posts
        .create(NewPost {
            title: payload.title,
            content: payload.content,
            user_id: actor.id,
        })
        .await?;
    info!(post_id = post.id, "post created");
    Ok((StatusCode::CREATED, Json(post)))
}

#[instrument(skip_all, fields(post_id = id))]
pub async fn get_post(
    State(state): State<AppState>,
    AuthUser(_actor): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<Post>, AppError> {
    Ok(Json(load_post(&state, id).await?))
}

#[instrument(skip_all, fields(actor_id = actor.id, post_id = id))]
pub async fn update_post(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<i64>,
    payload: Result<Json<UpdatePostRequest>, JsonRejection>,
) -> Result<Json<Post>, AppError> {
    let Json(payload) = payload?;
    let (version, patch) = payload.into_patch()?;
    let post = load_post(&state, id).await?;
    require_owner_or_role(state.roles.as_ref(), &actor, post.user_id, MODERATOR).await?;

    match state.posts.update(post.id, version, patch).await {
        Ok(updated) => {
            info!(version = updated.version, "post updated");
            Ok(Json(updated))
        }
        Err(StoreError::VersionConflict) => {
            warn!(expected = version, "stale post version");
            Err(AppError::Conflict(
                "post was modified by another request; reload and retry".into(),
            ))
        }
        Err(StoreError::NotFound) => Err(AppError::NotFound("post not found")),
        Err(e) => Err(e.into()),
    }
}

#[instrument(skip_all, fields(actor_id = actor.id, post_id = id))]
pub async fn delete_post(
    State(state): State<AppState>,
    AuthUser(actor): AuthUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let post = load_post(&state, id).await?;
    require_owner_or_role(state.roles.as_ref(), &actor, post.user_id, ADMIN).await?;
    state.posts.delete(post.id).await?;
    info!("post deleted");
    Ok(StatusCode::NO_CONTENT)
}
