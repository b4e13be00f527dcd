use crate::state::AppState;
use axum::Router;

pub mod basic;
mod claims;
mod dto;
pub mod extractors;
pub mod guard;
pub mod handlers;
pub mod jwt;
pub mod password;

pub use claims::Claims;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
