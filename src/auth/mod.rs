use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod dto;
pub mod email;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod services;
pub mod validation;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::auth_routes())
}
