use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{ProfileResponse, RegisterRequest},
        extractors::{AuthUser, JsonBody},
        services,
    },
    error::AppResult,
    state::AppState,
    users::repo_types::PublicUser,
};

pub fn users_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/profile", get(profile))
}

#[instrument(skip(state, _auth))]
pub async fn list_users(
    State(state): State<AppState>,
    _auth: AuthUser,
) -> AppResult<Json<Vec<PublicUser>>> {
    Ok(Json(services::list_users(&state).await?))
}

/// Same pipeline as `/auth/register`, answering with the created user.
#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> AppResult<(StatusCode, Json<PublicUser>)> {
    let user = services::create_account(&state, &payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[instrument(skip(state), fields(user_id = auth.id))]
pub async fn profile(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<ProfileResponse>> {
    let user = services::profile(&state, &auth).await?;
    Ok(Json(ProfileResponse {
        message: "user profile found".into(),
        user,
    }))
}
