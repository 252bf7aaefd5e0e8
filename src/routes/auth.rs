use axum::extract::State;
use axum::Json;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::identity;
use crate::jwt::AuthUser;
use crate::models::user::{AuthResponse, LoginRequest, User, UserProfile};
use crate::utils::verify_password;

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(State(state): State<AppState>, Json(payload): Json<LoginRequest>) -> AppResult<Json<AuthResponse>> {
    let db_user = identity::find_user_by_username(&state.pool, &payload.username)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&payload.password, &db_user.password_hash)? {
        return Err(AppError::unauthorized("invalid credentials"));
    }
    if !db_user.is_active {
        return Err(AppError::unauthorized("account is disabled"));
    }

    let token = state.jwt.encode(db_user.id)?;
    let user: User = db_user.try_into()?;
    tracing::info!(user_id = %user.id, "user logged in");

    Ok(Json(AuthResponse { token, user }))
}

#[utoipa::path(
    get,
    path = "/auth/me",
    tag = "Auth",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Current user with memberships and grants", body = UserProfile),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn me(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<UserProfile>> {
    Ok(Json(identity::profile(&state.pool, auth.user_id).await?))
}
