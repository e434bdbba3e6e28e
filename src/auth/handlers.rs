use axum::{
    extract::{FromRef, State},
    routing::post,
    Json, Router,
};
use tracing::{info, instrument, warn};

use super::{
    dto::{AccessTokenResponse, LoginRequest, RefreshRequest, TokenResponse},
    jwt::JwtKeys,
    password::verify_password,
};
use crate::{
    error::{AppError, AppJson},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/token", post(login))
        .route("/refresh", post(refresh))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(mut payload): AppJson<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    payload.email = payload.email.trim().to_lowercase();

    let invalid = || AppError::Unauthenticated("email or password is incorrect".into());
    let Some(user) = state.users.find_by_email(&payload.email).await? else {
        warn!(email = %payload.email, "login unknown email");
        return Err(invalid());
    };
    if !verify_password(&payload.password, &user.password_hash)? {
        warn!(user_id = user.id, "login invalid password");
        return Err(invalid());
    }
    if !user.is_active {
        return Err(AppError::AccessDenied(
            "The user account is not activated yet".into(),
        ));
    }

    let keys = JwtKeys::from_ref(&state);
    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;

    info!(user_id = user.id, "user logged in");
    Ok(Json(TokenResponse {
        access_token,
        refresh_token,
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RefreshRequest>,
) -> Result<Json<AccessTokenResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let user_id = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| AppError::Unauthenticated(e.to_string()))?;

    if state.users.find_by_id(user_id).await?.is_none() {
        return Err(AppError::Unauthenticated("User not found".into()));
    }

    let access_token = keys.sign_access(user_id)?;
    Ok(Json(AccessTokenResponse { access_token }))
}
