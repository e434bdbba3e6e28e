use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, Path, State},
    http::{StatusCode, Uri},
    routing::{get, post, put},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};

use super::{
    dto::{AvatarResponse, MessageResponse, RegisterRequest, UserResponse, AVATAR_FOLDER},
    repo_types::{NewUser, User},
};
use crate::{
    auth::{
        jwt::{AuthUser, JwtKeys, MaybeAuthUser},
        password::hash_password,
    },
    cache::CacheKey,
    error::{AppError, AppJson},
    images::services::{replace_image, take_file},
    mail::activation_email,
    rate_limit::Throttle,
    recipes::{
        dto::parse_user_query,
        services::{self as recipe_services, Listing},
    },
    state::AppState,
};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register))
        .route("/users/confirm/:token", get(confirm))
        .route(
            "/users/avatar",
            put(upload_avatar).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/users/:username", get(get_user))
        .route("/users/:username/recipes", get(user_recipes))
        .route("/me", get(me))
}

async fn find_by_username(state: &AppState, username: &str) -> Result<User, AppError> {
    state
        .users
        .find_by_username(username)
        .await?
        .ok_or_else(|| AppError::not_found("User"))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let reg = payload.validate()?;

    if state.users.find_by_username(&reg.username).await?.is_some() {
        warn!(username = %reg.username, "username already registered");
        return Err(AppError::AlreadyExists("username already in use".into()));
    }
    if state.users.find_by_email(&reg.email).await?.is_some() {
        warn!(email = %reg.email, "email already registered");
        return Err(AppError::AlreadyExists("email already in use".into()));
    }

    let password_hash = hash_password(&reg.password)?;
    let user = state
        .users
        .insert(NewUser {
            username: reg.username,
            email: reg.email,
            password_hash,
            created_at: OffsetDateTime::now_utc(),
        })
        .await?;

    let token = JwtKeys::from_ref(&state).sign_activation(&user.email)?;
    let link = format!("{}/users/confirm/{}", state.config.public_url, token);
    if let Err(e) = state.mailer.send(activation_email(&user.email, &link)).await {
        error!(error = %e, user_id = user.id, "activation mail failed");
    }

    info!(user_id = user.id, username = %user.username, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(UserResponse::private(user, state.storage.as_ref())),
    ))
}

#[instrument(skip(state, token))]
pub async fn confirm(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    let email = JwtKeys::from_ref(&state)
        .verify_activation(&token)
        .map_err(|_| AppError::BadRequest("Invalid token or token expired".into()))?;

    let user = state
        .users
        .find_by_email(&email)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    if user.is_active {
        return Err(AppError::BadRequest("User account is already activated".into()));
    }

    state.users.activate(user.id, OffsetDateTime::now_utc()).await?;
    info!(user_id = user.id, "user activated");
    Ok(Json(MessageResponse {
        message: "User activated",
    }))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    MaybeAuthUser(requester): MaybeAuthUser,
    Path(username): Path<String>,
) -> Result<Json<UserResponse>, AppError> {
    let user = find_by_username(&state, &username).await?;
    let storage = state.storage.as_ref();
    let body = if requester == Some(user.id) {
        UserResponse::private(user, storage)
    } else {
        UserResponse::public(user, storage)
    };
    Ok(Json(body))
}

#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    Ok(Json(UserResponse::private(user, state.storage.as_ref())))
}

/// GET /users/:username/recipes?page=&per_page=&visibility=
#[instrument(skip(state, _throttle))]
pub async fn user_recipes(
    _throttle: Throttle,
    MaybeAuthUser(requester): MaybeAuthUser,
    State(state): State<AppState>,
    Path(username): Path<String>,
    uri: Uri,
) -> Result<Listing, AppError> {
    let key = CacheKey::from_request(uri.path(), uri.query());
    let (visibility, req) = parse_user_query(key.params())?;
    let owner = find_by_username(&state, &username).await?;
    recipe_services::list_by_user(&state, key, &owner, visibility, requester, req).await
}

/// PUT /users/avatar (multipart, field `avatar`)
#[instrument(skip(state, mp))]
pub async fn upload_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Multipart,
) -> Result<Json<AvatarResponse>, AppError> {
    let upload = take_file(mp, "avatar").await?;
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;

    let filename = replace_image(
        state.storage.as_ref(),
        AVATAR_FOLDER,
        user.avatar_image.as_deref(),
        upload,
    )
    .await?;
    let user = state
        .users
        .set_avatar(user.id, Some(&filename), OffsetDateTime::now_utc())
        .await?;

    // recipe listings embed the author's avatar
    recipe_services::invalidate_listings(&state);

    Ok(Json(AvatarResponse {
        avatar_url: super::dto::avatar_url(user.avatar_image.as_deref(), state.storage.as_ref()),
    }))
}
