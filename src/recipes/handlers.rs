use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, Uri},
    routing::{get, put},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{parse_published_query, CoverResponse, RecipePayload, RecipeResponse},
    services::{self, Listing},
};
use crate::{
    auth::jwt::{AuthUser, MaybeAuthUser},
    cache::CacheKey,
    error::{AppError, AppJson},
    images::services::take_file,
    rate_limit::Throttle,
    state::AppState,
    users::dto::MessageResponse,
};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/recipes/:id",
            get(get_recipe)
                .put(put_recipe)
                .patch(patch_recipe)
                .delete(delete_recipe),
        )
        .route("/recipes/:id/publish", put(publish).delete(unpublish))
        .route(
            "/recipes/:id/cover",
            put(upload_cover).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
}

/// GET /recipes?q=&page=&per_page=&sort=&order=
#[instrument(skip(state, _throttle))]
pub async fn list_recipes(
    _throttle: Throttle,
    State(state): State<AppState>,
    uri: Uri,
) -> Result<Listing, AppError> {
    let key = CacheKey::from_request(uri.path(), uri.query());
    let (query, req) = parse_published_query(key.params())?;
    services::list_published(&state, key, query, req).await
}

#[instrument(skip(state, payload))]
pub async fn create_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    AppJson(payload): AppJson<RecipePayload>,
) -> Result<(StatusCode, Json<RecipeResponse>), AppError> {
    let recipe = services::create_recipe(&state, user_id, payload).await?;
    Ok((StatusCode::CREATED, Json(recipe)))
}

#[instrument(skip(state))]
pub async fn get_recipe(
    State(state): State<AppState>,
    MaybeAuthUser(requester): MaybeAuthUser,
    Path(id): Path<i64>,
) -> Result<Json<RecipeResponse>, AppError> {
    let listing = services::load_visible(&state, id, requester).await?;
    Ok(Json(RecipeResponse::from_listing(listing, state.storage.as_ref())))
}

#[instrument(skip(state, payload))]
pub async fn put_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    AppJson(payload): AppJson<RecipePayload>,
) -> Result<Json<RecipeResponse>, AppError> {
    let recipe = services::update_recipe(&state, id, user_id, payload, false).await?;
    Ok(Json(recipe))
}

#[instrument(skip(state, payload))]
pub async fn patch_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    AppJson(payload): AppJson<RecipePayload>,
) -> Result<Json<RecipeResponse>, AppError> {
    let recipe = services::update_recipe(&state, id, user_id, payload, true).await?;
    Ok(Json(recipe))
}

#[instrument(skip(state))]
pub async fn delete_recipe(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    services::delete_recipe(&state, id, user_id).await?;
    Ok(Json(MessageResponse {
        message: "recipe deleted",
    }))
}

#[instrument(skip(state))]
pub async fn publish(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    services::set_published(&state, id, user_id, true).await?;
    Ok(Json(MessageResponse {
        message: "recipe published",
    }))
}

#[instrument(skip(state))]
pub async fn unpublish(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    services::set_published(&state, id, user_id, false).await?;
    Ok(Json(MessageResponse {
        message: "recipe unpublished",
    }))
}

/// PUT /recipes/:id/cover (multipart, field `cover`)
#[instrument(skip(state, mp))]
pub async fn upload_cover(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<i64>,
    mp: Multipart,
) -> Result<Json<CoverResponse>, AppError> {
    let upload = take_file(mp, "cover").await?;
    let cover_url = services::replace_cover(&state, id, user_id, upload).await?;
    Ok(Json(CoverResponse { cover_url }))
}
