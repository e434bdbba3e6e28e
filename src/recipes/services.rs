use std::{future::Future, time::Duration};

use axum::{
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{debug, info};

use super::{
    dto::{RecipePage, RecipePayload, RecipeResponse, COVER_FOLDER},
    repo_types::{NewRecipe, PublishedQuery, Recipe, RecipeListing, Visibility},
};
use crate::{
    cache::CacheKey,
    error::AppError,
    images::services::{remove_image, replace_image, UploadItem},
    pagination::{Page, PageLinks, PageRequest},
    state::AppState,
    users::repo_types::User,
};

/// Cache prefix dropped after any write that can change a recipe listing.
pub const RECIPES_PREFIX: &str = "/recipes";

/// Serialized listing page, either fresh or replayed from the result cache.
pub struct Listing {
    pub body: Bytes,
    pub hit: bool,
}

impl IntoResponse for Listing {
    fn into_response(self) -> Response {
        let cache_status = if self.hit { "HIT" } else { "MISS" };
        (
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
                (
                    header::HeaderName::from_static("x-cache"),
                    HeaderValue::from_static(cache_status),
                ),
            ],
            self.body,
        )
            .into_response()
    }
}

async fn cached_listing<F>(state: &AppState, key: CacheKey, compute: F) -> Result<Listing, AppError>
where
    F: Future<Output = Result<Page<RecipeListing>, AppError>>,
{
    if let Some(body) = state.cache.get(&key) {
        debug!(key = %key, "listing cache hit");
        return Ok(Listing { body, hit: true });
    }

    let ticket = state.cache.ticket();
    let page = compute.await?;

    let base_url = format!("{}{}", state.config.public_url, key.path());
    let links = PageLinks::build(&base_url, key.params(), &page);
    let page = page.map(|l| RecipeResponse::from_listing(l, state.storage.as_ref()));
    let payload = RecipePage {
        links,
        page: page.page,
        pages: page.pages,
        per_page: page.per_page,
        total: page.total,
        data: page.items,
    };
    let body = Bytes::from(serde_json::to_vec(&payload).map_err(anyhow::Error::from)?);

    let ttl = Duration::from_secs(state.config.cache_ttl_seconds);
    debug!(key = %key, "listing cache miss");
    state.cache.put_if_current(ticket, key, body.clone(), ttl);
    Ok(Listing { body, hit: false })
}

/// Published recipes matching `query`, served from the result cache when possible.
pub async fn list_published(
    state: &AppState,
    key: CacheKey,
    query: PublishedQuery,
    req: PageRequest,
) -> Result<Listing, AppError> {
    cached_listing(state, key, async {
        Ok(state.recipes.list_published(&query, req).await?)
    })
    .await
}

/// `owner`'s recipes; anything but published ones is reserved for the owner.
pub async fn list_by_user(
    state: &AppState,
    key: CacheKey,
    owner: &User,
    requested: Visibility,
    requester: Option<i64>,
    req: PageRequest,
) -> Result<Listing, AppError> {
    let visibility = requested.effective(owner.id, requester);
    // keyed by what is served, so an owner's private page never answers someone else
    let key = key.with_param("visibility", visibility.as_str());
    cached_listing(state, key, async {
        Ok(state.recipes.list_by_user(owner.id, visibility, req).await?)
    })
    .await
}

pub fn invalidate_listings(state: &AppState) {
    state.cache.invalidate_prefix(RECIPES_PREFIX);
}

/// Existence is checked before ownership.
pub async fn load_owned(state: &AppState, id: i64, actor: i64) -> Result<Recipe, AppError> {
    let recipe = state
        .recipes
        .find(id)
        .await?
        .ok_or_else(|| AppError::not_found("Recipe"))?;
    if recipe.user_id != actor {
        return Err(AppError::access_denied());
    }
    Ok(recipe)
}

/// Readable by anyone once published, otherwise only by the owner.
pub async fn load_visible(
    state: &AppState,
    id: i64,
    requester: Option<i64>,
) -> Result<RecipeListing, AppError> {
    let listing = state
        .recipes
        .find_listing(id)
        .await?
        .ok_or_else(|| AppError::not_found("Recipe"))?;
    if !listing.recipe.is_publish && requester != Some(listing.recipe.user_id) {
        return Err(AppError::access_denied());
    }
    Ok(listing)
}

async fn reload(state: &AppState, id: i64) -> Result<RecipeResponse, AppError> {
    let listing = state
        .recipes
        .find_listing(id)
        .await?
        .ok_or_else(|| AppError::not_found("Recipe"))?;
    Ok(RecipeResponse::from_listing(listing, state.storage.as_ref()))
}

pub async fn create_recipe(
    state: &AppState,
    actor: i64,
    payload: RecipePayload,
) -> Result<RecipeResponse, AppError> {
    payload.validate(false)?;
    let recipe = state
        .recipes
        .insert(NewRecipe {
            user_id: actor,
            fields: payload.into_fields(),
            created_at: OffsetDateTime::now_utc(),
        })
        .await?;
    invalidate_listings(state);
    info!(recipe_id = recipe.id, user_id = actor, "recipe created");
    reload(state, recipe.id).await
}

/// `partial` selects PATCH semantics, otherwise every editable field is replaced.
pub async fn update_recipe(
    state: &AppState,
    id: i64,
    actor: i64,
    payload: RecipePayload,
    partial: bool,
) -> Result<RecipeResponse, AppError> {
    let mut recipe = load_owned(state, id, actor).await?;
    payload.validate(partial)?;
    if partial {
        payload.apply_partial(&mut recipe);
    } else {
        recipe.replace_fields(payload.into_fields());
    }
    recipe.updated_at = OffsetDateTime::now_utc();
    state.recipes.update(&recipe).await?;
    invalidate_listings(state);
    info!(recipe_id = id, user_id = actor, partial, "recipe updated");
    reload(state, id).await
}

pub async fn set_published(state: &AppState, id: i64, actor: i64, publish: bool) -> Result<(), AppError> {
    let mut recipe = load_owned(state, id, actor).await?;
    recipe.is_publish = publish;
    recipe.updated_at = OffsetDateTime::now_utc();
    state.recipes.update(&recipe).await?;
    invalidate_listings(state);
    info!(recipe_id = id, publish, "recipe visibility changed");
    Ok(())
}

pub async fn delete_recipe(state: &AppState, id: i64, actor: i64) -> Result<(), AppError> {
    let recipe = load_owned(state, id, actor).await?;
    state.recipes.delete(id).await?;
    invalidate_listings(state);
    if let Some(cover) = recipe.cover_image.as_deref() {
        remove_image(state.storage.as_ref(), COVER_FOLDER, cover).await;
    }
    info!(recipe_id = id, user_id = actor, "recipe deleted");
    Ok(())
}

pub async fn replace_cover(
    state: &AppState,
    id: i64,
    actor: i64,
    upload: Option<UploadItem>,
) -> Result<String, AppError> {
    let mut recipe = load_owned(state, id, actor).await?;
    let filename = replace_image(
        state.storage.as_ref(),
        COVER_FOLDER,
        recipe.cover_image.as_deref(),
        upload,
    )
    .await?;
    recipe.cover_image = Some(filename);
    recipe.updated_at = OffsetDateTime::now_utc();
    let recipe = state.recipes.update(&recipe).await?;
    invalidate_listings(state);
    Ok(super::dto::cover_url(recipe.cover_image.as_deref(), state.storage.as_ref()))
}
