use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::repo_types::{PublishedQuery, Recipe, RecipeFields, RecipeListing, Visibility};
use crate::{
    error::{AppError, FieldErrors},
    pagination::{PageLinks, PageRequest, SortKey, SortOrder},
    storage::StorageClient,
    users::dto::avatar_url,
};

pub const COVER_FOLDER: &str = "covers";
const DEFAULT_COVER: &str = "assets/default-cover.jpg";

const NAME_MAX: usize = 100;
const DESCRIPTION_MAX: usize = 200;
const DIRECTIONS_MAX: usize = 1000;
const INGREDIENTS_MAX: usize = 1000;

/// Body of `POST`, `PUT` and `PATCH` on recipes.
#[derive(Debug, Default, Deserialize)]
pub struct RecipePayload {
    pub name: Option<String>,
    pub description: Option<String>,
    pub num_of_servings: Option<i64>,
    pub cook_time: Option<i64>,
    pub directions: Option<String>,
    pub ingredients: Option<String>,
}

fn check_len(errors: &mut FieldErrors, field: &str, value: Option<&str>, max: usize) {
    if value.is_some_and(|v| v.chars().count() > max) {
        errors.add(field, format!("Longer than maximum length {max}."));
    }
}

impl RecipePayload {
    /// With `partial`, a missing name is accepted.
    pub fn validate(&self, partial: bool) -> Result<(), AppError> {
        let mut errors = FieldErrors::default();

        match self.name.as_deref() {
            None if !partial => errors.add("name", "Missing data for required field."),
            Some(name) if name.trim().is_empty() => errors.add("name", "Name must not be empty."),
            _ => {}
        }
        check_len(&mut errors, "name", self.name.as_deref(), NAME_MAX);
        check_len(&mut errors, "description", self.description.as_deref(), DESCRIPTION_MAX);
        check_len(&mut errors, "directions", self.directions.as_deref(), DIRECTIONS_MAX);
        check_len(&mut errors, "ingredients", self.ingredients.as_deref(), INGREDIENTS_MAX);

        if let Some(n) = self.num_of_servings {
            if n < 1 {
                errors.add("num_of_servings", "Number of servings must be greater than 0");
            } else if n > 50 {
                errors.add("num_of_servings", "Number of servings must not be greater than 50");
            }
        }
        if let Some(t) = self.cook_time {
            if t < 1 {
                errors.add("cook_time", "Cook time must be greater than 0");
            } else if t > 300 {
                errors.add("cook_time", "Cook time must not be greater than 300");
            }
        }

        errors.into_result()
    }

    /// Full field set; call after `validate(false)`.
    pub fn into_fields(self) -> RecipeFields {
        RecipeFields {
            name: self.name.unwrap_or_default(),
            description: self.description,
            num_of_servings: self.num_of_servings.map(|n| n as i32),
            cook_time: self.cook_time.map(|t| t as i32),
            directions: self.directions,
            ingredients: self.ingredients,
        }
    }

    /// Overwrites only the supplied fields; call after `validate(true)`.
    pub fn apply_partial(self, recipe: &mut Recipe) {
        if let Some(name) = self.name {
            recipe.name = name;
        }
        if self.description.is_some() {
            recipe.description = self.description;
        }
        if let Some(n) = self.num_of_servings {
            recipe.num_of_servings = Some(n as i32);
        }
        if let Some(t) = self.cook_time {
            recipe.cook_time = Some(t as i32);
        }
        if self.directions.is_some() {
            recipe.directions = self.directions;
        }
        if self.ingredients.is_some() {
            recipe.ingredients = self.ingredients;
        }
    }
}

impl Recipe {
    pub fn replace_fields(&mut self, fields: RecipeFields) {
        self.name = fields.name;
        self.description = fields.description;
        self.num_of_servings = fields.num_of_servings;
        self.cook_time = fields.cook_time;
        self.directions = fields.directions;
        self.ingredients = fields.ingredients;
    }
}

#[derive(Debug, Serialize)]
pub struct AuthorResponse {
    pub id: i64,
    pub username: String,
    pub avatar_url: String,
}

#[derive(Debug, Serialize)]
pub struct RecipeResponse {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub num_of_servings: Option<i32>,
    pub cook_time: Option<i32>,
    pub directions: Option<String>,
    pub ingredients: Option<String>,
    pub is_publish: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub author: AuthorResponse,
    pub cover_url: String,
}

impl RecipeResponse {
    pub fn from_listing(listing: RecipeListing, storage: &dyn StorageClient) -> Self {
        let RecipeListing {
            recipe: r,
            author_username,
            author_avatar_image,
        } = listing;
        Self {
            cover_url: cover_url(r.cover_image.as_deref(), storage),
            author: AuthorResponse {
                id: r.user_id,
                username: author_username,
                avatar_url: avatar_url(author_avatar_image.as_deref(), storage),
            },
            id: r.id,
            name: r.name,
            description: r.description,
            num_of_servings: r.num_of_servings,
            cook_time: r.cook_time,
            directions: r.directions,
            ingredients: r.ingredients,
            is_publish: r.is_publish,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CoverResponse {
    pub cover_url: String,
}

pub fn cover_url(cover_image: Option<&str>, storage: &dyn StorageClient) -> String {
    match cover_image {
        Some(name) => storage.public_url(&format!("{COVER_FOLDER}/{name}")),
        None => storage.public_url(DEFAULT_COVER),
    }
}

/// Serialized body of both paginated listings.
#[derive(Debug, Serialize)]
pub struct RecipePage {
    pub links: PageLinks,
    pub page: u32,
    pub pages: u32,
    pub per_page: u32,
    pub total: u64,
    pub data: Vec<RecipeResponse>,
}

fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

fn parse_int(errors: &mut FieldErrors, raw: Option<&str>, field: &str, default: i64) -> i64 {
    match raw {
        None => default,
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            errors.add(field, "Not a valid integer.");
            default
        }),
    }
}

fn page_request(errors: &mut FieldErrors, params: &[(String, String)]) -> Option<PageRequest> {
    let page = parse_int(errors, param(params, "page"), "page", 1);
    let per_page = parse_int(
        errors,
        param(params, "per_page"),
        "per_page",
        PageRequest::DEFAULT_PER_PAGE,
    );
    match PageRequest::new(page, per_page) {
        Ok(req) => Some(req),
        Err(e) => {
            let field = match e {
                crate::pagination::PaginationError::InvalidPage => "page",
                crate::pagination::PaginationError::InvalidPerPage => "per_page",
            };
            errors.add(field, e.to_string());
            None
        }
    }
}

/// `q`, `page`, `per_page`, `sort`, `order` of `GET /recipes`.
pub fn parse_published_query(
    params: &[(String, String)],
) -> Result<(PublishedQuery, PageRequest), AppError> {
    let mut errors = FieldErrors::default();
    let req = page_request(&mut errors, params);
    let query = PublishedQuery {
        q: param(params, "q").unwrap_or_default().to_string(),
        sort: param(params, "sort").map(SortKey::parse).unwrap_or_default(),
        order: param(params, "order").map(SortOrder::parse).unwrap_or_default(),
    };
    match req {
        Some(req) if errors.is_empty() => Ok((query, req)),
        _ => Err(AppError::Validation(errors)),
    }
}

/// `page`, `per_page`, `visibility` of `GET /users/<username>/recipes`.
pub fn parse_user_query(params: &[(String, String)]) -> Result<(Visibility, PageRequest), AppError> {
    let mut errors = FieldErrors::default();
    let req = page_request(&mut errors, params);
    let visibility = param(params, "visibility")
        .map(Visibility::parse)
        .unwrap_or(Visibility::Public);
    match req {
        Some(req) if errors.is_empty() => Ok((visibility, req)),
        _ => Err(AppError::Validation(errors)),
    }
}
