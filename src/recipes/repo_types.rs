use sqlx::FromRow;
use time::OffsetDateTime;

use crate::pagination::{SortKey, SortOrder};

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Recipe {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub num_of_servings: Option<i32>,
    pub cook_time: Option<i32>, // minutes
    pub directions: Option<String>,
    pub ingredients: Option<String>,
    pub is_publish: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub user_id: i64,
    pub cover_image: Option<String>,
}

/// Recipe joined with the author columns that listings embed.
#[derive(Debug, Clone, FromRow)]
pub struct RecipeListing {
    #[sqlx(flatten)]
    pub recipe: Recipe,
    pub author_username: String,
    pub author_avatar_image: Option<String>,
}

/// Owner-editable recipe fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipeFields {
    pub name: String,
    pub description: Option<String>,
    pub num_of_servings: Option<i32>,
    pub cook_time: Option<i32>,
    pub directions: Option<String>,
    pub ingredients: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub user_id: i64,
    pub fields: RecipeFields,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct PublishedQuery {
    pub q: String,
    pub sort: SortKey,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
    All,
}

impl Visibility {
    /// Unknown values are treated as `public`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "private" => Visibility::Private,
            "all" => Visibility::All,
            _ => Visibility::Public,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::All => "all",
        }
    }

    /// Only the owner may look at unpublished recipes.
    pub fn effective(self, owner_id: i64, requester: Option<i64>) -> Self {
        if requester == Some(owner_id) {
            self
        } else {
            Visibility::Public
        }
    }
}
