use async_trait::async_trait;
use sqlx::PgPool;

use super::repo_types::{NewRecipe, PublishedQuery, Recipe, RecipeListing, Visibility};
use crate::{
    error::StoreError,
    pagination::{Page, PageRequest, SortKey, SortOrder},
};

#[async_trait]
pub trait RecipeStore: Send + Sync {
    async fn find(&self, id: i64) -> Result<Option<Recipe>, StoreError>;
    async fn find_listing(&self, id: i64) -> Result<Option<RecipeListing>, StoreError>;
    /// Published recipes whose name, description or ingredients contain `q`, ignoring case.
    async fn list_published(
        &self,
        query: &PublishedQuery,
        page: PageRequest,
    ) -> Result<Page<RecipeListing>, StoreError>;
    /// A user's recipes, newest first.
    async fn list_by_user(
        &self,
        user_id: i64,
        visibility: Visibility,
        page: PageRequest,
    ) -> Result<Page<RecipeListing>, StoreError>;
    async fn insert(&self, recipe: NewRecipe) -> Result<Recipe, StoreError>;
    async fn update(&self, recipe: &Recipe) -> Result<Recipe, StoreError>;
    async fn delete(&self, id: i64) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgRecipeStore {
    db: PgPool,
}

impl PgRecipeStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

const RECIPE_COLUMNS: &str = "id, name, description, num_of_servings, cook_time, directions, \
     ingredients, is_publish, created_at, updated_at, user_id, cover_image";

const LISTING_SELECT: &str = r#"
    SELECT r.id, r.name, r.description, r.num_of_servings, r.cook_time, r.directions,
           r.ingredients, r.is_publish, r.created_at, r.updated_at, r.user_id, r.cover_image,
           u.username AS author_username, u.avatar_image AS author_avatar_image
      FROM recipe r
      JOIN users u ON u.id = r.user_id
"#;

/// `%`, `_` and `\` in the search text match themselves.
fn like_pattern(q: &str) -> String {
    let mut escaped = String::with_capacity(q.len() + 2);
    escaped.push('%');
    for c in q.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn order_by(sort: SortKey, order: SortOrder) -> String {
    format!(
        "ORDER BY r.{} {dir}, r.id {dir}",
        sort.column(),
        dir = order.keyword()
    )
}

fn visibility_clause(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::Public => "AND r.is_publish = TRUE",
        Visibility::Private => "AND r.is_publish = FALSE",
        Visibility::All => "",
    }
}

#[async_trait]
impl RecipeStore for PgRecipeStore {
    async fn find(&self, id: i64) -> Result<Option<Recipe>, StoreError> {
        let recipe = sqlx::query_as::<_, Recipe>(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipe WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(recipe)
    }

    async fn find_listing(&self, id: i64) -> Result<Option<RecipeListing>, StoreError> {
        let row = sqlx::query_as::<_, RecipeListing>(&format!("{LISTING_SELECT} WHERE r.id = $1"))
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(row)
    }

    async fn list_published(
        &self,
        query: &PublishedQuery,
        page: PageRequest,
    ) -> Result<Page<RecipeListing>, StoreError> {
        let filter = r#"
            WHERE r.is_publish = TRUE
              AND (r.name ILIKE $1 OR r.description ILIKE $1 OR r.ingredients ILIKE $1)
        "#;
        let pattern = like_pattern(&query.q);

        let (total,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM recipe r {filter}"))
                .bind(&pattern)
                .fetch_one(&self.db)
                .await?;

        let rows = sqlx::query_as::<_, RecipeListing>(&format!(
            "{LISTING_SELECT} {filter} {} LIMIT $2 OFFSET $3",
            order_by(query.sort, query.order)
        ))
        .bind(&pattern)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(Page::new(rows, page, total as u64))
    }

    async fn list_by_user(
        &self,
        user_id: i64,
        visibility: Visibility,
        page: PageRequest,
    ) -> Result<Page<RecipeListing>, StoreError> {
        let filter = format!("WHERE r.user_id = $1 {}", visibility_clause(visibility));

        let (total,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM recipe r {filter}"))
                .bind(user_id)
                .fetch_one(&self.db)
                .await?;

        let rows = sqlx::query_as::<_, RecipeListing>(&format!(
            "{LISTING_SELECT} {filter} {} LIMIT $2 OFFSET $3",
            order_by(SortKey::CreatedAt, SortOrder::Desc)
        ))
        .bind(user_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(&self.db)
        .await?;

        Ok(Page::new(rows, page, total as u64))
    }

    async fn insert(&self, recipe: NewRecipe) -> Result<Recipe, StoreError> {
        let f = &recipe.fields;
        let row = sqlx::query_as::<_, Recipe>(&format!(
            r#"
            INSERT INTO recipe (name, description, num_of_servings, cook_time, directions,
                                ingredients, is_publish, created_at, updated_at, user_id)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $7, $8)
            RETURNING {RECIPE_COLUMNS}
            "#
        ))
        .bind(&f.name)
        .bind(&f.description)
        .bind(f.num_of_servings)
        .bind(f.cook_time)
        .bind(&f.directions)
        .bind(&f.ingredients)
        .bind(recipe.created_at)
        .bind(recipe.user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn update(&self, recipe: &Recipe) -> Result<Recipe, StoreError> {
        let row = sqlx::query_as::<_, Recipe>(&format!(
            r#"
            UPDATE recipe
               SET name = $2, description = $3, num_of_servings = $4, cook_time = $5,
                   directions = $6, ingredients = $7, is_publish = $8, cover_image = $9,
                   updated_at = $10
             WHERE id = $1
            RETURNING {RECIPE_COLUMNS}
            "#
        ))
        .bind(recipe.id)
        .bind(&recipe.name)
        .bind(&recipe.description)
        .bind(recipe.num_of_servings)
        .bind(recipe.cook_time)
        .bind(&recipe.directions)
        .bind(&recipe.ingredients)
        .bind(recipe.is_publish)
        .bind(&recipe.cover_image)
        .bind(recipe.updated_at)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM recipe WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
