//! In-memory stores and an HTTP harness for handler tests.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::Value;
use time::OffsetDateTime;
use tower::ServiceExt;

use crate::{
    app::build_app,
    auth::jwt::JwtKeys,
    cache::{tests::ManualClock, ResultCache},
    config::{AppConfig, JwtConfig, RateLimitConfig, StorageConfig},
    error::StoreError,
    mail::tests::RecordingMailer,
    pagination::{Page, PageRequest, SortKey, SortOrder},
    recipes::{
        repo::RecipeStore,
        repo_types::{NewRecipe, PublishedQuery, Recipe, RecipeFields, RecipeListing, Visibility},
    },
    state::AppState,
    storage::tests::MemoryStorage,
    users::{
        repo::UserStore,
        repo_types::{NewUser, User},
    },
};

fn epoch() -> OffsetDateTime {
    time::macros::datetime!(2024-01-01 00:00 UTC)
}

fn missing_row() -> StoreError {
    StoreError::Unavailable(sqlx::Error::RowNotFound)
}

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    recipes: Vec<Recipe>,
    next_user: i64,
    next_recipe: i64,
}

/// Implements both store traits over plain vectors.
#[derive(Default)]
pub(crate) struct MemoryStore {
    tables: Mutex<Tables>,
    listing_calls: AtomicUsize,
}

impl MemoryStore {
    /// Number of listing queries that reached the store.
    pub(crate) fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn add_user(&self, username: &str, active: bool) -> User {
        let mut t = self.tables.lock();
        t.next_user += 1;
        let user = User {
            id: t.next_user,
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: "unused".into(),
            is_active: active,
            avatar_image: None,
            created_at: epoch(),
            updated_at: epoch(),
        };
        t.users.push(user.clone());
        user
    }

    /// Each recipe is created one minute after the previous one.
    pub(crate) fn add_recipe(&self, owner: i64, name: &str, published: bool) -> Recipe {
        let mut t = self.tables.lock();
        t.next_recipe += 1;
        let at = epoch() + Duration::from_secs(60 * t.next_recipe as u64);
        let recipe = Recipe {
            id: t.next_recipe,
            name: name.to_string(),
            description: None,
            num_of_servings: Some(2),
            cook_time: Some(10 + t.next_recipe as i32),
            directions: None,
            ingredients: None,
            is_publish: published,
            created_at: at,
            updated_at: at,
            user_id: owner,
            cover_image: None,
        };
        t.recipes.push(recipe.clone());
        recipe
    }

    pub(crate) fn recipe(&self, id: i64) -> Option<Recipe> {
        self.tables.lock().recipes.iter().find(|r| r.id == id).cloned()
    }

    pub(crate) fn user(&self, id: i64) -> Option<User> {
        self.tables.lock().users.iter().find(|u| u.id == id).cloned()
    }
}

fn listing(t: &Tables, recipe: &Recipe) -> Option<RecipeListing> {
    let author = t.users.iter().find(|u| u.id == recipe.user_id)?;
    Some(RecipeListing {
        recipe: recipe.clone(),
        author_username: author.username.clone(),
        author_avatar_image: author.avatar_image.clone(),
    })
}

fn sort_listings(rows: &mut [RecipeListing], sort: SortKey, order: SortOrder) {
    rows.sort_by(|a, b| {
        let (a, b) = (&a.recipe, &b.recipe);
        let ord = match sort {
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::CookTime => a.cook_time.cmp(&b.cook_time),
            SortKey::NumOfServings => a.num_of_servings.cmp(&b.num_of_servings),
        }
        .then(a.id.cmp(&b.id));
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
}

fn contains_ignore_case(field: Option<&str>, needle: &str) -> bool {
    field.is_some_and(|f| f.to_lowercase().contains(needle))
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.user(id))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().users.iter().find(|u| u.email == email).cloned())
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut t = self.tables.lock();
        if t.users.iter().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate("username".into()));
        }
        if t.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate("email".into()));
        }
        t.next_user += 1;
        let user = User {
            id: t.next_user,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            is_active: false,
            avatar_image: None,
            created_at: user.created_at,
            updated_at: user.created_at,
        };
        t.users.push(user.clone());
        Ok(user)
    }

    async fn activate(&self, id: i64, at: OffsetDateTime) -> Result<(), StoreError> {
        let mut t = self.tables.lock();
        let user = t.users.iter_mut().find(|u| u.id == id).ok_or_else(missing_row)?;
        user.is_active = true;
        user.updated_at = at;
        Ok(())
    }

    async fn set_avatar(&self, id: i64, avatar: Option<&str>, at: OffsetDateTime) -> Result<User, StoreError> {
        let mut t = self.tables.lock();
        let user = t.users.iter_mut().find(|u| u.id == id).ok_or_else(missing_row)?;
        user.avatar_image = avatar.map(str::to_string);
        user.updated_at = at;
        Ok(user.clone())
    }
}

#[async_trait]
impl RecipeStore for MemoryStore {
    async fn find(&self, id: i64) -> Result<Option<Recipe>, StoreError> {
        Ok(self.recipe(id))
    }

    async fn find_listing(&self, id: i64) -> Result<Option<RecipeListing>, StoreError> {
        let t = self.tables.lock();
        Ok(t.recipes
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| listing(&t, r)))
    }

    async fn list_published(
        &self,
        query: &PublishedQuery,
        page: PageRequest,
    ) -> Result<Page<RecipeListing>, StoreError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        let t = self.tables.lock();
        let needle = query.q.to_lowercase();
        let mut rows: Vec<_> = t
            .recipes
            .iter()
            .filter(|r| r.is_publish)
            .filter(|r| {
                r.name.to_lowercase().contains(&needle)
                    || contains_ignore_case(r.description.as_deref(), &needle)
                    || contains_ignore_case(r.ingredients.as_deref(), &needle)
            })
            .filter_map(|r| listing(&t, r))
            .collect();
        sort_listings(&mut rows, query.sort, query.order);
        Ok(Page::from_ordered(rows, page))
    }

    async fn list_by_user(
        &self,
        user_id: i64,
        visibility: Visibility,
        page: PageRequest,
    ) -> Result<Page<RecipeListing>, StoreError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        let t = self.tables.lock();
        let mut rows: Vec<_> = t
            .recipes
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| match visibility {
                Visibility::Public => r.is_publish,
                Visibility::Private => !r.is_publish,
                Visibility::All => true,
            })
            .filter_map(|r| listing(&t, r))
            .collect();
        sort_listings(&mut rows, SortKey::CreatedAt, SortOrder::Desc);
        Ok(Page::from_ordered(rows, page))
    }

    async fn insert(&self, recipe: NewRecipe) -> Result<Recipe, StoreError> {
        let mut t = self.tables.lock();
        t.next_recipe += 1;
        let RecipeFields {
            name,
            description,
            num_of_servings,
            cook_time,
            directions,
            ingredients,
        } = recipe.fields;
        let row = Recipe {
            id: t.next_recipe,
            name,
            description,
            num_of_servings,
            cook_time,
            directions,
            ingredients,
            is_publish: false,
            created_at: recipe.created_at,
            updated_at: recipe.created_at,
            user_id: recipe.user_id,
            cover_image: None,
        };
        t.recipes.push(row.clone());
        Ok(row)
    }

    async fn update(&self, recipe: &Recipe) -> Result<Recipe, StoreError> {
        let mut t = self.tables.lock();
        let row = t
            .recipes
            .iter_mut()
            .find(|r| r.id == recipe.id)
            .ok_or_else(missing_row)?;
        *row = recipe.clone();
        Ok(row.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.tables.lock().recipes.retain(|r| r.id != id);
        Ok(())
    }
}

pub(crate) struct TestResponse {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Value,
}

impl TestResponse {
    pub(crate) fn cache_status(&self) -> &str {
        self.headers
            .get("x-cache")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

/// The full router over in-memory collaborators.
pub(crate) struct Harness {
    pub(crate) app: Router,
    pub(crate) state: AppState,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) storage: Arc<MemoryStorage>,
    pub(crate) mailer: Arc<RecordingMailer>,
    pub(crate) clock: Arc<ManualClock>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with_limits(1000, 1000)
    }

    pub(crate) fn with_limits(recipes_per_minute: u32, user_recipes_per_minute: u32) -> Self {
        let config = AppConfig {
            database_url: "postgres://unused".into(),
            public_url: "http://localhost:8080".into(),
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
                ttl_minutes: 15,
                refresh_ttl_minutes: 60,
                activation_ttl_minutes: 30,
            },
            cache_ttl_seconds: 60,
            rate_limit: RateLimitConfig {
                recipes_per_minute,
                user_recipes_per_minute,
            },
            storage: StorageConfig::Local {
                root: std::env::temp_dir().join("smilecook-test-images"),
            },
            mail: None,
        };

        let store = Arc::new(MemoryStore::default());
        let storage = Arc::new(MemoryStorage::default());
        let mailer = Arc::new(RecordingMailer::default());
        let clock = Arc::new(ManualClock::new());

        let state = AppState::from_parts(
            Arc::new(config),
            store.clone(),
            store.clone(),
            storage.clone(),
            mailer.clone(),
            ResultCache::new(clock.clone()),
        );
        Self {
            app: build_app(state.clone()),
            state,
            store,
            storage,
            mailer,
            clock,
        }
    }

    pub(crate) fn token(&self, user_id: i64) -> String {
        JwtKeys::from_config(&self.state.config.jwt)
            .sign_access(user_id)
            .unwrap()
    }

    pub(crate) async fn send(&self, req: Request<Body>) -> TestResponse {
        let response = self.app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub(crate) async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        json: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match json {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    pub(crate) async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        self.request(Method::GET, uri, token, None).await
    }

    /// Single-file multipart `PUT`.
    pub(crate) async fn upload(
        &self,
        uri: &str,
        token: &str,
        field: &str,
        filename: &str,
        data: &[u8],
    ) -> TestResponse {
        const BOUNDARY: &str = "smilecook-boundary";
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let req = Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(Bytes::from(body)))
            .unwrap();
        self.send(req).await
    }
}

pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}
