use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use tracing::{info, warn};

use crate::cache::{ResultCache, SystemClock};
use crate::config::{AppConfig, StorageConfig};
use crate::mail::{LogMailer, MailgunMailer, Mailer};
use crate::rate_limit::RateLimiter;
use crate::recipes::repo::{PgRecipeStore, RecipeStore};
use crate::storage::{LocalStorage, Storage, StorageClient};
use crate::users::repo::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub recipes: Arc<dyn RecipeStore>,
    pub storage: Arc<dyn StorageClient>,
    pub mailer: Arc<dyn Mailer>,
    pub cache: ResultCache,
    pub limiter: RateLimiter,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            warn!(error = %e, "migration failed; continuing");
        }

        let storage = match &config.storage {
            StorageConfig::Local { root } => {
                Arc::new(LocalStorage::new(root.clone(), &config.public_url)?) as Arc<dyn StorageClient>
            }
            StorageConfig::S3 {
                endpoint,
                bucket,
                access_key,
                secret_key,
            } => Arc::new(Storage::new(endpoint, bucket, access_key, secret_key, "us-east-1").await?)
                as Arc<dyn StorageClient>,
        };

        let mailer = match &config.mail {
            Some(mail) => Arc::new(MailgunMailer::new(mail.clone())) as Arc<dyn Mailer>,
            None => {
                info!("MAILGUN_DOMAIN/MAILGUN_API_KEY not set; mails will be logged");
                Arc::new(LogMailer) as Arc<dyn Mailer>
            }
        };

        Ok(Self::from_parts(
            config,
            Arc::new(PgUserStore::new(db.clone())),
            Arc::new(PgRecipeStore::new(db)),
            storage,
            mailer,
            ResultCache::new(Arc::new(SystemClock)),
        ))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        recipes: Arc<dyn RecipeStore>,
        storage: Arc<dyn StorageClient>,
        mailer: Arc<dyn Mailer>,
        cache: ResultCache,
    ) -> Self {
        let limiter = RateLimiter::new(
            Duration::from_secs(60),
            HashMap::from([
                ("/recipes", config.rate_limit.recipes_per_minute),
                ("/users/:username/recipes", config.rate_limit.user_recipes_per_minute),
            ]),
        );
        Self {
            config,
            users,
            recipes,
            storage,
            mailer,
            cache,
            limiter,
        }
    }
}
