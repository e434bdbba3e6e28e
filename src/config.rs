use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
    pub activation_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub enum StorageConfig {
    Local {
        root: PathBuf,
    },
    S3 {
        endpoint: String,
        bucket: String,
        access_key: String,
        secret_key: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub domain: String,
    pub api_key: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub recipes_per_minute: u32,
    pub user_recipes_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Externally visible base URL, used for activation links and pagination links.
    pub public_url: String,
    pub jwt: JwtConfig,
    pub cache_ttl_seconds: u64,
    pub rate_limit: RateLimitConfig,
    pub storage: StorageConfig,
    /// `None` means mails are logged instead of delivered.
    pub mail: Option<MailConfig>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let public_url = std::env::var("APP_PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into())
            .trim_end_matches('/')
            .to_string();
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "smilecook".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "smilecook-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 15),
            refresh_ttl_minutes: env_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
            activation_ttl_minutes: env_or("ACTIVATION_TTL_MINUTES", 30),
        };
        let rate_limit = RateLimitConfig {
            recipes_per_minute: env_or("RATE_LIMIT_RECIPES_PER_MINUTE", 2),
            user_recipes_per_minute: env_or("RATE_LIMIT_USER_RECIPES_PER_MINUTE", 3),
        };

        let storage = match std::env::var("STORAGE_BACKEND").as_deref() {
            Ok("s3") => StorageConfig::S3 {
                endpoint: std::env::var("MINIO_ENDPOINT")?,
                bucket: std::env::var("MINIO_BUCKET")?,
                access_key: std::env::var("MINIO_ACCESS_KEY")?,
                secret_key: std::env::var("MINIO_SECRET_KEY")?,
            },
            Ok("local") | Err(_) => StorageConfig::Local {
                root: std::env::var("UPLOAD_DIR")
                    .unwrap_or_else(|_| "static/images".into())
                    .into(),
            },
            Ok(other) => anyhow::bail!("unknown STORAGE_BACKEND {other:?}"),
        };

        let mail = match (
            std::env::var("MAILGUN_DOMAIN"),
            std::env::var("MAILGUN_API_KEY"),
        ) {
            (Ok(domain), Ok(api_key)) => Some(MailConfig {
                from: std::env::var("MAIL_FROM")
                    .unwrap_or_else(|_| format!("SmileCook <no-reply@{domain}>")),
                domain,
                api_key,
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            public_url,
            jwt,
            cache_ttl_seconds: env_or("CACHE_TTL_SECONDS", 60),
            rate_limit,
            storage,
            mail,
        })
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
