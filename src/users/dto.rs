use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::repo_types::User;
use crate::{
    error::{AppError, FieldErrors},
    storage::StorageClient,
};

pub const AVATAR_FOLDER: &str = "avatars";
const DEFAULT_AVATAR: &str = "assets/default-avatar.jpg";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Request body for `POST /users`.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Validated registration input.
#[derive(Debug)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn validate(self) -> Result<Registration, AppError> {
        let mut errors = FieldErrors::default();

        let username = self.username.map(|u| u.trim().to_string()).unwrap_or_default();
        if username.is_empty() {
            errors.add("username", "Missing data for required field.");
        } else if username.chars().count() > 80 {
            errors.add("username", "Longer than maximum length 80.");
        }

        let email = self
            .email
            .map(|e| e.trim().to_lowercase())
            .unwrap_or_default();
        if email.is_empty() {
            errors.add("email", "Missing data for required field.");
        } else if !is_valid_email(&email) {
            errors.add("email", "Not a valid email address.");
        }

        let password = self.password.unwrap_or_default();
        if password.is_empty() {
            errors.add("password", "Missing data for required field.");
        } else if password.len() < 8 {
            errors.add("password", "Shorter than minimum length 8.");
        }

        errors.into_result()?;
        Ok(Registration {
            username,
            email,
            password,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    /// Only present when the requester is the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub avatar_url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserResponse {
    pub fn private(user: User, storage: &dyn StorageClient) -> Self {
        let email = Some(user.email.clone());
        Self {
            email,
            ..Self::public(user, storage)
        }
    }

    pub fn public(user: User, storage: &dyn StorageClient) -> Self {
        Self {
            avatar_url: avatar_url(user.avatar_image.as_deref(), storage),
            id: user.id,
            username: user.username,
            email: None,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AvatarResponse {
    pub avatar_url: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

pub fn avatar_url(avatar_image: Option<&str>, storage: &dyn StorageClient) -> String {
    match avatar_image {
        Some(name) => storage.public_url(&format!("{AVATAR_FOLDER}/{name}")),
        None => storage.public_url(DEFAULT_AVATAR),
    }
}
