use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::{repo_types::User, services::Registration};
use crate::error::AppError;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Request body for registration.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(alias = "user")]
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn validate(self) -> Result<Registration, AppError> {
        let username = self.username.trim().to_string();
        let email = self.email.trim().to_lowercase();

        if username.is_empty() || username.chars().count() > 100 {
            return Err(AppError::Validation(
                "username must be between 1 and 100 characters".into(),
            ));
        }
        if email.len() > 255 || !is_valid_email(&email) {
            return Err(AppError::Validation("invalid email".into()));
        }
        let password_len = self.password.chars().count();
        if !(3..=72).contains(&password_len) {
            return Err(AppError::Validation(
                "password must be between 3 and 72 characters".into(),
            ));
        }

        Ok(Registration {
            username,
            email,
            password: self.password,
        })
    }
}

/// Public part of the user returned to clients.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    pub role: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            is_active: u.is_active,
            role: u.role.name,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: PublicUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}
