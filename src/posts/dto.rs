use serde::Deserialize;

use super::repo_types::PostPatch;
use crate::error::AppError;

const MAX_TITLE: usize = 100;
const MAX_CONTENT: usize = 1000;

fn check_len(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    let len = value.trim().chars().count();
    if len == 0 || len > max {
        return Err(AppError::Validation(format!(
            "{field} must be between 1 and {max} characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
}

impl CreatePostRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        check_len("title", &self.title, MAX_TITLE)?;
        check_len("content", &self.content, MAX_CONTENT)
    }
}

/// `version` is the one the client last read.
#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub version: i32,
}

impl UpdatePostRequest {
    pub fn into_patch(self) -> Result<(i32, PostPatch), AppError> {
        if let Some(title) = &self.title {
            check_len("title", title, MAX_TITLE)?;
        }
        if let Some(content) = &self.content {
            check_len("content", content, MAX_CONTENT)?;
        }
        if self.version < 0 {
            return Err(AppError::Validation("version must not be negative".into()));
        }
        Ok((
            self.version,
            PostPatch {
                title: self.title,
                content: self.content,
            },
        ))
    }
}
