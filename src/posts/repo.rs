use async_trait::async_trait;
use sqlx::PgPool;

use super::repo_types::{NewPost, Post, PostPatch};
use crate::{db::with_timeout, error::StoreError};

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn create(&self, post: NewPost) -> Result<Post, StoreError>;

    async fn get_by_id(&self, id: i64) -> Result<Post, StoreError>;

    /// Conditional write on `(id, expected_version)` that bumps the version
    /// by one. A stale version is [`StoreError::VersionConflict`], a missing
    /// post is [`StoreError::NotFound`].
    async fn update(
        &self,
        id: i64,
        expected_version: i32,
        patch: PostPatch,
    ) -> Result<Post, StoreError>;

    async fn delete(&self, id: i64) -> Result<(), StoreError>;
}

const POST_COLUMNS: &str = "id, title, content, user_id, version, created_at, updated_at";

#[derive(Clone)]
pub struct PgPostStore {
    db: PgPool,
}

impl PgPostStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PostStore for PgPostStore {
    async fn create(&self, post: NewPost) -> Result<Post, StoreError> {
        with_timeout("posts.create", async {
            let created = sqlx::query_as::<_, Post>(&format!(
                r#"
                INSERT INTO posts (title, content, user_id)
                VALUES ($1, $2, $3)
                RETURNING {POST_COLUMNS}
                "#
            ))
            .bind(&post.title)
            .bind(&post.content)
            .bind(post.user_id)
            .fetch_one(&self.db)
            .await?;
            Ok(created)
        })
        .await
    }

    async fn get_by_id(&self, id: i64) -> Result<Post, StoreError> {
        with_timeout("posts.get_by_id", async {
            sqlx::query_as::<_, Post>(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.db)
                .await?
                .ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn update(
        &self,
        id: i64,
        expected_version: i32,
        patch: PostPatch,
    ) -> Result<Post, StoreError> {
        with_timeout("posts.update", async {
            let updated = sqlx::query_as::<_, Post>(&format!(
                r#"
                UPDATE posts
                SET title = COALESCE($3, title),
                    content = COALESCE($4, content),
                    version = version + 1,
                    updated_at = now()
                WHERE id = $1 AND version = $2
                RETURNING {POST_COLUMNS}
                "#
            ))
            .bind(id)
            .bind(expected_version)
            .bind(patch.title)
            .bind(patch.content)
            .fetch_optional(&self.db)
            .await?;

            if let Some(post) = updated {
                return Ok(post);
            }

            // Zero rows: tell a stale version apart from a missing post.
            let (exists,): (bool,) =
                sqlx::query_as("SELECT EXISTS (SELECT 1 FROM posts WHERE id = $1)")
                    .bind(id)
                    .fetch_one(&self.db)
                    .await?;
            if exists {
                Err(StoreError::VersionConflict)
            } else {
                Err(StoreError::NotFound)
            }
        })
        .await
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        with_timeout("posts.delete", async {
            let res = sqlx::query("DELETE FROM posts WHERE id = $1")
                .bind(id)
                .execute(&self.db)
                .await?;
            if res.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }
}
