use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool};

use super::repo_types::{NewInvitation, NewUser, Role, User, UserRow};
use crate::{db::with_timeout, error::StoreError};

/// Persistence of user accounts and their invitations.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<User, StoreError>;

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError>;

    /// Inserts an inactive user and its invitation in one transaction.
    /// A taken email yields [`StoreError::DuplicateEmail`] and leaves no rows.
    async fn create_and_invite(
        &self,
        user: NewUser,
        invitation: NewInvitation,
    ) -> Result<User, StoreError>;

    /// Resolves an unexpired invitation by token hash, marks its user active
    /// and deletes every invitation of that user, in one transaction.
    async fn activate(&self, token_hash: &str) -> Result<User, StoreError>;

    /// Deletes the user and all of its invitations in one transaction.
    async fn delete(&self, id: i64) -> Result<(), StoreError>;

    /// Deletes the still-inactive user that owns the invitation with
    /// `token_hash`, together with its invitations.
    async fn delete_pending(&self, token_hash: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    async fn get_by_name(&self, name: &str) -> Result<Role, StoreError>;
}

const SELECT_USER: &str = r#"
    SELECT u.id, u.username, u.email, u.password_hash, u.created_at, u.is_active,
           r.id AS role_id, r.name AS role_name, r.level AS role_level,
           r.description AS role_description
    FROM users u
    JOIN roles r ON r.id = u.role_id
"#;

async fn fetch_user<'e, E: PgExecutor<'e>>(ex: E, id: i64) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE u.id = $1"))
        .bind(id)
        .fetch_optional(ex)
        .await?;
    Ok(row.map(User::from))
}

fn insert_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            StoreError::DuplicateEmail
        }
        other => other.into(),
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn get_by_id(&self, id: i64) -> Result<User, StoreError> {
        with_timeout("users.get_by_id", async {
            fetch_user(&self.db, id).await?.ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn get_by_email(&self, email: &str) -> Result<User, StoreError> {
        with_timeout("users.get_by_email", async {
            let row = sqlx::query_as::<_, UserRow>(&format!("{SELECT_USER} WHERE u.email = $1"))
                .bind(email)
                .fetch_optional(&self.db)
                .await?;
            row.map(User::from).ok_or(StoreError::NotFound)
        })
        .await
    }

    async fn create_and_invite(
        &self,
        user: NewUser,
        invitation: NewInvitation,
    ) -> Result<User, StoreError> {
        with_timeout("users.create_and_invite", async {
            let mut tx = self.db.begin().await?;

            // No row back means the role name matched nothing.
            let (user_id,): (i64,) = sqlx::query_as(
                r#"
                INSERT INTO users (username, email, password_hash, role_id)
                SELECT $1, $2, $3, id FROM roles WHERE name = $4
                RETURNING id
                "#,
            )
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.role_name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(insert_error)?
            .ok_or(StoreError::NotFound)?;

            sqlx::query(
                r#"
                INSERT INTO user_invitations (token_hash, user_id, expires_at)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(&invitation.token_hash)
            .bind(user_id)
            .bind(invitation.expires_at)
            .execute(&mut *tx)
            .await?;

            let created = fetch_user(&mut *tx, user_id)
                .await?
                .ok_or(StoreError::NotFound)?;
            tx.commit().await?;
            Ok(created)
        })
        .await
    }

    async fn activate(&self, token_hash: &str) -> Result<User, StoreError> {
        with_timeout("users.activate", async {
            let mut tx = self.db.begin().await?;

            // Row locks serialize concurrent activations of the same token;
            // the loser re-evaluates after the winner deleted the invitation.
            let found: Option<(i64,)> = sqlx::query_as(
                r#"
                SELECT u.id
                FROM users u
                JOIN user_invitations ui ON ui.user_id = u.id
                WHERE ui.token_hash = $1 AND ui.expires_at > now()
                FOR UPDATE
                "#,
            )
            .bind(token_hash)
            .fetch_optional(&mut *tx)
            .await?;
            let Some((user_id,)) = found else {
                return Err(StoreError::NotFound);
            };

            sqlx::query("UPDATE users SET is_active = TRUE WHERE id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

            sqlx::query("DELETE FROM user_invitations WHERE user_id = $1")
                .bind(user_id)
                .execute(&mut *tx)
                .await?;

            let user = fetch_user(&mut *tx, user_id)
                .await?
                .ok_or(StoreError::NotFound)?;
            tx.commit().await?;
            Ok(user)
        })
        .await
    }

    async fn delete(&self, id: i64) -> Result<(), StoreError> {
        with_timeout("users.delete", async {
            let mut tx = self.db.begin().await?;

            sqlx::query("DELETE FROM user_invitations WHERE user_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;

            let res = sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            if res.rows_affected() == 0 {
                return Err(StoreError::NotFound);
            }

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn delete_pending(&self, token_hash: &str) -> Result<(), StoreError> {
        with_timeout("users.delete_pending", async {
            // Invitations go with the user through ON DELETE CASCADE.
            let res = sqlx::query(
                r#"
                DELETE FROM users
                WHERE is_active = FALSE
                  AND id IN (SELECT user_id FROM user_invitations WHERE token_hash = $1)
                "#,
            )
            .bind(token_hash)
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

#[derive(Clone)]
pub struct PgRoleStore {
    db: PgPool,
}

impl PgRoleStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RoleStore for PgRoleStore {
    async fn get_by_name(&self, name: &str) -> Result<Role, StoreError> {
        with_timeout("roles.get_by_name", async {
            sqlx::query_as::<_, Role>(
                "SELECT id, name, level, description FROM roles WHERE name = $1",
            )
            .bind(name)
            .fetch_optional(&self.db)
            .await?
            .ok_or(StoreError::NotFound)
        })
        .await
    }
}
