use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::users::repo_types::{NewUser, PublicUser, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence for user records. Emails are expected already normalized.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Find a user by email. The password hash is only loaded when asked for.
    async fn find_by_email(&self, email: &str, with_password: bool)
        -> anyhow::Result<Option<User>>;
    async fn find_by_id(&self, id: i32) -> anyhow::Result<Option<User>>;
    async fn list(&self) -> anyhow::Result<Vec<PublicUser>>;
    /// Insert a user. A clash on the unique email index is `DuplicateEmail`.
    async fn create(&self, user: &NewUser) -> Result<User, StoreError>;
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
    async fn find_by_email(
        &self,
        email: &str,
        with_password: bool,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email,
                   CASE WHEN $2 THEN password_hash END AS password_hash,
                   created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .bind(with_password)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i32) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, email, NULL::text AS password_hash, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn list(&self) -> anyhow::Result<Vec<PublicUser>> {
        let rows = sqlx::query_as::<_, (i32, String, String)>(
            r#"
            SELECT id, name, email
              FROM users
             ORDER BY id
            "#,
        )
        .fetch_all(&self.db)
        .await
        .context("list users")?;
        Ok(rows
            .into_iter()
            .map(|(id, name, email)| PublicUser { id, name, email })
            .collect())
    }

    async fn create(&self, user: &NewUser) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, name, email, NULL::text AS password_hash, created_at
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEmail,
            other => StoreError::Other(anyhow::Error::new(other).context("insert user")),
        })
    }
}
