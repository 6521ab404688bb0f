use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;

use crate::{
    error::{AppError, Result},
    id_generator::IdGenerator,
    models::user::{NewUser, User, UserStatus},
};

/// Lookup and creation of local accounts.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Finds a user by id.
    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>>;

    /// Finds a user by email address.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Creates a user and returns it with its assigned id.
    async fn create(&self, new_user: NewUser) -> Result<User>;
}

/// Maps a `tokio_postgres::Row` to a `User`.
fn row_to_user(row: &Row) -> Result<User> {
    let status: String = row.try_get("status")?;
    Ok(User {
        id: row.try_get("user_id")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        status: UserStatus::from_str(&status).map_err(AppError::Internal)?,
    })
}

/// The user directory on PostgreSQL. Ids come from the Snowflake generator.
#[derive(Clone)]
pub struct PgUserDirectory {
    pool: Pool,
    ids: Arc<IdGenerator>,
}

impl PgUserDirectory {
    pub fn new(pool: Pool, ids: Arc<IdGenerator>) -> Self {
        Self { pool, ids }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn find_by_id(&self, user_id: i64) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT user_id, email, first_name, last_name, status
                FROM users
                WHERE user_id = $1
                "#,
                &[&user_id],
            )
            .await?;
        row.map(|r| row_to_user(&r)).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT user_id, email, first_name, last_name, status
                FROM users
                WHERE email = $1
                "#,
                &[&email],
            )
            .await?;
        row.map(|r| row_to_user(&r)).transpose()
    }

    async fn create(&self, new_user: NewUser) -> Result<User> {
        let id = i64::try_from(self.ids.next_id()?)
            .map_err(|_| AppError::Internal("generated id exceeds i64".to_string()))?;

        let client = self.pool.get().await?;
        let row = client
            .query_one(
                r#"
                INSERT INTO users (user_id, email, first_name, last_name, status)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING user_id, email, first_name, last_name, status
                "#,
                &[
                    &id,
                    &new_user.email,
                    &new_user.first_name,
                    &new_user.last_name,
                    &new_user.status.as_str(),
                ],
            )
            .await?;

        let user = row_to_user(&row)?;
        tracing::info!(user_id = user.id, "✅ User created");
        Ok(user)
    }
}
