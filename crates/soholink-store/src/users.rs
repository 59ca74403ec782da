//! User queries and the revocation transaction.

use chrono::Utc;

use crate::models::User;
use crate::{Result, Store, StoreError};

const DEFAULT_ROLE: &str = "basic";

impl Store {
    /// Create a new user. Fails with [`StoreError::Duplicate`] when the
    /// username or identifier is already taken.
    pub async fn add_user(
        &self,
        username: &str,
        identifier: &str,
        public_key: &[u8],
        role: &str,
    ) -> Result<User> {
        let role = if role.is_empty() { DEFAULT_ROLE } else { role };

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, identifier, public_key, role, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(username)
        .bind(identifier)
        .bind(public_key)
        .bind(role)
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await
        .map_err(|e| {
            if e.as_database_error()
                .is_some_and(|db| db.is_unique_violation())
            {
                StoreError::Duplicate(format!("username or identifier already exists: {username}"))
            } else {
                StoreError::Query(e)
            }
        })?;

        Ok(user)
    }

    /// Look up a user by username. `None` on miss.
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool())
            .await?;

        Ok(user)
    }

    /// Look up a user by identifier. `None` on miss.
    pub async fn get_user_by_identifier(&self, identifier: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE identifier = ?")
            .bind(identifier)
            .fetch_optional(self.pool())
            .await?;

        Ok(user)
    }

    /// All users, newest first.
    pub async fn list_users(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at DESC")
            .fetch_all(self.pool())
            .await?;

        Ok(users)
    }

    /// Revoke a user: set `revoked_at` and append a revocation row in a
    /// single transaction. Fails if the user is absent or already revoked.
    pub async fn revoke_user(&self, username: &str, reason: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("user '{username}'")))?;

        if user.is_revoked() {
            return Err(StoreError::AlreadyRevoked(username.to_string()));
        }

        let now = Utc::now();

        sqlx::query("UPDATE users SET revoked_at = ? WHERE username = ?")
            .bind(now)
            .bind(username)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO revocations (identifier, reason, revoked_at) VALUES (?, ?, ?)")
            .bind(&user.identifier)
            .bind(reason)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Total number of users, revoked included.
    pub async fn user_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(self.pool())
            .await?;

        Ok(count)
    }

    /// Number of non-revoked users.
    pub async fn active_user_count(&self) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE revoked_at IS NULL")
                .fetch_one(self.pool())
                .await?;

        Ok(count)
    }
}
