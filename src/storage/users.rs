use super::schema::{now, Database};
use super::types::{DatabaseError, User};

impl Database {
    // ========================================================================
    // User Operations
    // ========================================================================

    /// Register a user. Fails with `Duplicate` if the name is taken.
    pub async fn create_user(&self, name: &str) -> Result<User, DatabaseError> {
        let now = now();
        sqlx::query_as::<_, User>(
            "INSERT INTO users (name, created_at, updated_at) VALUES (?, ?, ?)
             RETURNING id, name, created_at, updated_at",
        )
        .bind(name)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::from_sqlx(e).duplicate_as(format!("User {name}")))
    }

    pub async fn get_user_by_name(&self, name: &str) -> Result<Option<User>, DatabaseError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, created_at, updated_at FROM users WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// All users in registration order
    pub async fn list_users(&self) -> Result<Vec<User>, DatabaseError> {
        let users = sqlx::query_as::<_, User>(
            "SELECT id, name, created_at, updated_at FROM users ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    /// Delete every user. Cascades remove their feeds, follows and posts.
    ///
    /// Returns the number of users removed.
    pub async fn reset_users(&self) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM users")
            .execute(&self.pool)
            .await?;
        tracing::info!(removed = result.rows_affected(), "Reset users");
        Ok(result.rows_affected())
    }
}
