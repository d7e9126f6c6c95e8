use super::schema::{now, Database};
use super::types::{DatabaseError, FeedFollow};

impl Database {
    // ========================================================================
    // Follow Operations
    // ========================================================================

    /// Subscribe `user_id` to `feed_id` and return the follow joined with the
    /// feed and user names. Following the same feed twice fails with `Duplicate`.
    pub async fn create_feed_follow(
        &self,
        user_id: i64,
        feed_id: i64,
    ) -> Result<FeedFollow, DatabaseError> {
        let now = now();
        let mut tx = self.pool.begin().await?;

        let (follow_id,): (i64,) = sqlx::query_as(
            "INSERT INTO feed_follows (user_id, feed_id, created_at, updated_at) VALUES (?, ?, ?, ?)
             RETURNING id",
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DatabaseError::from_sqlx(e).duplicate_as("Feed follow"))?;

        let follow = sqlx::query_as::<_, FeedFollow>(
            r#"
                SELECT ff.id, ff.created_at, ff.updated_at,
                       f.name AS feed_name, f.url AS feed_url, u.name AS user_name
                FROM feed_follows ff
                JOIN feeds f ON f.id = ff.feed_id
                JOIN users u ON u.id = ff.user_id
                WHERE ff.id = ?
            "#,
        )
        .bind(follow_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(follow)
    }

    /// Everything `user_id` follows, in the order the follows were made
    pub async fn list_follows_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<FeedFollow>, DatabaseError> {
        let follows = sqlx::query_as::<_, FeedFollow>(
            r#"
                SELECT ff.id, ff.created_at, ff.updated_at,
                       f.name AS feed_name, f.url AS feed_url, u.name AS user_name
                FROM feed_follows ff
                JOIN feeds f ON f.id = ff.feed_id
                JOIN users u ON u.id = ff.user_id
                WHERE ff.user_id = ?
                ORDER BY ff.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(follows)
    }

    /// Unsubscribe `user_id` from `feed_id`. Fails with `NotFound` if the
    /// user was not following the feed.
    pub async fn delete_feed_follow(&self, user_id: i64, feed_id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM feed_follows WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound("Feed follow".to_string()));
        }
        Ok(())
    }
}
