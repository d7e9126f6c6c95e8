use super::schema::{now, Database};
use super::types::{DatabaseError, Feed, FeedWithOwner};

const FEED_COLUMNS: &str = "id, name, url, user_id, last_fetched_at, created_at, updated_at";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Add a feed owned by `user_id`. Fails with `Duplicate` if the URL is
    /// already registered.
    pub async fn create_feed(
        &self,
        name: &str,
        url: &str,
        user_id: i64,
    ) -> Result<Feed, DatabaseError> {
        let now = now();
        sqlx::query_as::<_, Feed>(&format!(
            "INSERT INTO feeds (name, url, user_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)
             RETURNING {FEED_COLUMNS}"
        ))
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DatabaseError::from_sqlx(e).duplicate_as(format!("Feed {url}")))
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE url = ?"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    pub async fn get_feed_by_id(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// All feeds in creation order
    pub async fn list_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// All feeds with the name of the user who added them
    pub async fn list_feeds_with_owner(&self) -> Result<Vec<FeedWithOwner>, DatabaseError> {
        let feeds = sqlx::query_as::<_, FeedWithOwner>(
            r#"
                SELECT f.id, f.name, f.url, u.name AS owner_name
                FROM feeds f
                JOIN users u ON u.id = f.user_id
                ORDER BY f.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    // ========================================================================
    // Poll Scheduling
    // ========================================================================

    /// The feed fetched longest ago. Never-fetched feeds come first; ties
    /// resolve to the oldest feed.
    pub async fn select_oldest_feed(&self) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds
             ORDER BY last_fetched_at ASC NULLS FIRST, id ASC
             LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(feed)
    }

    /// Stamp `last_fetched_at` and `updated_at` with the current time and
    /// return the refreshed row. Fails with `NotFound` if the feed is gone.
    ///
    /// The stamp is kept strictly later than every other feed's, so a feed
    /// fetched in the same millisecond as another still queues behind it.
    pub async fn mark_feed_fetched(&self, feed_id: i64) -> Result<Feed, DatabaseError> {
        sqlx::query_as::<_, Feed>(&format!(
            "UPDATE feeds
             SET last_fetched_at = MAX(?1, (SELECT COALESCE(MAX(last_fetched_at) + 1, ?1) FROM feeds)),
                 updated_at = ?1
             WHERE id = ?2
             RETURNING {FEED_COLUMNS}"
        ))
        .bind(now())
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("Feed {feed_id}")))
    }

    /// Stamp `last_fetched_at` and `updated_at` with `fetched_at` and return
    /// the refreshed row. Fails with `NotFound` if the feed is gone.
    pub async fn mark_feed_fetched_at(
        &self,
        feed_id: i64,
        fetched_at: i64,
    ) -> Result<Feed, DatabaseError> {
        sqlx::query_as::<_, Feed>(&format!(
            "UPDATE feeds SET last_fetched_at = ?, updated_at = ? WHERE id = ?
             RETURNING {FEED_COLUMNS}"
        ))
        .bind(fetched_at)
        .bind(fetched_at)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::NotFound(format!("Feed {feed_id}")))
    }
}
