use super::schema::{now, Database};
use super::types::{DatabaseError, NewPost, Post, PostWithFeed};

/// Maximum number of posts returned by a single timeline query
const MAX_POSTS: i64 = 500;

const POST_COLUMNS: &str =
    "id, title, url, description, published_at, feed_id, created_at, updated_at";

impl Database {
    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Store a post unless one with the same URL already exists.
    ///
    /// Returns the stored row and whether it was created by this call. When
    /// the URL is already present the existing row is returned unchanged.
    pub async fn insert_post_if_absent(&self, post: &NewPost) -> Result<(Post, bool), DatabaseError> {
        let now = now();
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, Post>(&format!(
            "INSERT INTO posts (title, url, description, published_at, feed_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(url) DO NOTHING
             RETURNING {POST_COLUMNS}"
        ))
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(post.published_at)
        .bind(post.feed_id)
        .bind(now)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let result = match inserted {
            Some(row) => (row, true),
            None => {
                let existing = sqlx::query_as::<_, Post>(&format!(
                    "SELECT {POST_COLUMNS} FROM posts WHERE url = ?"
                ))
                .bind(&post.url)
                .fetch_one(&mut *tx)
                .await?;
                (existing, false)
            }
        };

        tx.commit().await?;
        Ok(result)
    }

    /// Newest posts from every feed `user_id` follows, by publish date
    pub async fn list_posts_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<PostWithFeed>, DatabaseError> {
        let limit = limit.clamp(0, MAX_POSTS);
        let posts = sqlx::query_as::<_, PostWithFeed>(
            r#"
                SELECT p.id, p.title, p.url, p.description, p.published_at, p.feed_id,
                       f.name AS feed_name
                FROM posts p
                JOIN feed_follows ff ON ff.feed_id = p.feed_id
                JOIN feeds f ON f.id = p.feed_id
                WHERE ff.user_id = ?
                ORDER BY p.published_at DESC, p.id DESC
                LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(posts)
    }
}
