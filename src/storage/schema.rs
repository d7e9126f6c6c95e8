use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database and run migrations.
    ///
    /// `db_url` is either a `sqlite:` URL, a plain path to a database file
    /// (created if missing), or `:memory:`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Busy` if another process holds the database lock.
    /// Returns `DatabaseError::Migration` if the schema cannot be created.
    pub async fn open(db_url: &str) -> Result<Self, DatabaseError> {
        let in_memory = db_url == ":memory:" || db_url == "sqlite::memory:";

        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(DatabaseError::from_sqlx)?
        } else if db_url.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(db_url)
                .map_err(DatabaseError::from_sqlx)?
                .create_if_missing(true)
        } else {
            SqliteConnectOptions::new()
                .filename(db_url)
                .create_if_missing(true)
        };

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks before SQLITE_BUSY,
        // which covers `agg` running beside a one-shot command.
        let options = options
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        // Every in-memory connection is its own database, so the pool must
        // hold exactly one connection and never recycle it.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await.map_err(|e| match e.downcast::<sqlx::Error>() {
            Ok(sqlx_err) => match DatabaseError::from_sqlx(sqlx_err) {
                DatabaseError::Busy => DatabaseError::Busy,
                other => DatabaseError::Migration(other.to_string()),
            },
            Err(e) => DatabaseError::Migration(e.to_string()),
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT UNIQUE NOT NULL,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                last_fetched_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_follows (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(user_id, feed_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT UNIQUE NOT NULL,
                description TEXT,
                published_at INTEGER NOT NULL,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Poll order: oldest fetch first
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feeds_last_fetched ON feeds(last_fetched_at)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_follows_user ON feed_follows(user_id)")
            .execute(&mut *tx)
            .await?;

        // Follower timeline: posts by feed, newest first
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_posts_feed_published ON posts(feed_id, published_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

/// Current time in Unix milliseconds, the unit of every stored timestamp
pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
