use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds a lock on the database
    #[error("The database is locked by another gator process. Please close it and try again.")]
    Busy,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A unique constraint rejected the write
    #[error("{0} already exists")]
    Duplicate(String),

    /// The referenced row does not exist
    #[error("{0} not found")]
    NotFound(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, detecting lock contention and unique violations
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return DatabaseError::Duplicate(db_err.message().to_string());
            }
        }

        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5): database is locked
        // SQLITE_LOCKED (6): database table is locked
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return DatabaseError::Busy;
        }

        DatabaseError::Other(err)
    }

    /// Replace the raw constraint message of a `Duplicate` with a readable subject.
    pub(crate) fn duplicate_as(self, what: impl Into<String>) -> Self {
        match self {
            DatabaseError::Duplicate(_) => DatabaseError::Duplicate(what.into()),
            other => other,
        }
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        Self::from_sqlx(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered user. Names are unique and never change.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A subscribable feed, owned by the user who added it.
///
/// `last_fetched_at` is the only scheduling signal: `None` sorts before
/// every timestamp, so never-fetched feeds are polled first.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_id: i64,
    pub last_fetched_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Feed listing row joined with its owner's name
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedWithOwner {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub owner_name: String,
}

/// A follow joined with the names it links
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct FeedFollow {
    pub id: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub feed_name: String,
    pub feed_url: String,
    pub user_name: String,
}

/// Post data from database. `url` is globally unique.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: i64,
    pub feed_id: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Post row for a follower's timeline, carrying the feed name
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PostWithFeed {
    pub id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: i64,
    pub feed_id: i64,
    pub feed_name: String,
}

/// A post about to be stored, built from a parsed feed item
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: i64,
    pub feed_id: i64,
}
