//! Command handlers behind the CLI.
//!
//! Every handler runs against an explicit [`Context`] holding the database,
//! the configuration store and the HTTP client. Handlers return typed data;
//! rendering is left to the binary.
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::aggregator::{run_until_cancelled, Ingestor, PollStats};
use crate::config::{ConfigError, ConfigStore};
use crate::feed::HttpFetcher;
use crate::storage::{Database, DatabaseError, Feed, FeedFollow, FeedWithOwner, PostWithFeed, User};
use crate::util::{parse_duration, validate_feed_url, DurationError};

/// Number of posts `browse` shows when no limit is given
pub const DEFAULT_BROWSE_LIMIT: i64 = 2;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum CommandError {
    /// Arguments of the wrong shape
    #[error("usage: {0}")]
    Usage(String),

    #[error("User not logged in")]
    NotLoggedIn,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    Duplicate(String),

    #[error(transparent)]
    InvalidInterval(#[from] DurationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(DatabaseError),
}

impl From<DatabaseError> for CommandError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Duplicate(what) => CommandError::Duplicate(what),
            DatabaseError::NotFound(what) => CommandError::NotFound(what),
            other => CommandError::Database(other),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// One line of the `users` listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    pub current: bool,
}

/// A feed just added, plus the owner's automatic follow of it
#[derive(Debug, Clone)]
pub struct AddedFeed {
    pub feed: Feed,
    pub owner: User,
    pub follow: FeedFollow,
}

/// Parses the `agg` interval argument.
pub fn parse_interval(raw: &str) -> Result<Duration, CommandError> {
    Ok(parse_duration(raw)?)
}

// ============================================================================
// Context
// ============================================================================

/// Everything a command needs, passed in rather than read from globals.
pub struct Context<C> {
    db: Database,
    config: C,
    client: reqwest::Client,
}

impl<C: ConfigStore> Context<C> {
    pub fn new(db: Database, config: C, client: reqwest::Client) -> Self {
        Self { db, config, client }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &C {
        &self.config
    }

    /// The logged-in user.
    ///
    /// # Errors
    ///
    /// - [`CommandError::NotLoggedIn`] - no user recorded in the config
    /// - [`CommandError::NotFound`] - the recorded user no longer exists
    pub async fn current_user(&self) -> Result<User, CommandError> {
        let name = self
            .config
            .load()?
            .current_user_name
            .ok_or(CommandError::NotLoggedIn)?;

        self.db
            .get_user_by_name(&name)
            .await?
            .ok_or_else(|| CommandError::NotFound(format!("User {name}")))
    }

    // ========================================================================
    // User Commands
    // ========================================================================

    /// Create a user and log in as them.
    pub async fn register(&self, name: &str) -> Result<User, CommandError> {
        let name = require_arg(name, "register <name>")?;
        let user = self.db.create_user(name).await?;
        tracing::info!(user_id = user.id, name = %user.name, "Registered user");
        self.config.set_current_user(&user.name)?;
        Ok(user)
    }

    pub async fn login(&self, name: &str) -> Result<User, CommandError> {
        let name = require_arg(name, "login <name>")?;
        let user = self
            .db
            .get_user_by_name(name)
            .await?
            .ok_or_else(|| CommandError::NotFound(format!("User {name}")))?;
        self.config.set_current_user(&user.name)?;
        Ok(user)
    }

    /// Delete every user. Feeds, follows and posts go with them.
    pub async fn reset(&self) -> Result<u64, CommandError> {
        let removed = self.db.reset_users().await?;
        tracing::info!(removed, "Reset users");
        Ok(removed)
    }

    pub async fn users(&self) -> Result<Vec<UserEntry>, CommandError> {
        let current = self.config.load()?.current_user_name;
        let users = self.db.list_users().await?;
        Ok(users
            .into_iter()
            .map(|user| UserEntry {
                current: current.as_deref() == Some(user.name.as_str()),
                name: user.name,
            })
            .collect())
    }

    // ========================================================================
    // Feed Commands
    // ========================================================================

    /// Register a feed owned by the logged-in user, who then follows it.
    ///
    /// # Errors
    ///
    /// - [`CommandError::Usage`] - empty name, or URL not absolute http(s)
    /// - [`CommandError::Duplicate`] - the URL is already registered
    pub async fn add_feed(&self, name: &str, url: &str) -> Result<AddedFeed, CommandError> {
        let usage = "addfeed <name> <url>";
        let name = require_arg(name, usage)?;
        validate_feed_url(url).map_err(|e| CommandError::Usage(format!("{usage} ({e})")))?;

        let owner = self.current_user().await?;
        let feed = self.db.create_feed(name, url, owner.id).await?;
        tracing::info!(feed_id = feed.id, name = %feed.name, url = %feed.url, "Added feed");

        let follow = self.db.create_feed_follow(owner.id, feed.id).await?;
        Ok(AddedFeed { feed, owner, follow })
    }

    pub async fn feeds(&self) -> Result<Vec<FeedWithOwner>, CommandError> {
        Ok(self.db.list_feeds_with_owner().await?)
    }

    pub async fn follow(&self, url: &str) -> Result<FeedFollow, CommandError> {
        let user = self.current_user().await?;
        let feed = self.feed_by_url(url).await?;
        Ok(self.db.create_feed_follow(user.id, feed.id).await?)
    }

    /// Stop following the feed at `url`. Returns the feed unfollowed.
    pub async fn unfollow(&self, url: &str) -> Result<Feed, CommandError> {
        let user = self.current_user().await?;
        let feed = self.feed_by_url(url).await?;
        self.db.delete_feed_follow(user.id, feed.id).await?;
        Ok(feed)
    }

    /// The logged-in user and the feeds they follow
    pub async fn following(&self) -> Result<(User, Vec<FeedFollow>), CommandError> {
        let user = self.current_user().await?;
        let follows = self.db.list_follows_for_user(user.id).await?;
        Ok((user, follows))
    }

    /// Newest posts across the logged-in user's follows.
    pub async fn browse(&self, limit: i64) -> Result<Vec<PostWithFeed>, CommandError> {
        if limit < 1 {
            return Err(CommandError::Usage("browse [limit] (limit must be positive)".into()));
        }
        let user = self.current_user().await?;
        Ok(self.db.list_posts_for_user(user.id, limit).await?)
    }

    // ========================================================================
    // Aggregation
    // ========================================================================

    /// Ingest feeds every `every` until `shutdown` resolves.
    pub async fn agg<S>(&self, every: Duration, shutdown: S) -> PollStats
    where
        S: Future<Output = ()>,
    {
        let mut ingestor = Ingestor::new(self.db.clone(), HttpFetcher::new(self.client.clone()));
        run_until_cancelled(&mut ingestor, every, shutdown).await
    }

    async fn feed_by_url(&self, url: &str) -> Result<Feed, CommandError> {
        self.db
            .get_feed_by_url(url)
            .await?
            .ok_or_else(|| CommandError::NotFound(format!("Feed {url}")))
    }
}

fn require_arg<'a>(value: &'a str, usage: &str) -> Result<&'a str, CommandError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CommandError::Usage(usage.to_string()));
    }
    Ok(trimmed)
}
