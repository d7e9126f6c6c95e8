use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::future::Future;
use thiserror::Error;

use crate::feed::{FeedSource, FetchError, RssItem};
use crate::storage::{Database, DatabaseError, Feed, NewPost, Post};

use super::scheduler::PollTask;

// ============================================================================
// Store Seams
// ============================================================================

/// Feed selection and stamping, as needed by one ingestion cycle.
pub trait FeedStore: Send + Sync {
    /// The feed fetched longest ago, never-fetched feeds first.
    fn select_oldest_feed(
        &self,
    ) -> impl Future<Output = Result<Option<Feed>, DatabaseError>> + Send;

    /// Stamp the feed as fetched now and return the refreshed row.
    fn mark_fetched(&self, feed_id: i64) -> impl Future<Output = Result<Feed, DatabaseError>> + Send;
}

/// Idempotent post persistence keyed by URL.
pub trait PostStore: Send + Sync {
    /// Returns the stored row and whether this call created it.
    fn insert_if_absent(
        &self,
        post: &NewPost,
    ) -> impl Future<Output = Result<(Post, bool), DatabaseError>> + Send;
}

impl FeedStore for Database {
    async fn select_oldest_feed(&self) -> Result<Option<Feed>, DatabaseError> {
        Database::select_oldest_feed(self).await
    }

    async fn mark_fetched(&self, feed_id: i64) -> Result<Feed, DatabaseError> {
        self.mark_feed_fetched(feed_id).await
    }
}

impl PostStore for Database {
    async fn insert_if_absent(&self, post: &NewPost) -> Result<(Post, bool), DatabaseError> {
        self.insert_post_if_absent(post).await
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Failures that abort an ingestion cycle before any item is stored.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No feeds available to fetch")]
    NoFeedsAvailable,

    /// The feed selection query failed
    #[error("Failed to select the next feed: {0}")]
    Store(#[source] DatabaseError),

    #[error("Failed to mark feed {feed_id} as fetched: {source}")]
    FeedMarkFailed {
        feed_id: i64,
        #[source]
        source: DatabaseError,
    },

    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
}

/// Failure to store a single parsed item. Never aborts the cycle.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("Unrecognized publish date {0:?}")]
    InvalidPublishDate(String),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

/// Outcome of one ingestion cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub feed_id: i64,
    pub feed_name: String,
    /// Items the fetched document yielded
    pub items: usize,
    /// Posts stored for the first time
    pub created: usize,
    /// Items whose URL was already stored
    pub existing: usize,
    /// Items that could not be stored
    pub failed: usize,
}

// ============================================================================
// Ingestion
// ============================================================================

/// Runs select-mark-fetch-persist cycles against a store and a feed source.
pub struct Ingestor<S, F> {
    store: S,
    source: F,
}

impl<S, F> Ingestor<S, F>
where
    S: FeedStore + PostStore,
    F: FeedSource,
{
    pub fn new(store: S, source: F) -> Self {
        Self { store, source }
    }

    /// Performs exactly one ingestion cycle.
    ///
    /// Picks the least recently fetched feed, stamps it as fetched, fetches
    /// and parses it, then stores every item as a post. The feed stays
    /// stamped even if the fetch fails, so a broken feed does not starve
    /// the others.
    ///
    /// Each item is stored independently: a bad publish date or a failed
    /// insert is logged and counted in [`CycleReport::failed`] while the
    /// remaining items are still processed.
    ///
    /// # Errors
    ///
    /// - [`IngestError::NoFeedsAvailable`] - the store holds no feeds
    /// - [`IngestError::Store`] - the selection query failed
    /// - [`IngestError::FeedMarkFailed`] - the stamp write failed (e.g. feed removed)
    /// - [`IngestError::Fetch`] - network, HTTP or parse failure
    pub async fn scrape_next(&self) -> Result<CycleReport, IngestError> {
        let next = self
            .store
            .select_oldest_feed()
            .await
            .map_err(IngestError::Store)?
            .ok_or(IngestError::NoFeedsAvailable)?;

        let feed = self
            .store
            .mark_fetched(next.id)
            .await
            .map_err(|source| IngestError::FeedMarkFailed {
                feed_id: next.id,
                source,
            })?;

        tracing::info!(feed_id = feed.id, name = %feed.name, url = %feed.url, "Fetching feed");

        let document = self
            .source
            .fetch(&feed.url)
            .await
            .map_err(|source| IngestError::Fetch {
                url: feed.url.clone(),
                source,
            })?;

        let mut report = CycleReport {
            feed_id: feed.id,
            feed_name: feed.name.clone(),
            items: document.items.len(),
            ..Default::default()
        };

        for item in document.items {
            let link = item.link.clone();
            match self.save_item(feed.id, item).await {
                Ok((post, true)) => {
                    report.created += 1;
                    tracing::info!(feed = %feed.name, title = %post.title, "Saved post");
                }
                Ok((post, false)) => {
                    report.existing += 1;
                    tracing::debug!(url = %post.url, "Post already stored");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(feed_id = feed.id, url = %link, error = %e, "Skipping feed item");
                }
            }
        }

        tracing::info!(
            feed = %report.feed_name,
            items = report.items,
            created = report.created,
            existing = report.existing,
            failed = report.failed,
            "Feed ingested"
        );

        Ok(report)
    }

    async fn save_item(&self, feed_id: i64, item: RssItem) -> Result<(Post, bool), ItemError> {
        let published_at = parse_pub_date(&item.pub_date)
            .ok_or_else(|| ItemError::InvalidPublishDate(item.pub_date.clone()))?;

        let post = NewPost {
            title: item.title,
            url: item.link,
            description: Some(item.description),
            published_at: published_at.timestamp_millis(),
            feed_id,
        };
        Ok(self.store.insert_if_absent(&post).await?)
    }
}

impl<S, F> PollTask for Ingestor<S, F>
where
    S: FeedStore + PostStore,
    F: FeedSource,
{
    type Error = IngestError;

    fn name(&self) -> &'static str {
        "feed_ingest"
    }

    async fn run_once(&mut self) -> Result<(), IngestError> {
        self.scrape_next().await.map(|_| ())
    }
}

/// Parses an RSS publication date.
///
/// Accepts RFC 2822 (the RSS 2.0 format, including the `UTC` zone name some
/// generators emit), RFC 3339, and bare `YYYY-MM-DD[ HH:MM:SS]` dates read
/// as UTC.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(prefix) = s.strip_suffix(" UTC") {
        if let Ok(dt) = DateTime::parse_from_rfc2822(&format!("{prefix} +0000")) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{build_client, HttpFetcher, RssFeed};
    use crate::storage::User;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(items: &[(&str, &str, &str)]) -> String {
        let body: String = items
            .iter()
            .map(|(title, link, date)| {
                format!(
                    "<item><title>{title}</title><link>{link}</link>\
                     <description>About {title}</description><pubDate>{date}</pubDate></item>"
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel>
<title>Mock</title><link>https://example.com</link><description>d</description>
{body}</channel></rss>"#
        )
    }

    async fn setup(server: &MockServer) -> (Database, User, Feed) {
        let db = Database::open(":memory:").await.unwrap();
        let user = db.create_user("alice").await.unwrap();
        let feed = db
            .create_feed("Mock", &format!("{}/feed.xml", server.uri()), user.id)
            .await
            .unwrap();
        (db, user, feed)
    }

    async fn mount(server: &MockServer, body: String) {
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_cycle_stores_posts_and_stamps_feed() {
        let server = MockServer::start().await;
        mount(
            &server,
            rss(&[
                ("One", "https://example.com/1", "Mon, 01 Jan 2024 10:00:00 +0000"),
                ("Two", "https://example.com/2", "Tue, 02 Jan 2024 10:00:00 GMT"),
            ]),
        )
        .await;
        let (db, user, feed) = setup(&server).await;
        db.create_feed_follow(user.id, feed.id).await.unwrap();

        let ingestor = Ingestor::new(db.clone(), HttpFetcher::new(build_client().unwrap()));
        let report = ingestor.scrape_next().await.unwrap();
        assert_eq!(
            report,
            CycleReport {
                feed_id: feed.id,
                feed_name: "Mock".into(),
                items: 2,
                created: 2,
                existing: 0,
                failed: 0,
            }
        );

        let stamped = db.get_feed_by_id(feed.id).await.unwrap().unwrap();
        assert!(stamped.last_fetched_at.is_some());

        let posts = db.list_posts_for_user(user.id, 10).await.unwrap();
        let titles: Vec<&str> = posts.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Two", "One"]);
        assert_eq!(posts[1].published_at, 1_704_103_200_000);
        assert_eq!(posts[1].description.as_deref(), Some("About One"));
    }

    #[tokio::test]
    async fn test_second_cycle_is_idempotent() {
        let server = MockServer::start().await;
        mount(
            &server,
            rss(&[("One", "https://example.com/1", "Mon, 01 Jan 2024 10:00:00 +0000")]),
        )
        .await;
        let (db, _, _) = setup(&server).await;

        let ingestor = Ingestor::new(db.clone(), HttpFetcher::new(build_client().unwrap()));
        ingestor.scrape_next().await.unwrap();
        let report = ingestor.scrape_next().await.unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.existing, 1);
    }

    #[tokio::test]
    async fn test_bad_publish_date_isolated_to_its_item() {
        let server = MockServer::start().await;
        mount(
            &server,
            rss(&[
                ("One", "https://example.com/1", "Mon, 01 Jan 2024 10:00:00 +0000"),
                ("Broken", "https://example.com/broken", "sometime last week"),
                ("Three", "https://example.com/3", "2024-01-03T10:00:00Z"),
            ]),
        )
        .await;
        let (db, user, feed) = setup(&server).await;
        db.create_feed_follow(user.id, feed.id).await.unwrap();

        let ingestor = Ingestor::new(db.clone(), HttpFetcher::new(build_client().unwrap()));
        let report = ingestor.scrape_next().await.unwrap();
        assert_eq!((report.created, report.failed), (2, 1));

        let posts = db.list_posts_for_user(user.id, 10).await.unwrap();
        let titles: Vec<&str> = posts.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Three", "One"]);
    }

    #[tokio::test]
    async fn test_no_feeds_available() {
        let db = Database::open(":memory:").await.unwrap();
        let ingestor = Ingestor::new(db, HttpFetcher::new(build_client().unwrap()));
        let err = ingestor.scrape_next().await.unwrap_err();
        assert!(matches!(err, IngestError::NoFeedsAvailable), "got {err:?}");
    }

    #[tokio::test]
    async fn test_fetch_failure_still_stamps_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let (db, _, feed) = setup(&server).await;

        let ingestor = Ingestor::new(db.clone(), HttpFetcher::new(build_client().unwrap()));
        let err = ingestor.scrape_next().await.unwrap_err();
        match err {
            IngestError::Fetch {
                source: FetchError::HttpStatus(503),
                ..
            } => {}
            e => panic!("Expected Fetch(HttpStatus(503)), got {:?}", e),
        }

        let stamped = db.get_feed_by_id(feed.id).await.unwrap().unwrap();
        assert!(stamped.last_fetched_at.is_some());
    }

    /// In-process store whose feed vanishes between selection and stamping
    struct VanishingStore {
        feed: Feed,
        inserted: Mutex<Vec<NewPost>>,
    }

    impl FeedStore for VanishingStore {
        async fn select_oldest_feed(&self) -> Result<Option<Feed>, DatabaseError> {
            Ok(Some(self.feed.clone()))
        }

        async fn mark_fetched(&self, feed_id: i64) -> Result<Feed, DatabaseError> {
            Err(DatabaseError::NotFound(format!("Feed {feed_id}")))
        }
    }

    impl PostStore for VanishingStore {
        async fn insert_if_absent(&self, post: &NewPost) -> Result<(Post, bool), DatabaseError> {
            self.inserted.lock().unwrap().push(post.clone());
            Err(DatabaseError::NotFound("unreachable".into()))
        }
    }

    struct NeverFetched;

    impl FeedSource for NeverFetched {
        async fn fetch(&self, url: &str) -> Result<RssFeed, FetchError> {
            panic!("fetch must not run after a failed stamp: {url}");
        }
    }

    #[tokio::test]
    async fn test_mark_failure_aborts_before_fetch() {
        let store = VanishingStore {
            feed: Feed {
                id: 7,
                name: "Gone".into(),
                url: "https://gone.example/feed".into(),
                user_id: 1,
                last_fetched_at: None,
                created_at: 0,
                updated_at: 0,
            },
            inserted: Mutex::new(Vec::new()),
        };

        let ingestor = Ingestor::new(store, NeverFetched);
        let err = ingestor.scrape_next().await.unwrap_err();
        assert!(
            matches!(err, IngestError::FeedMarkFailed { feed_id: 7, .. }),
            "got {err:?}"
        );
        assert!(ingestor.store.inserted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_parse_pub_date_formats() {
        let expected = 1_704_103_200; // 2024-01-01T10:00:00Z
        for raw in [
            "Mon, 01 Jan 2024 10:00:00 +0000",
            "Mon, 01 Jan 2024 10:00:00 GMT",
            "Mon, 01 Jan 2024 10:00:00 UTC",
            "Mon, 01 Jan 2024 05:00:00 -0500",
            "2024-01-01T10:00:00Z",
            "2024-01-01T12:00:00+02:00",
            "2024-01-01 10:00:00",
            "  Mon, 01 Jan 2024 10:00:00 +0000\n",
        ] {
            assert_eq!(
                parse_pub_date(raw).map(|d| d.timestamp()),
                Some(expected),
                "{raw}"
            );
        }
        assert_eq!(
            parse_pub_date("2024-01-01").map(|d| d.timestamp()),
            Some(expected - 36_000)
        );
    }

    #[test]
    fn test_parse_pub_date_rejects_garbage() {
        assert!(parse_pub_date("").is_none());
        assert!(parse_pub_date("yesterday").is_none());
        assert!(parse_pub_date("32/13/2024").is_none());
    }
}
