use gator::commands::{CommandError, Context};
use gator::config::{Config, ConfigStore, MemoryConfig};
use gator::storage::Database;
use pretty_assertions::assert_eq;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup() -> Context<MemoryConfig> {
    let db = Database::open(":memory:").await.unwrap();
    let config = MemoryConfig::new(Config::new(":memory:"));
    Context::new(db, config, gator::feed::build_client().unwrap())
}

async fn followed_names(ctx: &Context<MemoryConfig>) -> Vec<String> {
    let (_, follows) = ctx.following().await.unwrap();
    follows.into_iter().map(|f| f.feed_name).collect()
}

#[tokio::test]
async fn test_register_follow_unfollow_flow() {
    let ctx = setup().await;

    ctx.register("alice").await.unwrap();
    ctx.login("alice").await.unwrap();
    assert_eq!(
        ctx.config().load().unwrap().current_user_name.as_deref(),
        Some("alice")
    );

    ctx.add_feed("Blog", "http://x/feed.xml").await.unwrap();
    assert_eq!(followed_names(&ctx).await, vec!["Blog".to_string()]);

    ctx.unfollow("http://x/feed.xml").await.unwrap();
    assert!(followed_names(&ctx).await.is_empty());

    // The feed itself survives the unfollow
    assert_eq!(ctx.feeds().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_duplicates_are_rejected() {
    let ctx = setup().await;
    ctx.register("alice").await.unwrap();
    ctx.add_feed("Blog", "http://x/feed.xml").await.unwrap();

    let err = ctx
        .add_feed("Same Blog", "http://x/feed.xml")
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Duplicate(_)), "got {err:?}");

    let err = ctx.follow("http://x/feed.xml").await.unwrap_err();
    assert!(matches!(err, CommandError::Duplicate(_)), "got {err:?}");

    let err = ctx.register("alice").await.unwrap_err();
    assert!(matches!(err, CommandError::Duplicate(_)), "got {err:?}");
}

#[tokio::test]
async fn test_not_logged_in() {
    let ctx = setup().await;
    ctx.register("alice").await.unwrap();
    ctx.add_feed("Blog", "http://x/feed.xml").await.unwrap();

    // A fresh config with nobody recorded, over the same database
    let logged_out = Context::new(
        ctx.db().clone(),
        MemoryConfig::new(Config::new(":memory:")),
        reqwest::Client::new(),
    );
    assert!(matches!(
        logged_out.follow("http://x/feed.xml").await,
        Err(CommandError::NotLoggedIn)
    ));
    assert!(matches!(
        logged_out.following().await,
        Err(CommandError::NotLoggedIn)
    ));

    // Commands that need no user still work
    assert_eq!(logged_out.feeds().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reset_removes_everything() {
    let ctx = setup().await;
    ctx.register("alice").await.unwrap();
    ctx.add_feed("Blog", "http://x/feed.xml").await.unwrap();

    ctx.reset().await.unwrap();
    assert!(ctx.users().await.unwrap().is_empty());
    assert!(ctx.feeds().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_agg_then_browse() {
    let mock_server = MockServer::start().await;
    let body = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Blog</title><link>https://blog.example</link><description>posts</description>
  <item><title>Older</title><link>https://blog.example/older</link>
        <description>first</description><pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate></item>
  <item><title>Newer</title><link>https://blog.example/newer</link>
        <description>second</description><pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate></item>
  <item><title>No date</title><link>https://blog.example/undated</link>
        <description>dropped</description></item>
</channel></rss>"#;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let ctx = setup().await;
    ctx.register("alice").await.unwrap();
    ctx.add_feed("Blog", &format!("{}/feed.xml", mock_server.uri()))
        .await
        .unwrap();

    // Stop the loop once the first cycle has stored something
    let db = ctx.db().clone();
    let user_id = ctx.current_user().await.unwrap().id;
    let stored = async move {
        // Sleep first: the in-memory pool has a single connection, so this
        // query must not be in flight when the first tick fires.
        loop {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let posts = db.list_posts_for_user(user_id, 10).await.unwrap_or_default();
            if !posts.is_empty() {
                break;
            }
        }
    };

    let stats = tokio::time::timeout(
        Duration::from_secs(10),
        ctx.agg(Duration::from_secs(3600), stored),
    )
    .await
    .expect("agg did not stop");
    assert_eq!(stats.cycles, 1);
    assert_eq!(stats.failures, 0);

    let titles: Vec<String> = ctx
        .browse(10)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.title)
        .collect();
    assert_eq!(titles, vec!["Newer".to_string(), "Older".to_string()]);

    let newest = ctx.browse(1).await.unwrap();
    assert_eq!(newest.len(), 1);
    assert_eq!(newest[0].feed_name, "Blog");
}
