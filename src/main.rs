use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use std::path::PathBuf;

use gator::commands::{parse_interval, Context, DEFAULT_BROWSE_LIMIT};
use gator::config::{ConfigStore, FileConfig};
use gator::feed::build_client;
use gator::storage::{Database, DatabaseError};
use gator::util::format_duration;

#[derive(Parser, Debug)]
#[command(name = "gator", about = "Multi-user RSS aggregator")]
struct Args {
    /// Config file to use instead of ~/.gatorconfig.json
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user and log in as them
    Register { name: String },
    /// Switch to an existing user
    Login { name: String },
    /// Delete all users, feeds, follows and posts
    Reset,
    /// List registered users
    Users,
    /// Add a feed and follow it
    #[command(name = "addfeed")]
    AddFeed { name: String, url: String },
    /// Follow an existing feed by URL
    Follow { url: String },
    /// Stop following a feed by URL
    Unfollow { url: String },
    /// List the feeds you follow
    Following,
    /// List every feed with its owner
    Feeds,
    /// Fetch feeds on an interval (e.g. 30s, 1m, 1h30m) until interrupted
    Agg { interval: String },
    /// Show the newest posts from the feeds you follow
    Browse { limit: Option<i64> },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::Login { .. } => "login",
            Command::Reset => "reset",
            Command::Users => "users",
            Command::AddFeed { .. } => "addfeed",
            Command::Follow { .. } => "follow",
            Command::Unfollow { .. } => "unfollow",
            Command::Following => "following",
            Command::Feeds => "feeds",
            Command::Agg { .. } => "agg",
            Command::Browse { .. } => "browse",
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gator=info")),
        )
        .init();

    let args = Args::parse();
    let name = args.command.name();

    if let Err(e) = run(args).await {
        eprintln!("Error running command {name}: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let store = match &args.config {
        Some(path) => FileConfig::at(path),
        None => FileConfig::in_home()?,
    };
    let config = store
        .load()
        .with_context(|| format!("Failed to load configuration from {}", store.path().display()))?;

    let db = match Database::open(config.db_url.expose_secret()).await {
        Ok(db) => db,
        Err(DatabaseError::Busy) => {
            anyhow::bail!("Another gator process holds the database lock. Please close it and try again.")
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };
    let client = build_client().context("Failed to build HTTP client")?;
    let ctx = Context::new(db, store, client);

    dispatch(&ctx, args.command).await
}

async fn dispatch<C: ConfigStore>(ctx: &Context<C>, command: Command) -> Result<()> {
    match command {
        Command::Register { name } => {
            let user = ctx.register(&name).await?;
            println!("User {} created", user.name);
            println!("User switched successfully!");
        }
        Command::Login { name } => {
            ctx.login(&name).await?;
            println!("User switched successfully!");
        }
        Command::Reset => {
            ctx.reset().await?;
            println!("Users reset successfully!");
        }
        Command::Users => {
            for user in ctx.users().await? {
                if user.current {
                    println!("- {} (current)", user.name);
                } else {
                    println!("- {}", user.name);
                }
            }
        }
        Command::AddFeed { name, url } => {
            let added = ctx.add_feed(&name, &url).await?;
            println!("* ID:            {}", added.feed.id);
            println!("* Created:       {}", format_timestamp(added.feed.created_at));
            println!("* Updated:       {}", format_timestamp(added.feed.updated_at));
            println!("* Name:          {}", added.feed.name);
            println!("* URL:           {}", added.feed.url);
            println!("* User:          {}", added.owner.name);
            println!(
                "{} has started following {}",
                added.follow.user_name, added.follow.feed_name
            );
        }
        Command::Follow { url } => {
            let follow = ctx.follow(&url).await?;
            println!("{} has started following {}", follow.user_name, follow.feed_name);
        }
        Command::Unfollow { url } => {
            let feed = ctx.unfollow(&url).await?;
            println!("Unfollowed {}", feed.name);
        }
        Command::Following => {
            let (user, follows) = ctx.following().await?;
            println!("Following feeds for {}:", user.name);
            for follow in follows {
                println!(" - {}", follow.feed_name);
            }
        }
        Command::Feeds => {
            for feed in ctx.feeds().await? {
                println!("* {}", feed.name);
                println!("  URL:   {}", feed.url);
                println!("  Owner: {}", feed.owner_name);
            }
        }
        Command::Agg { interval } => {
            let every = parse_interval(&interval)?;
            println!("Collecting feeds every {}", format_duration(every));
            ctx.agg(every, shutdown_signal()).await;
        }
        Command::Browse { limit } => {
            let posts = ctx.browse(limit.unwrap_or(DEFAULT_BROWSE_LIMIT)).await?;
            if posts.is_empty() {
                println!("No posts yet. Run `gator agg <interval>` to collect some.");
            }
            for post in posts {
                println!("{} from {}", format_timestamp(post.published_at), post.feed_name);
                println!("--- {} ---", post.title);
                if let Some(description) = post.description.as_deref() {
                    println!("    {}", description);
                }
                println!("Link: {}", post.url);
                println!("=====================================");
            }
        }
    }
    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = interrupt => tracing::info!("Received interrupt, stopping"),
        _ = terminate => tracing::info!("Received SIGTERM, stopping"),
    }
}

/// Renders a stored Unix-millisecond timestamp
fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
