//! Feed retrieval: one HTTP GET per call, parsed into a typed RSS document.
//!
//! - [`parser`] - event-driven RSS parsing with `quick-xml`; items missing a
//!   required field are filtered out
//! - [`fetcher`] - HTTP fetching with a fixed user agent, timeout and body cap

mod fetcher;
mod parser;

pub use fetcher::{build_client, fetch_feed, FeedSource, FetchError, HttpFetcher, USER_AGENT};
pub use parser::{parse_feed, MalformedFeed, RssFeed, RssItem};
