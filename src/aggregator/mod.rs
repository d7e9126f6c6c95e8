//! Feed aggregation: pick the stalest feed, fetch it, store its posts.
//!
//! - [`ingest`] - one scrape cycle with per-item failure isolation
//! - [`scheduler`] - fixed-interval loop that drives a [`PollTask`] until
//!   cancelled

mod ingest;
mod scheduler;

pub use ingest::{
    parse_pub_date, CycleReport, FeedStore, IngestError, Ingestor, ItemError, PostStore,
};
pub use scheduler::{run_until_cancelled, PollState, PollStats, PollTask};
