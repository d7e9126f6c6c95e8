//! gator: a multi-user RSS aggregator.
//!
//! Users register and follow feeds; `agg` polls the least recently fetched
//! feed on a fixed interval and stores its items as posts, deduplicated by
//! URL.

pub mod aggregator;
pub mod commands;
pub mod config;
pub mod feed;
pub mod storage;
pub mod util;
