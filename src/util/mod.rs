//! Small helpers shared by the command layer and the scheduler.
//!
//! - **Intervals**: parse `agg` interval strings and echo them back normalized
//! - **URLs**: validate feed URLs before they are stored

mod duration;
mod feed_url;

pub use duration::{format_duration, parse_duration, DurationError};
pub use feed_url::{validate_feed_url, UrlValidationError};
