//! Feed retrieval and change detection.
//!
//! - [`parser`] - sniffs JSON Feed / Atom / RSS documents and extracts the
//!   ordered item identifiers
//! - [`unread`] - compares a snapshot with the last seen identifier
//! - [`fetcher`] - the HTTP capability the watcher is built on, plus its
//!   reqwest implementation
//!
//! # Example
//!
//! ```
//! use feedwatch::feed::{compute_unread, parse_feed, RotatedFeedPolicy};
//!
//! let body = br#"{"items": [{"id": "A"}, {"id": "B"}, {"id": "C"}]}"#;
//! let snapshot = parse_feed(body).unwrap();
//! let outcome = compute_unread(&snapshot.ids, Some("B"), RotatedFeedPolicy::default());
//! assert_eq!(outcome.count, 1);
//! ```

mod fetcher;
mod parser;
mod unread;

pub use fetcher::{
    feed_request_headers, FetchError, HttpFetch, HttpResponse, ReqwestFetcher,
};
pub use parser::{parse_feed, FeedFormat, FeedSnapshot, ParseError};
pub use unread::{compute_unread, RotatedFeedPolicy, UnreadOutcome};
