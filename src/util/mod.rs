//! Utility functions shared by the watcher and the CLI.
//!
//! - **URL validation**: SSRF-guarding checks applied to candidate feed URLs
//! - **Domains**: normalization of hostnames into registry keys, and
//!   resolution of feed links reported by pages
//!
//! # Examples
//!
//! ```
//! use feedwatch::util::{domain_from_url, validate_url};
//!
//! let domain = domain_from_url("https://Example.com/posts/1").unwrap();
//! assert_eq!(domain, "example.com");
//!
//! let feed = validate_url("https://example.com/feed.json", false).unwrap();
//! assert_eq!(feed.path(), "/feed.json");
//! ```

mod domain;
mod url_validator;

pub use domain::{domain_from_url, normalize_domain, resolve_link};
pub use url_validator::{validate_url, UrlValidationError};
