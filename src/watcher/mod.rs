//! Registrations, feed state and check coordination.
//!
//! [`FeedWatcher`] is the entry point. Pages report feeds as candidates, the
//! user commits one, and checks compare the live feed with the last item seen.

mod coordinator;
mod error;
mod notify;
mod registry;
mod types;

pub use coordinator::{FeedWatcher, WatchOptions};
pub use error::{CheckError, WatchError};
pub use notify::CheckCallback;
pub use types::{FeedState, Registration, RegistrationKind, Status, WatcherEvent};
