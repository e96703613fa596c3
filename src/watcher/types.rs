use std::fmt;

/// A domain's association with a feed location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub domain: String,
    pub feed_url: String,
}

/// Whether a registration is still provisional or confirmed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationKind {
    /// Reported by a page, held in memory only
    Candidate,
    /// Confirmed (e.g. favorited) and persisted
    Committed,
}

/// Last known result of checking a committed registration.
///
/// Created with an empty history when the registration is committed; only a
/// successful check or [`mark_caught_up`](crate::watcher::FeedWatcher::mark_caught_up)
/// changes it afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedState {
    pub domain: String,
    pub feed_url: String,
    /// Newest item id seen by the last successful check; `None` = never checked
    pub last_seen_id: Option<String>,
    pub unread_count: usize,
}

impl FeedState {
    pub fn new(registration: Registration) -> Self {
        Self {
            domain: registration.domain,
            feed_url: registration.feed_url,
            last_seen_id: None,
            unread_count: 0,
        }
    }

    pub fn registration(&self) -> Registration {
        Registration {
            domain: self.domain.clone(),
            feed_url: self.feed_url.clone(),
        }
    }
}

/// Indicator state for a domain, derived on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NoFeedRegistered,
    Checking,
    NotYetChecked,
    CaughtUp,
    Unread(usize),
}

impl Status {
    /// Derives the status from the in-flight flag and the domain's feed state.
    pub fn derive(in_flight: bool, state: Option<&FeedState>) -> Self {
        match state {
            None => Status::NoFeedRegistered,
            Some(_) if in_flight => Status::Checking,
            Some(state) if state.last_seen_id.is_none() => Status::NotYetChecked,
            Some(state) if state.unread_count > 0 => Status::Unread(state.unread_count),
            Some(_) => Status::CaughtUp,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::NoFeedRegistered => write!(f, "no feed"),
            Status::Checking => write!(f, "checking"),
            Status::NotYetChecked => write!(f, "not yet checked"),
            Status::CaughtUp => write!(f, "caught up"),
            Status::Unread(count) => write!(f, "{count} new"),
        }
    }
}

/// Notifications broadcast to UIs so they can redraw without polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatcherEvent {
    CheckStarted {
        domain: String,
    },
    /// `unread` is `None` when the check failed
    CheckFinished {
        domain: String,
        unread: Option<usize>,
    },
    Committed {
        domain: String,
    },
    Unregistered {
        domain: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(last_seen: Option<&str>, unread: usize) -> FeedState {
        FeedState {
            domain: "example.com".into(),
            feed_url: "https://example.com/feed.json".into(),
            last_seen_id: last_seen.map(str::to_owned),
            unread_count: unread,
        }
    }

    #[test]
    fn test_status_without_state() {
        assert_eq!(Status::derive(false, None), Status::NoFeedRegistered);
    }

    #[test]
    fn test_status_checking_takes_precedence() {
        assert_eq!(
            Status::derive(true, Some(&state(Some("A"), 3))),
            Status::Checking
        );
    }

    #[test]
    fn test_status_never_checked() {
        assert_eq!(
            Status::derive(false, Some(&state(None, 0))),
            Status::NotYetChecked
        );
    }

    #[test]
    fn test_status_unread_and_caught_up() {
        assert_eq!(
            Status::derive(false, Some(&state(Some("A"), 2))),
            Status::Unread(2)
        );
        assert_eq!(
            Status::derive(false, Some(&state(Some("A"), 0))),
            Status::CaughtUp
        );
    }

    #[test]
    fn test_new_state_has_empty_history() {
        let fresh = FeedState::new(Registration {
            domain: "example.com".into(),
            feed_url: "https://example.com/feed.json".into(),
        });
        assert_eq!(fresh.last_seen_id, None);
        assert_eq!(fresh.unread_count, 0);
        assert_eq!(fresh.registration().feed_url, "https://example.com/feed.json");
    }

    #[test]
    fn test_status_display() {
        assert_eq!(Status::Unread(4).to_string(), "4 new");
        assert_eq!(Status::CaughtUp.to_string(), "caught up");
    }
}
