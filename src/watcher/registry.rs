use std::collections::HashMap;
use tokio::task::AbortHandle;

use super::types::{FeedState, Registration, RegistrationKind, Status};
use crate::feed::{compute_unread, FeedSnapshot, RotatedFeedPolicy};

/// An outstanding check. `ticket` identifies the task that owns it so a
/// completion arriving after cancellation can be recognized and dropped.
struct InFlight {
    ticket: u64,
    handle: Option<AbortHandle>,
}

/// Outcome of asking to start a check.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CheckStart {
    /// No committed registration for the domain
    NotRegistered,
    /// A check is already running; carries the last known unread count
    InFlight { unread: usize },
    /// Caller owns a new check and must fetch `feed_url`
    Started { ticket: u64, feed_url: String },
}

/// Outcome of applying a finished check.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CheckFinish {
    /// The check was cancelled or superseded; nothing was changed
    Stale,
    /// The check failed; the feed state is untouched
    Failed,
    /// The feed state was replaced
    Updated(FeedState),
}

/// What `remove` found for a domain.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Removal {
    pub removed: bool,
    pub cancelled_check: bool,
}

/// Registrations, feed states and in-flight checks of every domain.
///
/// Committed registrations are stored as their [`FeedState`], so a committed
/// registration without a state (or the reverse) cannot be represented. All
/// methods are synchronous; callers guard the registry with one mutex and
/// never hold it across I/O.
#[derive(Default)]
pub(crate) struct Registry {
    candidates: HashMap<String, String>,
    committed: HashMap<String, FeedState>,
    in_flight: HashMap<String, InFlight>,
    next_ticket: u64,
}

impl Registry {
    /// Loads persisted feed states, replacing nothing that already exists.
    pub fn restore(&mut self, states: Vec<FeedState>) -> usize {
        let mut restored = 0;
        for state in states {
            self.candidates.remove(&state.domain);
            if !self.committed.contains_key(&state.domain) {
                self.committed.insert(state.domain.clone(), state);
                restored += 1;
            }
        }
        restored
    }

    /// Records a candidate unless the domain already has any registration.
    pub fn register_candidate(&mut self, domain: &str, feed_url: &str) -> bool {
        if self.has_registration(domain) {
            return false;
        }
        self.candidates
            .insert(domain.to_string(), feed_url.to_string());
        true
    }

    pub fn candidate(&self, domain: &str) -> Option<Registration> {
        self.candidates.get(domain).map(|url| Registration {
            domain: domain.to_string(),
            feed_url: url.clone(),
        })
    }

    /// Replaces the candidate with its committed feed state.
    pub fn promote(&mut self, state: FeedState) {
        self.candidates.remove(&state.domain);
        self.committed.entry(state.domain.clone()).or_insert(state);
    }

    /// Drops every trace of the domain and aborts its running check.
    pub fn remove(&mut self, domain: &str) -> Removal {
        let candidate = self.candidates.remove(domain).is_some();
        let committed = self.committed.remove(domain).is_some();
        let in_flight = self.in_flight.remove(domain);
        let cancelled_check = in_flight.is_some();
        if let Some(handle) = in_flight.and_then(|f| f.handle) {
            handle.abort();
        }
        Removal {
            removed: candidate || committed,
            cancelled_check,
        }
    }

    pub fn has_registration(&self, domain: &str) -> bool {
        self.candidates.contains_key(domain) || self.committed.contains_key(domain)
    }

    pub fn is_committed(&self, domain: &str) -> bool {
        self.committed.contains_key(domain)
    }

    pub fn feed_state(&self, domain: &str) -> Option<&FeedState> {
        self.committed.get(domain)
    }

    pub fn status(&self, domain: &str) -> Status {
        Status::derive(
            self.in_flight.contains_key(domain),
            self.committed.get(domain),
        )
    }

    /// Overwrites a committed domain's state. No-op if it was unregistered.
    pub fn replace_state(&mut self, state: FeedState) -> bool {
        match self.committed.get_mut(&state.domain) {
            Some(existing) => {
                *existing = state;
                true
            }
            None => false,
        }
    }

    /// Every registration, committed ones first, each group sorted by domain.
    pub fn registrations(&self) -> Vec<(Registration, RegistrationKind)> {
        let mut committed: Vec<_> = self
            .committed
            .values()
            .map(|s| (s.registration(), RegistrationKind::Committed))
            .collect();
        committed.sort_by(|a, b| a.0.domain.cmp(&b.0.domain));

        let mut candidates: Vec<_> = self
            .candidates
            .keys()
            .filter_map(|d| self.candidate(d))
            .map(|r| (r, RegistrationKind::Candidate))
            .collect();
        candidates.sort_by(|a, b| a.0.domain.cmp(&b.0.domain));

        committed.extend(candidates);
        committed
    }

    pub fn committed_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.committed.keys().cloned().collect();
        domains.sort();
        domains
    }

    // ========================================================================
    // Check lifecycle
    // ========================================================================

    /// Marks the domain as in flight unless it is already, or unregistered.
    pub fn begin_check(&mut self, domain: &str) -> CheckStart {
        let Some(state) = self.committed.get(domain) else {
            return CheckStart::NotRegistered;
        };

        if self.in_flight.contains_key(domain) {
            return CheckStart::InFlight {
                unread: state.unread_count,
            };
        }

        self.next_ticket = self.next_ticket.wrapping_add(1);
        let ticket = self.next_ticket;
        let feed_url = state.feed_url.clone();
        self.in_flight.insert(
            domain.to_string(),
            InFlight {
                ticket,
                handle: None,
            },
        );
        CheckStart::Started { ticket, feed_url }
    }

    /// Attaches the abort handle of the task running `ticket`.
    ///
    /// Ignored when the check already finished or was cancelled.
    pub fn attach_handle(&mut self, domain: &str, ticket: u64, handle: AbortHandle) {
        match self.in_flight.get_mut(domain) {
            Some(entry) if entry.ticket == ticket => entry.handle = Some(handle),
            _ => {}
        }
    }

    /// Applies a finished check and clears the in-flight marker.
    ///
    /// `snapshot` is `None` for a failed fetch or parse. The unread count is
    /// computed against the state as it is now, not as it was when the check
    /// started.
    pub fn finish_check(
        &mut self,
        domain: &str,
        ticket: u64,
        snapshot: Option<&FeedSnapshot>,
        policy: RotatedFeedPolicy,
    ) -> CheckFinish {
        match self.in_flight.get(domain) {
            Some(entry) if entry.ticket == ticket => {}
            _ => return CheckFinish::Stale,
        }
        self.in_flight.remove(domain);

        let Some(snapshot) = snapshot else {
            return CheckFinish::Failed;
        };
        let Some(state) = self.committed.get_mut(domain) else {
            return CheckFinish::Stale;
        };

        let outcome = compute_unread(&snapshot.ids, state.last_seen_id.as_deref(), policy);
        state.last_seen_id = outcome.newest_id;
        state.unread_count = outcome.count;
        CheckFinish::Updated(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedFormat;
    use pretty_assertions::assert_eq;

    const DOMAIN: &str = "daringfireball.net";
    const URL: &str = "https://daringfireball.net/feeds/json";

    fn committed_registry() -> Registry {
        let mut registry = Registry::default();
        registry.register_candidate(DOMAIN, URL);
        let registration = registry.candidate(DOMAIN).unwrap();
        registry.promote(FeedState::new(registration));
        registry
    }

    fn snapshot(ids: &[&str]) -> FeedSnapshot {
        FeedSnapshot {
            format: FeedFormat::JsonFeed,
            ids: ids.iter().map(|s| s.to_string()).collect(),
            skipped: 0,
        }
    }

    fn started_ticket(start: CheckStart) -> u64 {
        match start {
            CheckStart::Started { ticket, .. } => ticket,
            other => panic!("expected a started check, got {:?}", other),
        }
    }

    #[test]
    fn test_first_candidate_wins() {
        let mut registry = Registry::default();
        assert!(registry.register_candidate(DOMAIN, URL));
        assert!(!registry.register_candidate(DOMAIN, "https://other.example/feed"));
        assert_eq!(registry.candidate(DOMAIN).unwrap().feed_url, URL);
    }

    #[test]
    fn test_candidate_dropped_when_committed() {
        let mut registry = committed_registry();
        assert!(!registry.register_candidate(DOMAIN, "https://other.example/feed"));
        assert_eq!(registry.candidate(DOMAIN), None);
        assert_eq!(registry.feed_state(DOMAIN).unwrap().feed_url, URL);
    }

    #[test]
    fn test_candidate_has_no_state() {
        let mut registry = Registry::default();
        registry.register_candidate(DOMAIN, URL);
        assert!(registry.has_registration(DOMAIN));
        assert!(!registry.is_committed(DOMAIN));
        assert_eq!(registry.feed_state(DOMAIN), None);
        assert_eq!(registry.status(DOMAIN), Status::NoFeedRegistered);
    }

    #[test]
    fn test_promote_creates_empty_state() {
        let registry = committed_registry();
        assert!(registry.is_committed(DOMAIN));
        assert_eq!(registry.candidate(DOMAIN), None);
        let state = registry.feed_state(DOMAIN).unwrap();
        assert_eq!(state.last_seen_id, None);
        assert_eq!(state.unread_count, 0);
        assert_eq!(registry.status(DOMAIN), Status::NotYetChecked);
    }

    #[test]
    fn test_remove_clears_everything() {
        let mut registry = committed_registry();
        registry.begin_check(DOMAIN);
        let removal = registry.remove(DOMAIN);
        assert_eq!(
            removal,
            Removal {
                removed: true,
                cancelled_check: true
            }
        );
        assert!(!registry.has_registration(DOMAIN));
        assert_eq!(registry.status(DOMAIN), Status::NoFeedRegistered);
        assert_eq!(registry.remove(DOMAIN), Removal::default());
    }

    #[test]
    fn test_begin_check_requires_commit() {
        let mut registry = Registry::default();
        assert_eq!(registry.begin_check(DOMAIN), CheckStart::NotRegistered);
        registry.register_candidate(DOMAIN, URL);
        assert_eq!(registry.begin_check(DOMAIN), CheckStart::NotRegistered);
    }

    #[test]
    fn test_second_check_reports_in_flight() {
        let mut registry = committed_registry();
        let start = registry.begin_check(DOMAIN);
        assert_eq!(
            start,
            CheckStart::Started {
                ticket: 1,
                feed_url: URL.to_string()
            }
        );
        assert_eq!(registry.status(DOMAIN), Status::Checking);
        assert_eq!(
            registry.begin_check(DOMAIN),
            CheckStart::InFlight { unread: 0 }
        );
    }

    #[test]
    fn test_finish_applies_snapshot() {
        let mut registry = committed_registry();
        let ticket = started_ticket(registry.begin_check(DOMAIN));
        let finish = registry.finish_check(
            DOMAIN,
            ticket,
            Some(&snapshot(&["A", "B", "C"])),
            RotatedFeedPolicy::AssumeAllNew,
        );
        let CheckFinish::Updated(state) = finish else {
            panic!("expected update");
        };
        assert_eq!(state.last_seen_id.as_deref(), Some("A"));
        assert_eq!(state.unread_count, 0);
        assert_eq!(registry.status(DOMAIN), Status::CaughtUp);

        let ticket = started_ticket(registry.begin_check(DOMAIN));
        registry.finish_check(
            DOMAIN,
            ticket,
            Some(&snapshot(&["N", "M", "A", "B"])),
            RotatedFeedPolicy::AssumeAllNew,
        );
        assert_eq!(registry.status(DOMAIN), Status::Unread(2));
    }

    #[test]
    fn test_failed_check_leaves_state() {
        let mut registry = committed_registry();
        let before = registry.feed_state(DOMAIN).cloned();
        let ticket = started_ticket(registry.begin_check(DOMAIN));
        assert_eq!(
            registry.finish_check(DOMAIN, ticket, None, RotatedFeedPolicy::AssumeAllNew),
            CheckFinish::Failed
        );
        assert_eq!(registry.feed_state(DOMAIN).cloned(), before);
        assert_eq!(registry.status(DOMAIN), Status::NotYetChecked);
    }

    #[test]
    fn test_stale_completion_after_reregistration_discarded() {
        let mut registry = committed_registry();
        let old_ticket = started_ticket(registry.begin_check(DOMAIN));

        registry.remove(DOMAIN);
        registry.register_candidate(DOMAIN, URL);
        let registration = registry.candidate(DOMAIN).unwrap();
        registry.promote(FeedState::new(registration));
        let new_ticket = started_ticket(registry.begin_check(DOMAIN));
        assert_ne!(old_ticket, new_ticket);

        let finish = registry.finish_check(
            DOMAIN,
            old_ticket,
            Some(&snapshot(&["A"])),
            RotatedFeedPolicy::AssumeAllNew,
        );
        assert_eq!(finish, CheckFinish::Stale);
        assert_eq!(registry.feed_state(DOMAIN).unwrap().last_seen_id, None);
        assert_eq!(registry.status(DOMAIN), Status::Checking);
    }

    #[test]
    fn test_restore_overrides_candidates() {
        let mut registry = Registry::default();
        registry.register_candidate(DOMAIN, "https://other.example/feed");
        let restored = registry.restore(vec![FeedState {
            domain: DOMAIN.into(),
            feed_url: URL.into(),
            last_seen_id: Some("A".into()),
            unread_count: 2,
        }]);
        assert_eq!(restored, 1);
        assert_eq!(registry.candidate(DOMAIN), None);
        assert_eq!(registry.status(DOMAIN), Status::Unread(2));
    }

    #[test]
    fn test_registrations_lists_committed_first() {
        let mut registry = committed_registry();
        registry.register_candidate("a.example", "https://a.example/feed");
        let listed = registry.registrations();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0.domain, DOMAIN);
        assert_eq!(listed[0].1, RegistrationKind::Committed);
        assert_eq!(listed[1].0.domain, "a.example");
        assert_eq!(listed[1].1, RegistrationKind::Candidate);
    }
}
