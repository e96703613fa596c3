use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

use super::error::{CheckError, WatchError};
use super::notify::{panic_message, CheckCallback, Notifier};
use super::registry::{CheckFinish, CheckStart, Registry};
use super::types::{FeedState, Registration, RegistrationKind, Status, WatcherEvent};
use crate::config::Config;
use crate::feed::{
    feed_request_headers, parse_feed, FeedSnapshot, FetchError, HttpFetch, RotatedFeedPolicy,
};
use crate::storage::FeedStore;
use crate::util::{domain_from_url, normalize_domain, resolve_link, validate_url};

/// Capacity of the event broadcast; slow subscribers see `Lagged`.
const EVENT_CAPACITY: usize = 64;

/// Tunables of a [`FeedWatcher`].
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub check_timeout: Duration,
    pub rotated_feed_policy: RotatedFeedPolicy,
    pub allow_private_addresses: bool,
    pub max_concurrent_checks: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for WatchOptions {
    fn from(config: &Config) -> Self {
        Self {
            check_timeout: config.check_timeout(),
            rotated_feed_policy: config.rotated_feed_policy,
            allow_private_addresses: config.allow_private_addresses,
            max_concurrent_checks: config.max_concurrent_checks.max(1),
        }
    }
}

struct Inner {
    registry: Mutex<Registry>,
    /// Serializes every write to the store so a late check cannot
    /// resurrect a row that `unregister` deleted.
    persist_gate: tokio::sync::Mutex<()>,
    http: Arc<dyn HttpFetch>,
    store: Arc<dyn FeedStore>,
    options: WatchOptions,
    notifier: Notifier,
    events: broadcast::Sender<WatcherEvent>,
}

/// Process-wide feed watcher.
///
/// Owns the registrations of every domain and coordinates checks: at most one
/// fetch per domain is in flight, results are applied to the registry, and
/// callbacks run on a single dispatcher task. Cheap to clone; clones share
/// state.
///
/// Domains passed in are normalized (trimmed, lowercased, trailing dot
/// removed); a string that is not a plain hostname is treated as a domain
/// without any registration.
#[derive(Clone)]
pub struct FeedWatcher {
    inner: Arc<Inner>,
}

impl FeedWatcher {
    /// Creates an empty watcher. Must be called inside a tokio runtime.
    pub fn new(http: Arc<dyn HttpFetch>, store: Arc<dyn FeedStore>, options: WatchOptions) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                registry: Mutex::new(Registry::default()),
                persist_gate: tokio::sync::Mutex::new(()),
                http,
                store,
                options,
                notifier: Notifier::spawn(),
                events,
            }),
        }
    }

    /// Creates a watcher and restores the committed registrations saved in
    /// `store`.
    pub async fn load(
        http: Arc<dyn HttpFetch>,
        store: Arc<dyn FeedStore>,
        options: WatchOptions,
    ) -> Result<Self, WatchError> {
        let states = store.load().await?;
        let watcher = Self::new(http, store, options);
        let restored = watcher.registry().restore(states);
        tracing::info!(feeds = restored, "Restored watched feeds");
        Ok(watcher)
    }

    /// Receives every [`WatcherEvent`] emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.inner.events.subscribe()
    }

    pub fn options(&self) -> &WatchOptions {
        &self.inner.options
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Registry methods never panic midway, so a poisoned lock still
        // holds consistent maps.
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: WatcherEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    // ========================================================================
    // Registrations
    // ========================================================================

    /// Records `feed_url` as the candidate feed of `domain`.
    ///
    /// Returns `false` without changing anything if the domain already has a
    /// candidate or committed registration, or if the domain or URL is
    /// refused.
    pub fn register_candidate(&self, domain: &str, feed_url: &str) -> bool {
        let Some(domain) = normalize_domain(domain) else {
            tracing::debug!(domain = %domain, "Ignoring candidate for invalid domain");
            return false;
        };
        let url = match validate_url(feed_url, self.inner.options.allow_private_addresses) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(domain = %domain, url = %feed_url, error = %e, "Refusing candidate feed URL");
                return false;
            }
        };

        let registered = self.registry().register_candidate(&domain, url.as_str());
        if registered {
            tracing::debug!(domain = %domain, url = %url, "Registered candidate feed");
        } else {
            tracing::debug!(domain = %domain, "Domain already has a feed registration");
        }
        registered
    }

    /// Handles the feed links a page advertised.
    ///
    /// The domain is the page's host. Links may be relative to the page; the
    /// first one that resolves to an acceptable URL becomes the candidate.
    pub fn feeds_found<S: AsRef<str>>(&self, page_url: &str, feed_links: &[S]) -> bool {
        let Some(domain) = domain_from_url(page_url) else {
            tracing::debug!(page = %page_url, "Page has no host, ignoring its feeds");
            return false;
        };

        let allow_private = self.inner.options.allow_private_addresses;
        let first_usable = feed_links
            .iter()
            .filter_map(|href| resolve_link(href.as_ref(), page_url))
            .find(|url| validate_url(url, allow_private).is_ok());

        match first_usable {
            Some(url) => self.register_candidate(&domain, &url),
            None => {
                tracing::debug!(domain = %domain, links = feed_links.len(), "No usable feed link");
                false
            }
        }
    }

    /// Promotes the candidate of `domain` to a committed registration with
    /// an empty history, and persists it.
    ///
    /// Returns `Ok(false)` when there is no candidate (already committed, or
    /// never reported). On a store error the candidate stays in place.
    pub async fn commit(&self, domain: &str) -> Result<bool, WatchError> {
        let Some(domain) = normalize_domain(domain) else {
            return Ok(false);
        };

        let gate = self.inner.persist_gate.lock().await;
        let candidate = self.registry().candidate(&domain);
        let Some(registration) = candidate else {
            tracing::debug!(domain = %domain, "Nothing to commit");
            return Ok(false);
        };

        let state = FeedState::new(registration);
        self.inner.store.save(&state).await?;
        self.registry().promote(state);
        drop(gate);

        tracing::info!(domain = %domain, "Committed feed registration");
        self.emit(WatcherEvent::Committed { domain });
        Ok(true)
    }

    /// Forgets every registration of `domain` and cancels its running check.
    ///
    /// A cancelled check never invokes its callback. Returns whether anything
    /// was registered. On a store error memory is left unchanged.
    pub async fn unregister(&self, domain: &str) -> Result<bool, WatchError> {
        let Some(domain) = normalize_domain(domain) else {
            return Ok(false);
        };

        let gate = self.inner.persist_gate.lock().await;
        let committed = self.registry().is_committed(&domain);
        if committed {
            self.inner.store.delete(&domain).await?;
        }
        let removal = self.registry().remove(&domain);
        drop(gate);

        if removal.cancelled_check {
            tracing::debug!(domain = %domain, "Cancelled in-flight check");
        }
        if removal.removed {
            tracing::info!(domain = %domain, "Unregistered feed");
            self.emit(WatcherEvent::Unregistered { domain });
        }
        Ok(removal.removed)
    }

    /// Resets the unread count of `domain` to zero, keeping the last seen
    /// item. Returns `Ok(false)` when the domain has no committed feed.
    pub async fn mark_caught_up(&self, domain: &str) -> Result<bool, WatchError> {
        let Some(domain) = normalize_domain(domain) else {
            return Ok(false);
        };

        let _gate = self.inner.persist_gate.lock().await;
        let current = self.registry().feed_state(&domain).cloned();
        let Some(mut state) = current else {
            return Ok(false);
        };
        if state.unread_count == 0 {
            return Ok(true);
        }

        state.unread_count = 0;
        self.inner.store.save(&state).await?;
        self.registry().replace_state(state);
        tracing::debug!(domain = %domain, "Marked feed caught up");
        Ok(true)
    }

    pub fn has_registration(&self, domain: &str) -> bool {
        normalize_domain(domain).is_some_and(|d| self.registry().has_registration(&d))
    }

    pub fn status(&self, domain: &str) -> Status {
        match normalize_domain(domain) {
            Some(d) => self.registry().status(&d),
            None => Status::NoFeedRegistered,
        }
    }

    /// Snapshot of the committed feed state of `domain`.
    pub fn feed_state(&self, domain: &str) -> Option<FeedState> {
        let domain = normalize_domain(domain)?;
        self.registry().feed_state(&domain).cloned()
    }

    /// Every registration, committed ones first.
    pub fn registrations(&self) -> Vec<(Registration, RegistrationKind)> {
        self.registry().registrations()
    }

    // ========================================================================
    // Checks
    // ========================================================================

    /// Checks the committed feed of `domain` and reports the unread count to
    /// `on_complete`.
    ///
    /// - No committed registration: nothing happens and `on_complete` is
    ///   dropped without being called.
    /// - A check already running: no second request is made; `on_complete`
    ///   receives the last known unread count.
    /// - Otherwise a fetch starts in the background. `on_complete` receives
    ///   `Some(count)` on success and `None` when the fetch or parse failed.
    ///
    /// Callbacks run one at a time on the watcher's dispatcher task.
    pub fn check_feed<F>(&self, domain: &str, on_complete: F)
    where
        F: FnOnce(Option<usize>) + Send + 'static,
    {
        self.start_check(domain, Box::new(on_complete));
    }

    /// Awaitable form of [`check_feed`](Self::check_feed).
    ///
    /// The outer `None` means no result will come: the domain has no committed
    /// feed, or it was unregistered while the check ran.
    pub async fn check(&self, domain: &str) -> Option<Option<usize>> {
        let (tx, rx) = oneshot::channel();
        let started = self.start_check(
            domain,
            Box::new(move |unread| {
                let _ = tx.send(unread);
            }),
        );
        if !started {
            return None;
        }
        rx.await.ok()
    }

    /// Checks every committed feed concurrently.
    ///
    /// # Returns
    ///
    /// `(domain, unread)` pairs in completion order, not registration order.
    /// `unread` is `None` for a check that failed.
    ///
    /// # Behavior
    ///
    /// - Runs at most `max_concurrent_checks` checks at a time
    /// - Candidate-only domains are not checked
    /// - A domain already being checked joins that check and reports its
    ///   last known count instead of fetching twice
    /// - Domains unregistered while the round runs are left out of the result
    pub async fn check_all(&self) -> Vec<(String, Option<usize>)> {
        let domains = self.registry().committed_domains();
        tracing::debug!(feeds = domains.len(), "Checking all feeds");

        stream::iter(domains)
            .map(|domain| {
                let watcher = self.clone();
                async move {
                    let outcome = watcher.check(&domain).await;
                    outcome.map(|unread| (domain, unread))
                }
            })
            .buffer_unordered(self.inner.options.max_concurrent_checks)
            .filter_map(|outcome| async move { outcome })
            .collect()
            .await
    }

    fn start_check(&self, domain: &str, callback: CheckCallback) -> bool {
        let Some(domain) = normalize_domain(domain) else {
            return false;
        };

        let mut registry = self.registry();
        match registry.begin_check(&domain) {
            CheckStart::NotRegistered => {
                tracing::debug!(domain = %domain, "No committed feed, skipping check");
                false
            }
            CheckStart::InFlight { unread } => {
                drop(registry);
                tracing::debug!(domain = %domain, "Check already in flight");
                self.inner.notifier.deliver(&domain, Some(unread), callback);
                true
            }
            CheckStart::Started { ticket, feed_url } => {
                self.emit(WatcherEvent::CheckStarted {
                    domain: domain.clone(),
                });
                let watcher = self.clone();
                let task_domain = domain.clone();
                let handle = tokio::spawn(async move {
                    watcher
                        .run_check(task_domain, ticket, feed_url, callback)
                        .await;
                });
                registry.attach_handle(&domain, ticket, handle.abort_handle());
                true
            }
        }
    }

    async fn run_check(
        self,
        domain: String,
        ticket: u64,
        feed_url: String,
        callback: CheckCallback,
    ) {
        // A panic must still reach `finish_check`, or the domain would stay
        // in flight forever
        let fetched = AssertUnwindSafe(self.fetch_snapshot(&feed_url))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(CheckError::Panicked(panic_message(panic.as_ref()))));
        let snapshot = match fetched {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!(domain = %domain, url = %feed_url, error = %e, "Feed check failed");
                None
            }
        };

        let gate = self.inner.persist_gate.lock().await;
        let finish = self.registry().finish_check(
            &domain,
            ticket,
            snapshot.as_ref(),
            self.inner.options.rotated_feed_policy,
        );
        let unread = match finish {
            CheckFinish::Stale => {
                tracing::debug!(domain = %domain, "Discarding result of cancelled check");
                return;
            }
            CheckFinish::Failed => None,
            CheckFinish::Updated(state) => {
                // The in-memory result stands even if it cannot be saved
                if let Err(e) = self.inner.store.save(&state).await {
                    tracing::warn!(domain = %domain, error = %e, "Failed to persist feed state");
                }
                tracing::debug!(
                    domain = %domain,
                    unread = state.unread_count,
                    last_seen = ?state.last_seen_id,
                    "Feed checked"
                );
                Some(state.unread_count)
            }
        };
        drop(gate);

        self.emit(WatcherEvent::CheckFinished {
            domain: domain.clone(),
            unread,
        });
        self.inner.notifier.deliver(&domain, unread, callback);
    }

    async fn fetch_snapshot(&self, feed_url: &str) -> Result<FeedSnapshot, CheckError> {
        let headers = feed_request_headers();
        let response = tokio::time::timeout(
            self.inner.options.check_timeout,
            self.inner.http.fetch(feed_url, &headers),
        )
        .await
        .map_err(|_| FetchError::Timeout)??;

        if !response.is_success() {
            return Err(FetchError::HttpStatus(response.status).into());
        }

        Ok(parse_feed(&response.body)?)
    }
}
