use serde::Deserialize;

/// What to report when the last seen item no longer appears in the feed.
///
/// This happens when more items were published between two checks than the
/// feed document holds. Neither answer is exact; over-counting keeps the
/// unread signal, under-counting avoids a spurious badge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotatedFeedPolicy {
    /// Count every item in the snapshot as new
    #[default]
    AssumeAllNew,
    /// Report no new items and re-baseline on the newest item
    AssumeNoneNew,
}

/// Result of comparing a snapshot against the last seen item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadOutcome {
    /// Identifier to remember as "last seen" for the next check
    pub newest_id: Option<String>,
    /// Number of items newer than the previously seen one
    pub count: usize,
}

/// Counts the items that appeared since `last_seen_id`.
///
/// `ids` must be in document order, newest first.
///
/// - Empty snapshot: nothing changes, count 0.
/// - First check (`last_seen_id` is `None`): the newest item becomes the
///   baseline and the count is 0, so a new subscription does not start with
///   its whole backlog unread.
/// - `last_seen_id` found at position `i`: count is `i`.
/// - `last_seen_id` missing from the snapshot: decided by `policy`.
///
/// # Examples
///
/// ```
/// use feedwatch::feed::{compute_unread, RotatedFeedPolicy};
///
/// let ids = vec!["A".to_string(), "B".to_string(), "C".to_string()];
/// let outcome = compute_unread(&ids, Some("B"), RotatedFeedPolicy::AssumeAllNew);
/// assert_eq!(outcome.newest_id.as_deref(), Some("A"));
/// assert_eq!(outcome.count, 1);
/// ```
pub fn compute_unread(
    ids: &[String],
    last_seen_id: Option<&str>,
    policy: RotatedFeedPolicy,
) -> UnreadOutcome {
    let Some(newest) = ids.first() else {
        return UnreadOutcome {
            newest_id: last_seen_id.map(str::to_owned),
            count: 0,
        };
    };

    let count = match last_seen_id {
        None => 0,
        Some(seen) => match ids.iter().position(|id| id == seen) {
            Some(index) => index,
            None => match policy {
                RotatedFeedPolicy::AssumeAllNew => ids.len(),
                RotatedFeedPolicy::AssumeNoneNew => 0,
            },
        },
    };

    UnreadOutcome {
        newest_id: Some(newest.clone()),
        count,
    }
}
