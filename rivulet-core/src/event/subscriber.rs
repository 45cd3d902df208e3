//! Subscriber handles for the notification primitive.
//!
//! Every subscription made on an [`Event`](super::Event) is identified by a
//! [`SubscriberId`]. Closures cannot be compared for equality, so the id is
//! what callers keep around to unsubscribe later.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a subscription.
///
/// Ids are drawn from a process-wide atomic counter, so an id returned by one
/// event can never collide with an id returned by another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Lowest priority a subscriber may use. Fires first.
pub const MIN_PRIORITY: i8 = -5;

/// Highest priority a subscriber may use. Fires last.
pub const MAX_PRIORITY: i8 = 10;

/// Priority used when the caller has no preference.
pub const DEFAULT_PRIORITY: i8 = 0;

/// Priority reserved for framework observers (extensions, the flow itself).
///
/// Anything below zero runs before every ordinary user subscriber.
pub const INTERNAL_PRIORITY: i8 = -5;

/// Returns `true` if `priority` lies within [`MIN_PRIORITY`]..=[`MAX_PRIORITY`].
pub fn priority_in_range(priority: i8) -> bool {
    (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority)
}
