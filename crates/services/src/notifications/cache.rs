use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tracing::trace;

/// Cached remote queries the coordinator can mark stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
    Notifications,
    UnreadCount,
    Enrollments,
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QueryKey::Notifications => "notifications",
            QueryKey::UnreadCount => "unread-count",
            QueryKey::Enrollments => "enrollments",
        })
    }
}

/// Sink for cache invalidations. Readers refetch on their own schedule.
pub trait QueryInvalidator: Send + Sync {
    fn invalidate(&self, key: QueryKey);
}

/// Generation counter per query key.
///
/// Each invalidation bumps the key's generation; readers holding a receiver
/// refetch when it changes. Several invalidations before a reader wakes up
/// collapse into one refetch.
#[derive(Debug, Default)]
pub struct QueryCache {
    generations: Mutex<HashMap<QueryKey, watch::Sender<u64>>>,
}

impl QueryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn subscribe(&self, key: QueryKey) -> watch::Receiver<u64> {
        self.lock()
            .entry(key)
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    /// Number of invalidations seen for `key` so far.
    #[must_use]
    pub fn generation(&self, key: QueryKey) -> u64 {
        self.lock().get(&key).map_or(0, |tx| *tx.borrow())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<QueryKey, watch::Sender<u64>>> {
        self.generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl QueryInvalidator for QueryCache {
    fn invalidate(&self, key: QueryKey) {
        self.lock()
            .entry(key)
            .or_insert_with(|| watch::channel(0).0)
            .send_modify(|generation| *generation += 1);
        trace!(query = %key, "query invalidated");
    }
}
