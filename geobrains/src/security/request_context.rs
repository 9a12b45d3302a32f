//! Short-lived association between a request id and its client identity.
//!
//! The primary path hands the [`ClientContext`] straight to whoever needs it.
//! This store covers code that only has the request id, such as a hook that
//! runs outside the handler's call stack.

use super::clock::{Clock, SystemClock};
use crate::identity::ClientContext;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default time an entry stays readable
pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(30);

/// Default maximum number of live entries
pub const DEFAULT_CONTEXT_CAPACITY: usize = 10_000;

struct Entry {
    context: ClientContext,
    expires_at: Instant,
}

/// TTL-bounded map from request id to [`ClientContext`].
pub struct RequestContextStore {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl RequestContextStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self::with_clock(ttl, capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
            clock,
        }
    }

    /// Store the context for a request, replacing any previous value.
    ///
    /// Expired entries are purged only once the store is full. If it is still
    /// full after that, the entry closest to expiry is dropped to make room.
    pub fn set(&self, request_id: &str, context: ClientContext) {
        let now = self.clock.now();
        let mut entries = self.lock();
        self.insert_locked(&mut entries, request_id, context, now);
    }

    /// Store the context unless a live entry already holds this request id.
    ///
    /// Returns `false` and leaves the existing entry untouched when the id is
    /// taken, so two requests sharing an id cannot clobber each other.
    pub fn insert_new(&self, request_id: &str, context: ClientContext) -> bool {
        let now = self.clock.now();
        let mut entries = self.lock();
        if entries
            .get(request_id)
            .is_some_and(|entry| entry.expires_at > now)
        {
            return false;
        }
        self.insert_locked(&mut entries, request_id, context, now);
        true
    }

    fn insert_locked(
        &self,
        entries: &mut HashMap<String, Entry>,
        request_id: &str,
        context: ClientContext,
        now: Instant,
    ) {
        if !entries.contains_key(request_id) && entries.len() >= self.capacity {
            entries.retain(|_, entry| entry.expires_at > now);
        }

        if !entries.contains_key(request_id) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(id, _)| id.clone());
            if let Some(id) = oldest {
                log::warn!("Request context store full, dropping context for {}", id);
                entries.remove(&id);
            }
        }

        entries.insert(
            request_id.to_string(),
            Entry {
                context,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Context for a request, if present and not expired
    pub fn get(&self, request_id: &str) -> Option<ClientContext> {
        let now = self.clock.now();
        self.lock()
            .get(request_id)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.context.clone())
    }

    pub fn remove(&self, request_id: &str) -> Option<ClientContext> {
        self.lock().remove(request_id).map(|entry| entry.context)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RequestContextStore {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_TTL, DEFAULT_CONTEXT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::ManualClock;

    fn store(ttl_secs: u64, capacity: usize) -> (RequestContextStore, ManualClock) {
        let clock = ManualClock::new();
        let store = RequestContextStore::with_clock(
            Duration::from_secs(ttl_secs),
            capacity,
            Arc::new(clock.clone()),
        );
        (store, clock)
    }

    #[test]
    fn test_set_and_get() {
        let (store, _clock) = store(30, 10);
        store.set("req-1", ClientContext::new("1.2.3.4", "curl/8.0"));

        assert_eq!(
            store.get("req-1"),
            Some(ClientContext::new("1.2.3.4", "curl/8.0"))
        );
        assert_eq!(store.get("req-2"), None);
    }

    #[test]
    fn test_entries_expire() {
        let (store, clock) = store(30, 10);
        store.set("req-1", ClientContext::new("1.2.3.4", "ua"));

        clock.advance(Duration::from_secs(29));
        assert!(store.get("req-1").is_some());

        clock.advance(Duration::from_secs(1));
        assert!(store.get("req-1").is_none());
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_remove() {
        let (store, _clock) = store(30, 10);
        store.set("req-1", ClientContext::unknown());

        assert_eq!(store.remove("req-1"), Some(ClientContext::unknown()));
        assert_eq!(store.remove("req-1"), None);
    }

    #[test]
    fn test_set_purges_expired_entries_when_full() {
        let (store, clock) = store(10, 3);
        store.set("old-1", ClientContext::unknown());
        store.set("old-2", ClientContext::unknown());

        clock.advance(Duration::from_secs(10));
        store.set("new-1", ClientContext::unknown());
        // Below capacity nothing is swept
        assert_eq!(store.len(), 3);

        store.set("new-2", ClientContext::unknown());
        assert_eq!(store.len(), 2);
        assert!(store.get("new-1").is_some());
        assert!(store.get("new-2").is_some());
    }

    #[test]
    fn test_insert_new_keeps_live_entry() {
        let (store, clock) = store(30, 10);
        assert!(store.insert_new("dup", ClientContext::new("198.51.100.23", "curl/8.0")));
        assert!(!store.insert_new("dup", ClientContext::new("203.0.113.9", "other")));

        assert_eq!(
            store.get("dup"),
            Some(ClientContext::new("198.51.100.23", "curl/8.0"))
        );

        // An expired entry no longer holds the id
        clock.advance(Duration::from_secs(30));
        assert!(store.insert_new("dup", ClientContext::new("203.0.113.9", "other")));
        assert_eq!(store.get("dup").map(|c| c.ip), Some("203.0.113.9".to_string()));
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let (store, clock) = store(60, 2);
        store.set("a", ClientContext::new("10.0.0.1", "ua"));
        clock.advance(Duration::from_secs(1));
        store.set("b", ClientContext::new("10.0.0.2", "ua"));
        clock.advance(Duration::from_secs(1));
        store.set("c", ClientContext::new("10.0.0.3", "ua"));

        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_some());
        assert!(store.get("c").is_some());
    }

    #[test]
    fn test_overwrite_does_not_evict() {
        let (store, _clock) = store(60, 2);
        store.set("a", ClientContext::unknown());
        store.set("b", ClientContext::unknown());
        store.set("b", ClientContext::new("10.0.0.2", "ua"));

        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_some());
    }
}
