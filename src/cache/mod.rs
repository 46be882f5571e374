//! TTL-respecting answer cache.
//!
//! Responses are stored keyed by their question set and served again until
//! a stale window of three times the record TTL has passed. Expiry is
//! enforced on the read path: an expired entry is deleted and reported as
//! a miss, never served.
//!
//! The store is a moka cache, giving concurrent lock-free reads, a bounded
//! cost budget and TinyLFU admission with O(1) amortized maintenance.
//!
//! # Example
//!
//! ```
//! use sshdns::cache::DnsCache;
//!
//! let cache = DnsCache::new(4096);
//! assert!(cache.is_enabled());
//! assert_eq!(cache.entry_count(), 0);
//! ```

pub mod entry;
pub mod key;

use std::time::Duration;

use hickory_proto::op::Message;
use hickory_proto::rr::Record;
use moka::sync::Cache;
use tokio::time::Instant;
use tracing::debug;

pub use entry::{CacheEntry, STALE_WINDOW_FACTOR};
pub use key::QuestionKey;

/// Average per-record weight used to size the cost budget.
const WEIGHT_PER_ENTRY: u64 = 64;

/// Concurrent DNS answer cache.
///
/// A disabled cache ([`DnsCache::disabled`]) accepts every call and always
/// misses, so callers never branch on the caching flag.
pub struct DnsCache {
    store: Cache<QuestionKey, CacheEntry>,
    enabled: bool,
}

impl std::fmt::Debug for DnsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsCache")
            .field("enabled", &self.enabled)
            .field("entries", &self.store.entry_count())
            .finish()
    }
}

impl DnsCache {
    /// Create a cache bounded at roughly `max_entries` responses.
    #[must_use]
    pub fn new(max_entries: u64) -> Self {
        let store = Cache::builder()
            .max_capacity(max_entries.saturating_mul(WEIGHT_PER_ENTRY))
            .weigher(|_key, entry: &CacheEntry| entry.weight())
            .build();
        Self {
            store,
            enabled: true,
        }
    }

    /// Create a cache that always misses.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            store: Cache::builder().max_capacity(0).build(),
            enabled: false,
        }
    }

    /// Whether this cache admits and serves entries.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Look up a response for `req`.
    ///
    /// Returns a message carrying the request's questions with the cached
    /// sections spliced in, or `None` on a miss. An entry past its stale
    /// window is deleted and reported as a miss.
    #[must_use]
    pub fn get(&self, req: &Message) -> Option<Message> {
        if !self.enabled {
            return None;
        }
        let key = QuestionKey::from_message(req)?;
        let entry = self.store.get(&key)?;

        if entry.is_expired(Instant::now()) {
            debug!(%key, "evicting expired cache entry");
            self.store.invalidate(&key);
            return None;
        }

        let mut rsp = req.clone();
        for record in entry.answers() {
            rsp.add_answer(record.clone());
        }
        for record in entry.authorities() {
            rsp.add_name_server(record.clone());
        }
        for record in entry.additionals() {
            rsp.add_additional(record.clone());
        }
        Some(rsp)
    }

    /// Store the response to `req`.
    ///
    /// Responses with all three sections empty are not admitted, and
    /// neither are responses whose leading record has a zero TTL. The TTL
    /// is taken from the first record of the answer, authority or
    /// additional section, in that order.
    pub fn set(&self, req: &Message, rsp: &Message) {
        if !self.enabled {
            return;
        }
        let Some(first) = first_available_record(rsp) else {
            return;
        };
        let ttl = u64::from(first.ttl());
        if ttl == 0 {
            debug!(name = %first.name(), "not caching zero-ttl response");
            return;
        }
        let Some(key) = QuestionKey::from_message(req) else {
            return;
        };

        self.store.insert(
            key,
            CacheEntry::new(
                Instant::now(),
                Duration::from_secs(ttl),
                rsp.answers().to_vec(),
                rsp.name_servers().to_vec(),
                rsp.additionals().to_vec(),
            ),
        );
    }

    /// Seed the cache with a single record, keyed by its owner name and
    /// type. Used to preload the root hints.
    pub fn set_from_rr(&self, record: &Record) {
        let mut req = Message::new();
        req.add_query(hickory_proto::op::Query::query(
            record.name().clone(),
            record.record_type(),
        ));

        let mut rsp = Message::new();
        rsp.add_answer(record.clone());

        self.set(&req, &rsp);
    }

    /// Number of live entries.
    ///
    /// Flushes pending maintenance first so the figure is accurate enough
    /// for the SIGHUP report.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.store.run_pending_tasks();
        self.store.entry_count()
    }
}

fn first_available_record(msg: &Message) -> Option<&Record> {
    msg.answers()
        .first()
        .or_else(|| msg.name_servers().first())
        .or_else(|| msg.additionals().first())
}
