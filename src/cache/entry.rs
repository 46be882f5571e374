//! Cached response entries.

use std::time::Duration;

use hickory_proto::rr::Record;
use tokio::time::Instant;

/// Entries are readable for this multiple of their TTL before the read
/// path treats them as expired. The overrun gives repeat queries a stale
/// window when upstreams are slow to refresh.
pub const STALE_WINDOW_FACTOR: u32 = 3;

/// One cached response: the three record sections plus timing metadata.
///
/// An entry is created from a response whose sections are not all empty;
/// the admission check lives in the cache itself.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    stored_at: Instant,
    ttl: Duration,
    answers: Vec<Record>,
    authorities: Vec<Record>,
    additionals: Vec<Record>,
}

impl CacheEntry {
    /// Create an entry stored at `stored_at` with the given TTL.
    #[must_use]
    pub fn new(
        stored_at: Instant,
        ttl: Duration,
        answers: Vec<Record>,
        authorities: Vec<Record>,
        additionals: Vec<Record>,
    ) -> Self {
        Self {
            stored_at,
            ttl,
            answers,
            authorities,
            additionals,
        }
    }

    /// Whether the stale window has passed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.stored_at + self.ttl * STALE_WINDOW_FACTOR
    }

    /// The TTL recorded at admission.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Answer records.
    #[must_use]
    pub fn answers(&self) -> &[Record] {
        &self.answers
    }

    /// Authority records.
    #[must_use]
    pub fn authorities(&self) -> &[Record] {
        &self.authorities
    }

    /// Additional records.
    #[must_use]
    pub fn additionals(&self) -> &[Record] {
        &self.additionals
    }

    /// Approximate heap weight used for the cache's cost budget.
    #[must_use]
    pub fn weight(&self) -> u32 {
        let records = self.answers.len() + self.authorities.len() + self.additionals.len();
        u32::try_from(records).unwrap_or(u32::MAX).saturating_mul(64)
    }
}
