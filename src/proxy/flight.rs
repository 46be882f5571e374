//! Single-flight deduplication of identical queries.
//!
//! Concurrent requests sharing a question key perform exactly one
//! underlying lookup. The first caller for a key becomes the leader and
//! runs the work; everyone else waits on a watch channel and shares the
//! leader's result. The entry is removed before the result is published,
//! so later arrivals start a fresh flight.

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use hickory_proto::op::Message;
use tokio::sync::watch;

use crate::cache::QuestionKey;
use crate::error::LookupError;

/// Result shared between a flight's leader and its waiters.
pub type FlightResult = Result<Message, Arc<LookupError>>;

enum Role {
    Leader(watch::Sender<Option<FlightResult>>),
    Follower(watch::Receiver<Option<FlightResult>>),
}

/// Deduplicating group keyed by question key.
#[derive(Debug, Default)]
pub struct FlightGroup {
    flights: DashMap<QuestionKey, watch::Receiver<Option<FlightResult>>>,
}

impl FlightGroup {
    /// Create an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Run `lookup` for `key`, or wait for the flight already running it.
    pub async fn run<F, Fut>(&self, key: &QuestionKey, lookup: F) -> FlightResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Message, LookupError>>,
    {
        // Decide the role without holding the shard lock across an await.
        let role = match self.flights.entry(key.clone()) {
            Entry::Occupied(entry) => Role::Follower(entry.get().clone()),
            Entry::Vacant(slot) => {
                let (tx, rx) = watch::channel(None);
                slot.insert(rx);
                Role::Leader(tx)
            }
        };

        match role {
            Role::Leader(tx) => {
                let result = lookup().await.map_err(Arc::new);
                self.flights.remove(key);
                let _ = tx.send(Some(result.clone()));
                result
            }
            Role::Follower(mut rx) => loop {
                if let Some(result) = rx.borrow_and_update().clone() {
                    return result;
                }
                if rx.changed().await.is_err() {
                    // The leader vanished without publishing.
                    return Err(Arc::new(LookupError::MissingResponse {
                        name: key.to_string(),
                    }));
                }
            },
        }
    }
}
