//! Per-query time budgets.
//!
//! Every lookup runs under a fixed deadline created at the entry point and
//! threaded down through each recursion step. I/O futures are wrapped with
//! [`Deadline::bound`] so cancellation is observable at every suspension
//! point, and cheap [`Deadline::check`] calls guard recursion entries.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sshdns::deadline::Deadline;
//!
//! let ctx = Deadline::after(Duration::from_secs(5));
//! assert!(!ctx.expired());
//! assert!(ctx.check().is_ok());
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::LookupError;

/// An absolute point in time after which a lookup must give up.
///
/// `Deadline` is `Copy` so it can be handed to every step of a recursive
/// walk without lifetime bookkeeping. All expiry surfaces as
/// [`LookupError::ConnectionTimeout`].
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Create a deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Create a deadline at an absolute instant.
    #[must_use]
    pub fn at(instant: Instant) -> Self {
        Self { at: instant }
    }

    /// The instant this deadline expires.
    #[must_use]
    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Whether the budget has been spent.
    #[must_use]
    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Time left before expiry (zero once expired).
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Fail fast with [`LookupError::ConnectionTimeout`] once expired.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionTimeout` when the deadline has passed.
    pub fn check(&self) -> Result<(), LookupError> {
        if self.expired() {
            Err(LookupError::ConnectionTimeout)
        } else {
            Ok(())
        }
    }

    /// Run a future, abandoning it with `ConnectionTimeout` at expiry.
    ///
    /// The inner future is dropped when the deadline fires, which closes
    /// any stream it was suspended on.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionTimeout` when the deadline fires before the
    /// future completes.
    pub async fn bound<F: Future>(&self, fut: F) -> Result<F::Output, LookupError> {
        tokio::time::timeout_at(self.at, fut)
            .await
            .map_err(|_| LookupError::ConnectionTimeout)
    }
}
