//! Bounded pool of tunnel sessions with health-driven reconnect.
//!
//! The pool keeps up to `W` live SSH sessions and lends them out one
//! caller at a time. The resolver reports the outcome of every exchange
//! through a send-only [`HealthReporter`]; a run of errors trips the pool
//! into a reconnect cycle that destroys every session and re-dials until
//! the remote is reachable again.
//!
//! # State machine
//!
//! ```text
//! Healthy ──[5 consecutive error signals]──> Reconnecting
//!    ^                                            │
//!    └────[one successful re-acquire]─────────────┘
//! ```
//!
//! While reconnecting, `acquire` fails fast with
//! [`LookupError::PoolReconnecting`] and incoming signals are dropped so
//! the cycle cannot trigger twice. A success signal resets the error
//! counter.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool::managed::{self, Manager, Metrics, Object, Pool, PoolError, RecycleResult};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::session::{SessionConnector, TunnelSession};
use crate::deadline::Deadline;
use crate::error::LookupError;

/// Consecutive error signals that trip a pool reset.
pub const ERROR_THRESHOLD: u32 = 5;

/// Budget for each re-acquire attempt during a reconnect cycle.
const REDIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between failed reconnect attempts.
const REDIAL_BACKOFF: Duration = Duration::from_secs(3);

/// Per-query outcome reported by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthSignal {
    /// An exchange completed; the error counter resets.
    Reset,
    /// A network step failed; the error counter advances.
    Error,
}

/// Send-only endpoint for health signals.
///
/// Cloned by value into whoever performs exchanges; holding one never
/// blocks and carries no reference back into the pool.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    tx: mpsc::UnboundedSender<HealthSignal>,
}

impl HealthReporter {
    /// Report one outcome. Dropped silently once the pool is gone.
    pub fn report(&self, signal: HealthSignal) {
        let _ = self.tx.send(signal);
    }
}

struct SessionManager {
    connector: Arc<dyn SessionConnector>,
}

#[async_trait]
impl Manager for SessionManager {
    type Type = Box<dyn TunnelSession>;
    type Error = LookupError;

    async fn create(&self) -> Result<Box<dyn TunnelSession>, LookupError> {
        self.connector.connect().await
    }

    async fn recycle(
        &self,
        session: &mut Box<dyn TunnelSession>,
        _metrics: &Metrics,
    ) -> RecycleResult<LookupError> {
        if session.is_closed() {
            Err(managed::RecycleError::Message(
                "tunnel session closed by peer".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

struct PoolShared {
    pool: Pool<SessionManager>,
    err_counter: AtomicU32,
    reconnecting: AtomicBool,
    /// Bumped on every reset; guards acquired under an older epoch are
    /// destroyed instead of returned.
    epoch: AtomicU64,
}

/// Scoped lease of one tunnel session.
///
/// Dropping the guard returns the session to the pool, or destroys it if
/// the pool was reset while the lease was out.
pub struct PoolGuard {
    object: Option<Object<SessionManager>>,
    shared: Arc<PoolShared>,
    epoch: u64,
}

impl std::fmt::Debug for PoolGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

impl PoolGuard {
    /// The leased session.
    #[must_use]
    pub fn session(&self) -> &dyn TunnelSession {
        self.object
            .as_deref()
            .map(|boxed| &**boxed)
            .expect("session present until drop")
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if self.shared.epoch.load(Ordering::Acquire) != self.epoch {
            if let Some(object) = self.object.take() {
                // Stale lease: take the session out of the pool so it is
                // destroyed rather than recycled.
                let _session = Object::take(object);
            }
        }
    }
}

/// Bounded set of live tunnel sessions.
pub struct SessionPool {
    shared: Arc<PoolShared>,
    signal_tx: mpsc::UnboundedSender<HealthSignal>,
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("size", &self.shared.pool.status().size)
            .field("reconnecting", &self.is_reconnecting())
            .field("errors", &self.error_count())
            .finish()
    }
}

impl SessionPool {
    /// Create a pool of up to `size` sessions.
    ///
    /// Construction is strict: one session is dialed immediately to prove
    /// the remote is reachable, then released. An unreachable remote fails
    /// the whole startup.
    ///
    /// # Errors
    ///
    /// Propagates the connector's failure, or `ConnectionTimeout` when the
    /// probe exceeds `init_timeout`.
    pub async fn connect(
        connector: Arc<dyn SessionConnector>,
        size: usize,
        init_timeout: Duration,
    ) -> Result<Self, LookupError> {
        let manager = SessionManager { connector };
        let pool = Pool::builder(manager)
            .max_size(size)
            .build()
            .map_err(|e| LookupError::config(format!("cannot build session pool: {e}")))?;

        let probe = tokio::time::timeout(init_timeout, pool.get())
            .await
            .map_err(|_| LookupError::ConnectionTimeout)?
            .map_err(flatten_pool_error)?;
        drop(probe);

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PoolShared {
            pool,
            err_counter: AtomicU32::new(0),
            reconnecting: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        });

        tokio::spawn(track_signals(Arc::clone(&shared), signal_rx));

        Ok(Self { shared, signal_tx })
    }

    /// A send-only endpoint for reporting exchange outcomes.
    #[must_use]
    pub fn reporter(&self) -> HealthReporter {
        HealthReporter {
            tx: self.signal_tx.clone(),
        }
    }

    /// Lease a session, waiting until one is free or the deadline fires.
    ///
    /// # Errors
    ///
    /// Fails fast with [`LookupError::PoolReconnecting`] while the pool is
    /// resetting, with `ConnectionTimeout` when the deadline fires first,
    /// or with the connector's error when a fresh dial fails.
    pub async fn acquire(&self, ctx: &Deadline) -> Result<PoolGuard, LookupError> {
        if self.shared.reconnecting.load(Ordering::Acquire) {
            debug!("cannot lease a session until the pool has reconnected");
            return Err(LookupError::PoolReconnecting);
        }

        let object = ctx
            .bound(self.shared.pool.get())
            .await?
            .map_err(flatten_pool_error)?;

        Ok(PoolGuard {
            object: Some(object),
            shared: Arc::clone(&self.shared),
            epoch: self.shared.epoch.load(Ordering::Acquire),
        })
    }

    /// Shut the pool down, destroying every session.
    pub fn close(&self) {
        self.shared.pool.close();
    }

    /// Whether the reconnect cycle is running.
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.shared.reconnecting.load(Ordering::Acquire)
    }

    /// Current consecutive error count.
    #[must_use]
    pub fn error_count(&self) -> u32 {
        self.shared.err_counter.load(Ordering::Acquire)
    }
}

fn flatten_pool_error(err: PoolError<LookupError>) -> LookupError {
    match err {
        PoolError::Backend(inner) => inner,
        PoolError::Timeout(_) => LookupError::ConnectionTimeout,
        PoolError::Closed => LookupError::session_msg("session pool is closed"),
        other => LookupError::session_msg(format!("session pool failure: {other}")),
    }
}

/// Consume health signals and drive the reconnect state machine.
async fn track_signals(shared: Arc<PoolShared>, mut rx: mpsc::UnboundedReceiver<HealthSignal>) {
    while let Some(signal) = rx.recv().await {
        if shared.reconnecting.load(Ordering::Acquire) {
            // Signals from queries racing the reset are stale.
            continue;
        }

        match signal {
            HealthSignal::Reset => {
                shared.err_counter.store(0, Ordering::Release);
            }
            HealthSignal::Error => {
                let count = shared.err_counter.fetch_add(1, Ordering::AcqRel) + 1;
                if count >= ERROR_THRESHOLD
                    && shared
                        .reconnecting
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    // Detached so signal consumption never blocks on the
                    // reconnect cycle.
                    tokio::spawn(reconnect(Arc::clone(&shared)));
                }
            }
        }
    }
}

/// Destroy every session and re-dial until the remote answers.
async fn reconnect(shared: Arc<PoolShared>) {
    info!("error threshold reached, resetting the session pool");
    shared.epoch.fetch_add(1, Ordering::AcqRel);
    shared.pool.retain(|_, _| false);

    loop {
        info!("reconnecting");
        match tokio::time::timeout(REDIAL_TIMEOUT, shared.pool.get()).await {
            Ok(Ok(probe)) => {
                drop(probe);
                shared.err_counter.store(0, Ordering::Release);
                shared.reconnecting.store(false, Ordering::Release);
                info!("reconnected");
                return;
            }
            Ok(Err(err)) => warn!(error = %flatten_pool_error(err), "reconnect attempt failed"),
            Err(_) => warn!("reconnect attempt timed out"),
        }
        tokio::time::sleep(REDIAL_BACKOFF).await;
    }
}
