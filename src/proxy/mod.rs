//! UDP front-end.
//!
//! The proxy binds the datagram socket, parses incoming queries and
//! answers them from the cache when it can. Misses are deduplicated
//! through a single-flight group keyed by the question set; each flight
//! leader submits the lookup to a bounded worker pool and publishes the
//! outcome to every waiter. One line is logged per completed request.
//!
//! ```text
//! datagram ──▶ parse ──▶ cache ──hit──▶ reply
//!                          │miss
//!                          ▼
//!                   single-flight ──▶ worker pool ──▶ LookupCoordinator
//! ```
//!
//! Failed lookups produce a SERVFAIL reply; a lookup that yields neither
//! response nor error is logged as an internal fault and left unanswered.

pub mod flight;
pub mod workers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, ResponseCode};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::cache::QuestionKey;
use crate::config::Config;
use crate::error::LookupError;
use crate::resolver::{first_question_name, LookupCoordinator};
use crate::tunnel::SessionPool;

pub use flight::{FlightGroup, FlightResult};
pub use workers::WorkerPool;

/// Largest datagram accepted from a client.
const MAX_DATAGRAM_SIZE: usize = 4096;

/// Grace period for draining in-flight work at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Consecutive receive failures treated as a broken socket.
const RECV_ERROR_THRESHOLD: u32 = 10;

/// One lookup handed to the worker pool.
///
/// The worker sends exactly one value on exactly one of the two channels.
struct ProxyRequest {
    message: Message,
    rsp_tx: mpsc::Sender<Message>,
    err_tx: mpsc::Sender<LookupError>,
}

/// The datagram listener and request dispatcher.
pub struct Proxy {
    socket: UdpSocket,
    coordinator: Arc<LookupCoordinator>,
    pool: Arc<SessionPool>,
    flights: FlightGroup,
    workers: WorkerPool,
    requests: TaskTracker,
    stop: CancellationToken,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("local_addr", &self.local_addr)
            .field("workers", &self.workers.capacity())
            .field("in_flight", &self.flights.in_flight())
            .finish()
    }
}

impl Proxy {
    /// Bind the listener socket and assemble the front-end.
    ///
    /// The worker pool is sized at twice the session pool so lookups keep
    /// every session busy without unbounded queueing.
    ///
    /// # Errors
    ///
    /// Fails when the bind address is unavailable.
    pub async fn bind(
        config: &Config,
        coordinator: Arc<LookupCoordinator>,
        pool: Arc<SessionPool>,
    ) -> Result<Arc<Self>, LookupError> {
        let socket = UdpSocket::bind(config.bind_addr).await.map_err(|e| {
            LookupError::config(format!("cannot bind {}: {e}", config.bind_addr))
        })?;
        let local_addr = socket.local_addr().map_err(|e| {
            LookupError::config(format!("cannot read the bound address: {e}"))
        })?;

        Ok(Arc::new(Self {
            socket,
            coordinator,
            pool,
            flights: FlightGroup::new(),
            workers: WorkerPool::new(config.workers * 2),
            requests: TaskTracker::new(),
            stop: CancellationToken::new(),
            local_addr,
        }))
    }

    /// The bound listener address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept datagrams until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket fails repeatedly; transient
    /// receive failures are logged and skipped.
    pub async fn listen_and_serve(self: &Arc<Self>) -> Result<(), LookupError> {
        info!(addr = %self.local_addr, "accepting DNS queries");
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut consecutive_errors: u32 = 0;

        loop {
            let (len, peer) = tokio::select! {
                () = self.stop.cancelled() => return Ok(()),
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(pair) => pair,
                    Err(err) => {
                        consecutive_errors += 1;
                        if consecutive_errors >= RECV_ERROR_THRESHOLD {
                            error!(error = %err, "datagram socket is broken, giving up");
                            return Err(LookupError::config(format!(
                                "datagram socket failed: {err}"
                            )));
                        }
                        warn!(error = %err, "cannot read datagram");
                        continue;
                    }
                },
            };
            consecutive_errors = 0;

            match Message::from_vec(&buf[..len]) {
                Ok(query) => {
                    let proxy = Arc::clone(self);
                    self.requests.spawn(async move {
                        proxy.handle_request(peer, query).await;
                    });
                }
                Err(err) => debug!(%peer, error = %err, "dropping malformed datagram"),
            }
        }
    }

    /// Stop accepting, drain in-flight work, close the session pool.
    pub async fn shutdown(&self) {
        info!("stop listening");
        self.stop.cancel();

        info!("waiting for workers to finish");
        self.requests.close();
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            self.requests.wait().await;
            self.workers.wait().await;
        })
        .await;
        if drained.is_err() {
            warn!("shutdown grace period expired with lookups in flight");
        }

        info!("closing tunnel sessions");
        self.pool.close();
    }

    /// Serve one parsed query and write the reply datagram.
    async fn handle_request(self: Arc<Self>, peer: SocketAddr, query: Message) {
        let started = Instant::now();

        let Some(key) = QuestionKey::from_message(&query) else {
            debug!(%peer, "dropping query without a question");
            return;
        };

        let cached = self.coordinator.cache_lookup(&query);
        let hit = cached.is_some();

        let outcome: FlightResult = match cached {
            Some(msg) => Ok(msg),
            None => self.resolve_deduplicated(&key, &query).await,
        };
        let elapsed = started.elapsed();

        let mut reply = reply_skeleton(&query);
        match outcome {
            Ok(msg) => {
                splice_sections(&mut reply, &msg);
                log_request(&reply, hit, elapsed);
                self.send_reply(peer, &reply).await;
            }
            Err(err) if err.is_internal() => {
                error!(%peer, error = %err, "lookup produced nothing; not replying");
            }
            Err(err) => {
                if err.is_reconnecting() {
                    warn!(%peer, "tunnel pool is reconnecting, answering SERVFAIL");
                } else if err.is_recoverable() {
                    debug!(%peer, error = %err, "lookup failed");
                } else {
                    warn!(%peer, error = %err, "lookup failed");
                }
                reply.set_response_code(ResponseCode::ServFail);
                log_request(&reply, hit, elapsed);
                self.send_reply(peer, &reply).await;
            }
        }
    }

    /// Run the lookup through the single-flight group and worker pool.
    async fn resolve_deduplicated(&self, key: &QuestionKey, query: &Message) -> FlightResult {
        self.flights
            .run(key, || async {
                let (rsp_tx, mut rsp_rx) = mpsc::channel(1);
                let (err_tx, mut err_rx) = mpsc::channel(1);
                let request = ProxyRequest {
                    message: query.clone(),
                    rsp_tx,
                    err_tx,
                };

                let coordinator = Arc::clone(&self.coordinator);
                self.workers
                    .submit(async move { run_lookup(coordinator, request).await })
                    .await;

                tokio::select! {
                    Some(rsp) = rsp_rx.recv() => Ok(rsp),
                    Some(err) = err_rx.recv() => Err(err),
                    else => Err(LookupError::MissingResponse {
                        name: first_question_name(query),
                    }),
                }
            })
            .await
    }

    async fn send_reply(&self, peer: SocketAddr, reply: &Message) {
        let bytes = match reply.to_vec() {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(%peer, error = %err, "cannot serialize reply");
                return;
            }
        };
        if let Err(err) = self.socket.send_to(&bytes, peer).await {
            error!(%peer, error = %err, "cannot send reply");
        }
    }
}

/// Execute one lookup and signal exactly one of the request's channels.
async fn run_lookup(coordinator: Arc<LookupCoordinator>, request: ProxyRequest) {
    match coordinator.handle(&request.message).await {
        Ok(rsp) => {
            let _ = request.rsp_tx.send(rsp).await;
        }
        Err(err) => {
            let _ = request.err_tx.send(err).await;
        }
    }
}

/// An empty reply mirroring the request's id, opcode and questions.
fn reply_skeleton(query: &Message) -> Message {
    let mut reply = Message::new();
    reply.set_id(query.id());
    reply.set_message_type(MessageType::Response);
    reply.set_op_code(query.op_code());
    reply.set_recursion_desired(query.recursion_desired());
    reply.set_recursion_available(true);
    for q in query.queries() {
        reply.add_query(q.clone());
    }
    reply
}

/// Copy the non-empty sections of `msg` into `reply`.
fn splice_sections(reply: &mut Message, msg: &Message) {
    for record in msg.answers() {
        reply.add_answer(record.clone());
    }
    for record in msg.name_servers() {
        reply.add_name_server(record.clone());
    }
    for record in msg.additionals() {
        reply.add_additional(record.clone());
    }
}

/// One line per completed request: hit marker, id, type, name, elapsed.
fn log_request(reply: &Message, hit: bool, elapsed: Duration) {
    for q in reply.queries() {
        info!(
            "[{}] ({:>5}) {:>5} {} {:.1?}",
            if hit { "H" } else { "M" },
            reply.id(),
            q.query_type().to_string(),
            q.name(),
            elapsed,
        );
    }
}
