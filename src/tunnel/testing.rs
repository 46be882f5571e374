//! Scripted in-memory tunnel sessions for tests.
//!
//! [`MockConnector`] implements [`SessionConnector`] and produces sessions
//! whose streams are duplex pipes served by a responder closure. Tests
//! script upstream behavior per dialed address: answer, delegate, or hang.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{RData, Record};
use tokio::io::DuplexStream;

use super::session::{SessionConnector, TunnelSession, TunnelStream};
use super::stream::DnsStream;
use crate::error::LookupError;

/// Decide the upstream response for a request dialed to `target`.
///
/// Returning `None` makes the upstream hang forever, which is how tests
/// exercise deadline expiry.
pub type Responder = dyn Fn(SocketAddrV4, &Message) -> Option<Message> + Send + Sync;

struct MockState {
    responder: Arc<Responder>,
    refuse_sessions: AtomicBool,
    refuse_streams: AtomicBool,
    close_streams: AtomicBool,
    response_delay: Mutex<Duration>,
    dials: Mutex<Vec<SocketAddrV4>>,
    exchanges: AtomicUsize,
    sessions_built: AtomicUsize,
}

/// A scripted session factory.
///
/// All knobs are live: toggling them affects sessions that already exist.
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    /// Build a connector with a custom responder.
    pub fn new(
        responder: impl Fn(SocketAddrV4, &Message) -> Option<Message> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(MockState {
                responder: Arc::new(responder),
                refuse_sessions: AtomicBool::new(false),
                refuse_streams: AtomicBool::new(false),
                close_streams: AtomicBool::new(false),
                response_delay: Mutex::new(Duration::ZERO),
                dials: Mutex::new(Vec::new()),
                exchanges: AtomicUsize::new(0),
                sessions_built: AtomicUsize::new(0),
            }),
        })
    }

    /// Connector whose upstream answers every query with one A record
    /// (`93.184.216.34`, TTL 300) for the queried name.
    pub fn answering_a() -> Arc<Self> {
        Self::new(|_, req| Some(answer_with_a(req, Ipv4Addr::new(93, 184, 216, 34), 300)))
    }

    /// Upcast to the connector trait object the pool expects.
    pub fn clone_arc(self: &Arc<Self>) -> Arc<dyn SessionConnector> {
        Arc::clone(self) as Arc<dyn SessionConnector>
    }

    /// Make [`SessionConnector::connect`] fail until cleared.
    pub fn refuse_sessions(&self, refuse: bool) {
        self.state.refuse_sessions.store(refuse, Ordering::Release);
    }

    /// Make every stream dial fail until cleared.
    pub fn refuse_streams(&self, refuse: bool) {
        self.state.refuse_streams.store(refuse, Ordering::Release);
    }

    /// Make every dialed stream die before the exchange completes.
    pub fn close_streams(&self, close: bool) {
        self.state.close_streams.store(close, Ordering::Release);
    }

    /// Delay every scripted response by `delay`.
    pub fn set_response_delay(&self, delay: Duration) {
        *self.state.response_delay.lock().unwrap() = delay;
    }

    /// Every address dialed through any session, in order.
    pub fn dials(&self) -> Vec<SocketAddrV4> {
        self.state.dials.lock().unwrap().clone()
    }

    /// Number of upstream requests read by scripted servers.
    pub fn exchanges(&self) -> usize {
        self.state.exchanges.load(Ordering::Acquire)
    }

    /// Number of sessions the pool created.
    pub fn sessions_built(&self) -> usize {
        self.state.sessions_built.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn TunnelSession>, LookupError> {
        if self.state.refuse_sessions.load(Ordering::Acquire) {
            return Err(LookupError::session_msg("mock remote is unreachable"));
        }
        self.state.sessions_built.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MockSession {
    state: Arc<MockState>,
    closed: AtomicBool,
}

#[async_trait]
impl TunnelSession for MockSession {
    async fn open_stream(&self, target: SocketAddrV4) -> Result<TunnelStream, LookupError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LookupError::dial(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "session closed",
            )));
        }
        if self.state.refuse_streams.load(Ordering::Acquire) {
            return Err(LookupError::dial(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "mock stream refused",
            )));
        }

        self.state.dials.lock().unwrap().push(target);

        let (client, server) = tokio::io::duplex(65536);
        if self.state.close_streams.load(Ordering::Acquire) {
            drop(server);
        } else {
            tokio::spawn(serve_scripted(server, Arc::clone(&self.state), target));
        }
        Ok(Box::new(client))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

async fn serve_scripted(stream: DuplexStream, state: Arc<MockState>, target: SocketAddrV4) {
    let mut conn = DnsStream::new(stream);
    loop {
        let Ok(req) = conn.read_message().await else {
            return;
        };
        state.exchanges.fetch_add(1, Ordering::AcqRel);

        match (state.responder)(target, &req) {
            Some(mut rsp) => {
                rsp.set_id(req.id());
                let delay = *state.response_delay.lock().unwrap();
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                if conn.write_message(&rsp).await.is_err() {
                    return;
                }
            }
            // Hang: keep the stream open without ever responding.
            None => std::future::pending::<()>().await,
        }
    }
}

/// Build a response to `req` carrying one A record for the queried name.
pub fn answer_with_a(req: &Message, addr: Ipv4Addr, ttl: u32) -> Message {
    let mut rsp = Message::new();
    rsp.set_id(req.id());
    rsp.set_message_type(MessageType::Response);
    for q in req.queries() {
        rsp.add_query(q.clone());
    }
    if let Some(q) = req.queries().first() {
        rsp.add_answer(Record::from_rdata(q.name().clone(), ttl, RData::A(A(addr))));
    }
    rsp
}
