//! The lookup coordinator.
//!
//! [`LookupCoordinator`] resolves one DNS question at a time over the
//! tunnel, in one of two modes selected at construction:
//!
//! - **Forwarding**: a single exchange with the configured upstream
//!   resolver.
//! - **Iterative**: walk the delegation chain downward from the root
//!   servers. Answers lacking the queried type are examined for a CNAME
//!   to chase; delegations are followed through their NS records, using
//!   glue from the additional section or a separate A lookup for the name
//!   server. When the walk errors or the step budget expires, the
//!   configured resolver serves as fallback.
//!
//! Every step runs under the query's [`Deadline`]; each exchange leases a
//! session from the pool, opens a fresh stream, and reports its outcome to
//! the pool's health tracker.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use tracing::debug;

use crate::cache::DnsCache;
use crate::deadline::Deadline;
use crate::error::LookupError;
use crate::hints::RootHints;
use crate::tunnel::{DnsStream, HealthReporter, HealthSignal, SessionPool};

/// Budget for one resolver pass (the root walk, or one fallback attempt).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on delegation and CNAME recursion depth.
pub const MAX_DEPTH: usize = 16;

const DNS_PORT: u16 = 53;

/// Coordinates lookups across the cache, the session pool and upstreams.
pub struct LookupCoordinator {
    cache: Arc<DnsCache>,
    pool: Arc<SessionPool>,
    reporter: HealthReporter,
    roots: Vec<Ipv4Addr>,
    fallback: Ipv4Addr,
    recursive: bool,
}

impl std::fmt::Debug for LookupCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupCoordinator")
            .field("roots", &self.roots.len())
            .field("fallback", &self.fallback)
            .field("recursive", &self.recursive)
            .finish()
    }
}

impl LookupCoordinator {
    /// Build a coordinator, seeding the cache with the root hints.
    #[must_use]
    pub fn new(
        cache: Arc<DnsCache>,
        pool: Arc<SessionPool>,
        hints: &RootHints,
        fallback: Ipv4Addr,
        recursive: bool,
    ) -> Self {
        hints.seed(&cache);
        Self::with_roots(cache, pool, hints.addrs(), fallback, recursive)
    }

    /// Build a coordinator with an explicit root address list.
    #[must_use]
    pub fn with_roots(
        cache: Arc<DnsCache>,
        pool: Arc<SessionPool>,
        roots: Vec<Ipv4Addr>,
        fallback: Ipv4Addr,
        recursive: bool,
    ) -> Self {
        let reporter = pool.reporter();
        Self {
            cache,
            pool,
            reporter,
            roots,
            fallback,
            recursive,
        }
    }

    /// Consult the cache without touching the network.
    #[must_use]
    pub fn cache_lookup(&self, req: &Message) -> Option<Message> {
        self.cache.get(req)
    }

    /// Resolve `msg`, returning an answer message.
    ///
    /// # Errors
    ///
    /// In forwarding mode, the single exchange's error. In iterative mode,
    /// a fallback failure wrapped in [`LookupError::DomainNotFound`].
    pub async fn handle(&self, msg: &Message) -> Result<Message, LookupError> {
        if !self.recursive {
            let ctx = Deadline::after(DEFAULT_TIMEOUT);
            return self.handle_one(ctx, msg, self.fallback, 0).await;
        }

        let ctx = Deadline::after(DEFAULT_TIMEOUT);
        match self.try_from_roots(ctx, msg, 0).await {
            Ok(rsp) => Ok(rsp),
            Err(err) => {
                let name = first_question_name(msg);
                if err.is_timeout() {
                    debug!(%name, "root walk exhausted its budget, trying the fallback resolver");
                } else {
                    debug!(%name, error = %err, "root walk failed, trying the fallback resolver");
                }

                let ctx = Deadline::after(DEFAULT_TIMEOUT);
                self.handle_one(ctx, msg, self.fallback, 0)
                    .await
                    .map_err(|fallback_err| LookupError::domain_not_found(name, fallback_err))
            }
        }
    }

    /// One resolution step against one server.
    ///
    /// Exchanges `msg` with `server`; an answer section is validated
    /// against the question (and cached), anything else is treated as a
    /// delegation to follow.
    fn handle_one<'a>(
        &'a self,
        ctx: Deadline,
        msg: &'a Message,
        server: Ipv4Addr,
        depth: usize,
    ) -> BoxFuture<'a, Result<Message, LookupError>> {
        async move {
            ctx.check()?;
            if depth > MAX_DEPTH {
                return Err(LookupError::RecursionLimit {
                    name: first_question_name(msg),
                });
            }

            let rsp = self.exchange(ctx, msg, server).await?;

            if !rsp.answers().is_empty() {
                match self
                    .assert_answer_for_question(ctx, msg, rsp.clone(), depth)
                    .await
                {
                    Ok(answer) => {
                        self.cache.set(msg, &answer);
                        return Ok(answer);
                    }
                    Err(err) => {
                        debug!(%server, error = %err, "answer did not satisfy the question");
                    }
                }
            }

            self.use_next_ns(ctx, msg, &rsp, depth).await
        }
        .boxed()
    }

    /// Write `msg` to `server` through a fresh tunnel stream and read the
    /// response, reporting the outcome to the pool.
    async fn exchange(
        &self,
        ctx: Deadline,
        msg: &Message,
        server: Ipv4Addr,
    ) -> Result<Message, LookupError> {
        let guard = self.pool.acquire(&ctx).await?;
        let target = SocketAddrV4::new(server, DNS_PORT);

        let outcome = async {
            let stream = ctx
                .bound(guard.session().open_stream(target))
                .await
                .and_then(|dialed| dialed)?;

            let mut conn = DnsStream::new(stream);
            conn.write_message_deadline(&ctx, msg).await?;
            conn.read_message_deadline(&ctx).await
        }
        .await;

        match outcome {
            Ok(rsp) => {
                self.reporter.report(HealthSignal::Reset);
                Ok(rsp)
            }
            Err(err) => {
                // Transient network failures feed the health counter; a
                // hard error says nothing about the tunnel itself.
                if err.is_recoverable() {
                    self.reporter.report(HealthSignal::Error);
                }
                Err(err)
            }
        }
    }

    /// Follow a delegation: try every authority record's name server.
    ///
    /// Soft failures (an unusable authority record, a name server without
    /// glue) are recorded and the iteration moves on; anything else
    /// terminates the walk.
    fn use_next_ns<'a>(
        &'a self,
        ctx: Deadline,
        msg: &'a Message,
        response: &'a Message,
        depth: usize,
    ) -> BoxFuture<'a, Result<Message, LookupError>> {
        async move {
            let mut last_err: Option<LookupError> = None;

            for authority in response.name_servers() {
                ctx.check()?;

                let ns_name = match next_ns_name(authority) {
                    Ok(name) => name,
                    Err(err) if err.is_soft() => {
                        debug!(record = %authority, "authority record is not an NS");
                        last_err = Some(err);
                        continue;
                    }
                    Err(err) => return Err(err),
                };

                let glue = match self.glue_for(ctx, &ns_name, response, depth).await {
                    Ok(glue) => glue,
                    Err(err) if err.is_soft() => {
                        debug!(ns = %ns_name, "no glue addresses for NS");
                        last_err = Some(err);
                        continue;
                    }
                    Err(err) => return Err(err),
                };

                for addr in glue {
                    ctx.check()?;
                    match self.handle_one(ctx, msg, addr, depth + 1).await {
                        Ok(result) if !result.answers().is_empty() => return Ok(result),
                        Ok(_) => {}
                        Err(err) => last_err = Some(err),
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| LookupError::MissingResponse {
                name: first_question_name(msg),
            }))
        }
        .boxed()
    }

    /// Resolve a name server to glue addresses.
    ///
    /// Prefers A records in the delegation's additional section; without
    /// any, issues a separate A lookup for the name server, consulting
    /// the cache first. A name server that resolves to nothing yields the
    /// soft [`LookupError::NoGlueRecords`].
    async fn glue_for(
        &self,
        ctx: Deadline,
        ns_name: &Name,
        response: &Message,
        depth: usize,
    ) -> Result<Vec<Ipv4Addr>, LookupError> {
        let (glue, scanned): (Vec<Ipv4Addr>, Vec<String>) =
            if response.additionals().is_empty() {
                let sub = question_for(ns_name);
                let answer = match self.cache.get(&sub) {
                    Some(cached) => cached,
                    None => self.try_from_roots(ctx, &sub, depth + 1).await?,
                };

                (
                    answer
                        .answers()
                        .iter()
                        .filter_map(|record| match record.data() {
                            Some(RData::A(a)) => Some(a.0),
                            _ => None,
                        })
                        .collect(),
                    answer.additionals().iter().map(ToString::to_string).collect(),
                )
            } else {
                (
                    response
                        .additionals()
                        .iter()
                        .filter_map(|record| match record.data() {
                            Some(RData::A(a)) if record.name() == ns_name => Some(a.0),
                            _ => None,
                        })
                        .collect(),
                    response
                        .additionals()
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                )
            };

        if glue.is_empty() {
            return Err(LookupError::NoGlueRecords {
                ns: ns_name.to_string(),
                additionals: scanned,
            });
        }
        Ok(glue)
    }

    /// Try each root server in turn until one produces answers.
    fn try_from_roots<'a>(
        &'a self,
        ctx: Deadline,
        msg: &'a Message,
        depth: usize,
    ) -> BoxFuture<'a, Result<Message, LookupError>> {
        async move {
            let mut last_err: Option<LookupError> = None;

            for root in &self.roots {
                ctx.check()?;
                match self.handle_one(ctx, msg, *root, depth).await {
                    Ok(rsp) if !rsp.answers().is_empty() => return Ok(rsp),
                    Ok(_) => {}
                    Err(err) => last_err = Some(err),
                }
            }

            Err(last_err.unwrap_or_else(|| LookupError::MissingResponse {
                name: first_question_name(msg),
            }))
        }
        .boxed()
    }

    /// Check that an answer satisfies the question, chasing a leading
    /// CNAME that arrived without its target address.
    fn assert_answer_for_question<'a>(
        &'a self,
        ctx: Deadline,
        question: &'a Message,
        mut answer: Message,
        depth: usize,
    ) -> BoxFuture<'a, Result<Message, LookupError>> {
        async move {
            ctx.check()?;

            let qtype = question
                .queries()
                .first()
                .map_or(RecordType::A, Query::query_type);

            if answer.answers().iter().any(|r| r.record_type() == qtype) {
                return Ok(answer);
            }

            let leading_cname = match answer.answers().first().and_then(|r| r.data()) {
                Some(RData::CNAME(cname)) => Some(cname.0.clone()),
                _ => None,
            };

            if let Some(target) = leading_cname {
                let has_a = answer
                    .answers()
                    .iter()
                    .any(|r| r.record_type() == RecordType::A);
                if !has_a {
                    if depth >= MAX_DEPTH {
                        return Err(LookupError::RecursionLimit {
                            name: target.to_string(),
                        });
                    }
                    let sub = question_for(&target);
                    let chased = self.try_from_roots(ctx, &sub, depth + 1).await?;
                    for record in chased.answers() {
                        answer.add_answer(record.clone());
                    }
                }
            }

            Ok(answer)
        }
        .boxed()
    }
}

/// The server a delegation record names: the NS target, or the SOA
/// origin name server.
fn next_ns_name(authority: &Record) -> Result<Name, LookupError> {
    match authority.data() {
        Some(RData::NS(ns)) => Ok(ns.0.clone()),
        Some(RData::SOA(soa)) => Ok(soa.mname().clone()),
        _ => Err(LookupError::AuthorityNotNs {
            record: authority.to_string(),
        }),
    }
}

/// Build an A question for `name` with a fresh id.
fn question_for(name: &Name) -> Message {
    let mut msg = Message::new();
    msg.set_id(rand::random());
    msg.set_recursion_desired(true);
    msg.add_query(Query::query(name.clone(), RecordType::A));
    msg
}

/// The first question's name, or the root for question-less messages.
pub(crate) fn first_question_name(msg: &Message) -> String {
    msg.queries()
        .first()
        .map_or_else(|| ".".to_string(), |q| q.name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::testing::{answer_with_a, MockConnector};
    use hickory_proto::op::MessageType;
    use hickory_proto::rr::rdata::{A, CNAME, NS, SOA};
    use hickory_proto::rr::Record;
    use std::str::FromStr;

    const ROOT: Ipv4Addr = Ipv4Addr::new(198, 41, 0, 4);
    const GTLD: Ipv4Addr = Ipv4Addr::new(192, 5, 6, 30);
    const AUTH: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);
    const FALLBACK: Ipv4Addr = Ipv4Addr::new(9, 9, 9, 9);

    fn name(s: &str) -> Name {
        Name::from_str(s).unwrap()
    }

    fn query(qname: &str) -> Message {
        let mut msg = Message::new();
        msg.set_id(0x2345);
        msg.add_query(Query::query(name(qname), RecordType::A));
        msg
    }

    /// A delegation response: NS record in authority, glue in additional.
    fn delegation(req: &Message, zone: &str, ns: &str, glue: Option<Ipv4Addr>) -> Message {
        let mut rsp = Message::new();
        rsp.set_id(req.id());
        rsp.set_message_type(MessageType::Response);
        for q in req.queries() {
            rsp.add_query(q.clone());
        }
        rsp.add_name_server(Record::from_rdata(
            name(zone),
            172_800,
            RData::NS(NS(name(ns))),
        ));
        if let Some(addr) = glue {
            rsp.add_additional(Record::from_rdata(name(ns), 172_800, RData::A(A(addr))));
        }
        rsp
    }

    async fn build(
        connector: &std::sync::Arc<MockConnector>,
        roots: Vec<Ipv4Addr>,
        recursive: bool,
        cache: Arc<DnsCache>,
    ) -> LookupCoordinator {
        let pool = Arc::new(
            SessionPool::connect(connector.clone_arc(), 2, Duration::from_secs(1))
                .await
                .unwrap(),
        );
        LookupCoordinator::with_roots(cache, pool, roots, FALLBACK, recursive)
    }

    fn dialed_ips(connector: &MockConnector) -> Vec<Ipv4Addr> {
        connector.dials().iter().map(|a| *a.ip()).collect()
    }

    // ========================================================================
    // Forwarding mode
    // ========================================================================

    #[tokio::test]
    async fn test_forwarding_single_exchange() {
        let connector = MockConnector::answering_a();
        let cache = Arc::new(DnsCache::new(128));
        let coordinator = build(&connector, vec![], false, Arc::clone(&cache)).await;

        let req = query("example.com.");
        let rsp = coordinator.handle(&req).await.unwrap();

        assert_eq!(rsp.answers().len(), 1);
        assert_eq!(dialed_ips(&connector), vec![FALLBACK]);
        assert_eq!(connector.exchanges(), 1);
        assert!(cache.get(&req).is_some(), "answer cached after the lookup");
    }

    #[tokio::test]
    async fn test_forwarding_error_is_not_wrapped() {
        let connector = MockConnector::answering_a();
        connector.refuse_streams(true);
        let coordinator =
            build(&connector, vec![], false, Arc::new(DnsCache::disabled())).await;

        let err = coordinator.handle(&query("example.com.")).await.unwrap_err();
        assert!(matches!(err, LookupError::Dial { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarding_times_out_on_silent_upstream() {
        let connector = MockConnector::new(|_, _| None);
        let coordinator =
            build(&connector, vec![], false, Arc::new(DnsCache::disabled())).await;

        let err = coordinator.handle(&query("example.com.")).await.unwrap_err();
        assert!(err.is_timeout());
    }

    // ========================================================================
    // Iterative walk
    // ========================================================================

    #[tokio::test]
    async fn test_iterative_walk_follows_delegations() {
        let connector = MockConnector::new(move |target, req| {
            let ip = *target.ip();
            let rsp = if ip == ROOT {
                delegation(req, "com.", "a.gtld-servers.net.", Some(GTLD))
            } else if ip == GTLD {
                delegation(req, "example.com.", "ns.example.com.", Some(AUTH))
            } else if ip == AUTH {
                answer_with_a(req, AUTH, 300)
            } else {
                panic!("unexpected dial to {ip}")
            };
            Some(rsp)
        });
        let cache = Arc::new(DnsCache::new(128));
        let coordinator = build(&connector, vec![ROOT], true, Arc::clone(&cache)).await;

        let rsp = coordinator.handle(&query("example.com.")).await.unwrap();

        assert_eq!(rsp.answers().len(), 1);
        assert!(matches!(
            rsp.answers()[0].data(),
            Some(RData::A(A(addr))) if *addr == AUTH
        ));
        assert_eq!(
            dialed_ips(&connector),
            vec![ROOT, GTLD, AUTH],
            "each step queries the IP advertised by the prior delegation"
        );
    }

    #[tokio::test]
    async fn test_delegation_without_glue_resolves_ns_separately() {
        let ns_addr = Ipv4Addr::new(10, 0, 0, 5);
        let connector = MockConnector::new(move |target, req| {
            let ip = *target.ip();
            let qname = req.queries().first().unwrap().name().to_string();
            let rsp = if ip == ROOT && qname == "example.com." {
                delegation(req, "example.com.", "ns.example.com.", None)
            } else if ip == ROOT && qname == "ns.example.com." {
                answer_with_a(req, ns_addr, 300)
            } else if ip == ns_addr && qname == "example.com." {
                answer_with_a(req, AUTH, 300)
            } else {
                panic!("unexpected exchange with {ip} for {qname}")
            };
            Some(rsp)
        });
        let coordinator =
            build(&connector, vec![ROOT], true, Arc::new(DnsCache::new(128))).await;

        let rsp = coordinator.handle(&query("example.com.")).await.unwrap();
        assert_eq!(rsp.answers().len(), 1);
        assert_eq!(dialed_ips(&connector), vec![ROOT, ROOT, ns_addr]);
    }

    #[tokio::test]
    async fn test_soa_authority_names_the_next_server() {
        let connector = MockConnector::new(move |target, req| {
            let ip = *target.ip();
            let rsp = if ip == ROOT {
                let mut rsp = Message::new();
                rsp.set_message_type(MessageType::Response);
                for q in req.queries() {
                    rsp.add_query(q.clone());
                }
                rsp.add_name_server(Record::from_rdata(
                    name("example.com."),
                    3600,
                    RData::SOA(SOA::new(
                        name("ns.example.com."),
                        name("hostmaster.example.com."),
                        2024,
                        7200,
                        3600,
                        1_209_600,
                        3600,
                    )),
                ));
                rsp.add_additional(Record::from_rdata(
                    name("ns.example.com."),
                    3600,
                    RData::A(A(AUTH)),
                ));
                rsp
            } else if ip == AUTH {
                answer_with_a(req, AUTH, 300)
            } else {
                panic!("unexpected dial to {ip}")
            };
            Some(rsp)
        });
        let coordinator =
            build(&connector, vec![ROOT], true, Arc::new(DnsCache::new(128))).await;

        let rsp = coordinator.handle(&query("example.com.")).await.unwrap();
        assert_eq!(rsp.answers().len(), 1);
        assert_eq!(dialed_ips(&connector), vec![ROOT, AUTH]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unusable_authority_is_recorded() {
        // The only authority record is an A record, which cannot name the
        // next server; the walk exhausts and the fallback hangs.
        let connector = MockConnector::new(move |target, req| {
            if *target.ip() == FALLBACK {
                return None;
            }
            let mut rsp = Message::new();
            rsp.set_message_type(MessageType::Response);
            for q in req.queries() {
                rsp.add_query(q.clone());
            }
            rsp.add_name_server(Record::from_rdata(
                name("example.com."),
                300,
                RData::A(A(AUTH)),
            ));
            Some(rsp)
        });
        let coordinator =
            build(&connector, vec![ROOT], true, Arc::new(DnsCache::disabled())).await;

        let err = coordinator.handle(&query("example.com.")).await.unwrap_err();
        let LookupError::DomainNotFound { source, .. } = err else {
            panic!("expected DomainNotFound, got {err}");
        };
        assert!(source.is_timeout(), "fallback hang surfaces as timeout");
    }

    // ========================================================================
    // CNAME chasing
    // ========================================================================

    #[tokio::test]
    async fn test_cname_without_a_is_chased() {
        let connector = MockConnector::new(move |_, req| {
            let qname = req.queries().first().unwrap().name().to_string();
            let rsp = match qname.as_str() {
                "example.com." => {
                    let mut rsp = Message::new();
                    rsp.set_message_type(MessageType::Response);
                    for q in req.queries() {
                        rsp.add_query(q.clone());
                    }
                    rsp.add_answer(Record::from_rdata(
                        name("example.com."),
                        300,
                        RData::CNAME(CNAME(name("www.example.net."))),
                    ));
                    rsp
                }
                "www.example.net." => answer_with_a(req, AUTH, 300),
                other => panic!("unexpected query for {other}"),
            };
            Some(rsp)
        });
        let coordinator =
            build(&connector, vec![ROOT], true, Arc::new(DnsCache::new(128))).await;

        let rsp = coordinator.handle(&query("example.com.")).await.unwrap();

        let types: Vec<RecordType> = rsp.answers().iter().map(Record::record_type).collect();
        assert_eq!(types, vec![RecordType::CNAME, RecordType::A]);
    }

    #[tokio::test]
    async fn test_cname_with_accompanying_a_returned_as_is() {
        let connector = MockConnector::new(move |_, req| {
            // A CNAME first, but an A record that already satisfies the
            // question accompanies it.
            let mut rsp = Message::new();
            rsp.set_message_type(MessageType::Response);
            for q in req.queries() {
                rsp.add_query(q.clone());
            }
            rsp.add_answer(Record::from_rdata(
                name("example.com."),
                300,
                RData::CNAME(CNAME(name("www.example.net."))),
            ));
            rsp.add_answer(Record::from_rdata(name("example.com."), 300, RData::A(A(AUTH))));
            Some(rsp)
        });
        let coordinator =
            build(&connector, vec![ROOT], true, Arc::new(DnsCache::new(128))).await;

        let rsp = coordinator.handle(&query("example.com.")).await.unwrap();
        assert_eq!(rsp.answers().len(), 2);
        assert_eq!(connector.exchanges(), 1, "no chase when the A is present");
    }

    // ========================================================================
    // Fallback
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_fallback_serves_when_roots_hang() {
        let connector = MockConnector::new(move |target, req| {
            if *target.ip() == FALLBACK {
                Some(answer_with_a(req, AUTH, 300))
            } else {
                None
            }
        });
        let coordinator =
            build(&connector, vec![ROOT], true, Arc::new(DnsCache::new(128))).await;

        let rsp = coordinator.handle(&query("example.com.")).await.unwrap();
        assert_eq!(rsp.answers().len(), 1);
        assert_eq!(dialed_ips(&connector).last(), Some(&FALLBACK));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_failure_wraps_domain_not_found() {
        let connector = MockConnector::new(|_, _| None);
        let coordinator =
            build(&connector, vec![ROOT], true, Arc::new(DnsCache::disabled())).await;

        let err = coordinator.handle(&query("example.com.")).await.unwrap_err();
        assert!(matches!(
            err,
            LookupError::DomainNotFound { ref name, .. } if name == "example.com."
        ));
    }

    // ========================================================================
    // Pool health integration
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_failed_exchanges_trip_the_pool() {
        let connector = MockConnector::answering_a();
        let pool = Arc::new(
            SessionPool::connect(connector.clone_arc(), 2, Duration::from_secs(1))
                .await
                .unwrap(),
        );
        let coordinator = LookupCoordinator::with_roots(
            Arc::new(DnsCache::disabled()),
            Arc::clone(&pool),
            vec![],
            FALLBACK,
            false,
        );

        // Streams die mid-exchange and the remote refuses fresh sessions,
        // so the reconnect cycle cannot finish on its own.
        connector.close_streams(true);
        connector.refuse_sessions(true);

        for _ in 0..crate::tunnel::ERROR_THRESHOLD {
            let err = coordinator.handle(&query("example.com.")).await.unwrap_err();
            assert!(err.is_recoverable(), "expected a network failure: {err}");
        }
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }

        assert!(pool.is_reconnecting());
        let err = coordinator.handle(&query("example.com.")).await.unwrap_err();
        assert!(err.is_reconnecting(), "queries fail fast mid-reconnect");
    }

    // ========================================================================
    // Cache interplay
    // ========================================================================

    #[tokio::test]
    async fn test_cache_lookup_after_resolution() {
        let connector = MockConnector::answering_a();
        let cache = Arc::new(DnsCache::new(128));
        let coordinator = build(&connector, vec![], false, Arc::clone(&cache)).await;

        let req = query("example.com.");
        coordinator.handle(&req).await.unwrap();

        let hit = coordinator.cache_lookup(&req).expect("cached");
        assert_eq!(hit.answers().len(), 1);
    }
}
