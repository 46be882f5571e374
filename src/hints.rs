//! Embedded root name server hints.
//!
//! The table below is the IANA `named.root` zone data. It is parsed once at
//! startup: the A records seed the answer cache and their addresses become
//! the entry points for iterative resolution.

use std::net::Ipv4Addr;

use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record};
use tracing::debug;

use crate::cache::DnsCache;

/// IANA root hints, `named.root` format.
const ROOT_HINTS: &str = r#";       This file holds the information on root name servers needed to
;       initialize cache of Internet domain name servers
;       (e.g. reference this file in the "cache  .  <file>"
;       configuration file of BIND domain name servers).
;
;       related version of root zone:     2024012901
;
.                        3600000      NS    A.ROOT-SERVERS.NET.
A.ROOT-SERVERS.NET.      3600000      A     198.41.0.4
A.ROOT-SERVERS.NET.      3600000      AAAA  2001:503:ba3e::2:30
;
.                        3600000      NS    B.ROOT-SERVERS.NET.
B.ROOT-SERVERS.NET.      3600000      A     199.9.14.201
B.ROOT-SERVERS.NET.      3600000      AAAA  2001:500:200::b
;
.                        3600000      NS    C.ROOT-SERVERS.NET.
C.ROOT-SERVERS.NET.      3600000      A     192.33.4.12
C.ROOT-SERVERS.NET.      3600000      AAAA  2001:500:2::c
;
.                        3600000      NS    D.ROOT-SERVERS.NET.
D.ROOT-SERVERS.NET.      3600000      A     199.7.91.13
D.ROOT-SERVERS.NET.      3600000      AAAA  2001:500:2d::d
;
.                        3600000      NS    E.ROOT-SERVERS.NET.
E.ROOT-SERVERS.NET.      3600000      A     192.203.230.10
E.ROOT-SERVERS.NET.      3600000      AAAA  2001:500:a8::e
;
.                        3600000      NS    F.ROOT-SERVERS.NET.
F.ROOT-SERVERS.NET.      3600000      A     192.5.5.241
F.ROOT-SERVERS.NET.      3600000      AAAA  2001:500:2f::f
;
.                        3600000      NS    G.ROOT-SERVERS.NET.
G.ROOT-SERVERS.NET.      3600000      A     192.112.36.4
G.ROOT-SERVERS.NET.      3600000      AAAA  2001:500:12::d0d
;
.                        3600000      NS    H.ROOT-SERVERS.NET.
H.ROOT-SERVERS.NET.      3600000      A     198.97.190.53
H.ROOT-SERVERS.NET.      3600000      AAAA  2001:500:1::53
;
.                        3600000      NS    I.ROOT-SERVERS.NET.
I.ROOT-SERVERS.NET.      3600000      A     192.36.148.17
I.ROOT-SERVERS.NET.      3600000      AAAA  2001:7fe::53
;
.                        3600000      NS    J.ROOT-SERVERS.NET.
J.ROOT-SERVERS.NET.      3600000      A     192.58.128.30
J.ROOT-SERVERS.NET.      3600000      AAAA  2001:503:c27::2:30
;
.                        3600000      NS    K.ROOT-SERVERS.NET.
K.ROOT-SERVERS.NET.      3600000      A     193.0.14.129
K.ROOT-SERVERS.NET.      3600000      AAAA  2001:7fd::1
;
.                        3600000      NS    L.ROOT-SERVERS.NET.
L.ROOT-SERVERS.NET.      3600000      A     199.7.83.42
L.ROOT-SERVERS.NET.      3600000      AAAA  2001:500:9f::42
;
.                        3600000      NS    M.ROOT-SERVERS.NET.
M.ROOT-SERVERS.NET.      3600000      A     202.12.27.33
M.ROOT-SERVERS.NET.      3600000      AAAA  2001:dc3::35
"#;

/// The parsed root server A records.
#[derive(Debug, Clone)]
pub struct RootHints {
    records: Vec<Record>,
}

impl RootHints {
    /// Parse the embedded hints table.
    #[must_use]
    pub fn load() -> Self {
        Self::parse(ROOT_HINTS)
    }

    /// Parse a `named.root` style table, keeping the A records.
    ///
    /// Lines are `name ttl type data` with `;` comments; records of other
    /// types and unparsable lines are skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut records = Vec::new();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(name), Some(ttl), Some(rtype)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            if !rtype.eq_ignore_ascii_case("A") {
                continue;
            }
            let Some(addr) = fields.next() else {
                continue;
            };

            let (Ok(name), Ok(ttl), Ok(addr)) = (
                Name::from_ascii(name),
                ttl.parse::<u32>(),
                addr.parse::<Ipv4Addr>(),
            ) else {
                debug!(line, "skipping unparsable hint line");
                continue;
            };

            records.push(Record::from_rdata(name, ttl, RData::A(A(addr))));
        }

        Self { records }
    }

    /// The root server addresses in table order.
    #[must_use]
    pub fn addrs(&self) -> Vec<Ipv4Addr> {
        self.records
            .iter()
            .filter_map(|r| match r.data() {
                Some(RData::A(a)) => Some(a.0),
                _ => None,
            })
            .collect()
    }

    /// The parsed A records.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Preload every hint into the cache.
    pub fn seed(&self, cache: &DnsCache) {
        for record in &self.records {
            cache.set_from_rr(record);
        }
    }
}
