//! SSH tunnel transport.
//!
//! Everything that touches the secure channel lives here: the session
//! abstraction and its SSH implementation, host-key verification, the
//! length-prefixed DNS codec used on tunneled streams, and the session
//! pool with its health-driven reconnect cycle.
//!
//! ```text
//! resolver ──acquire──▶ SessionPool ──create──▶ SessionConnector (ssh dial,
//!     │                                          host key check, auth)
//!     └──open_stream──▶ TunnelSession ──▶ DnsStream (2-byte length framing)
//! ```

pub mod known_hosts;
pub mod pool;
pub mod session;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use known_hosts::{HostKeyPolicy, KnownHostEntry, HOST_KEY_ALGORITHMS};
pub use pool::{HealthReporter, HealthSignal, PoolGuard, SessionPool, ERROR_THRESHOLD};
pub use session::{SessionConnector, SshConnector, SshTunnel, TunnelSession, TunnelStream};
pub use stream::{DnsStream, MAX_MESSAGE_SIZE};
