//! Error types for the lookup engine.
//!
//! This module defines the failure taxonomy shared by the tunnel layer, the
//! session pool, the resolver and the proxy front-end. Every variant that
//! wraps a lower-level failure carries it as a `source` so the full cause
//! chain stays visible in logs.
//!
//! # Categories
//!
//! - **I/O errors**: dialing, writing or reading a DNS exchange inside the
//!   tunnel, and deadline expiry at any of those steps
//! - **Walk errors**: conditions met while following a delegation chain;
//!   some are soft (iteration continues), some terminate the walk
//! - **Pool errors**: the session pool refusing work while it reconnects
//! - **Setup errors**: tunnel construction, host-key validation and
//!   configuration problems surfaced at startup
//!
//! # Example
//!
//! ```
//! use sshdns::error::LookupError;
//!
//! let err = LookupError::ConnectionTimeout;
//! assert!(err.is_timeout());
//! assert!(err.is_recoverable());
//! ```

use thiserror::Error;

/// Boxed error used for wrapped causes across crate seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures produced while resolving a query or managing the tunnel.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The per-query deadline expired at an I/O step.
    #[error("connection timeout")]
    ConnectionTimeout,

    /// Opening a stream to an upstream server inside the tunnel failed.
    #[error("error dialing upstream")]
    Dial {
        #[source]
        source: BoxError,
    },

    /// Sending a DNS message over the tunnel stream failed.
    ///
    /// Covers both serialization and the socket write.
    #[error("error writing DNS request")]
    WriteMessage {
        #[source]
        source: BoxError,
    },

    /// Receiving a DNS message over the tunnel stream failed.
    ///
    /// Covers the framed read and deserialization.
    #[error("error reading DNS response")]
    ReadMessage {
        #[source]
        source: BoxError,
    },

    /// The iterative walk exhausted every lead for a name.
    #[error("domain not found: {name}")]
    DomainNotFound {
        /// The name that could not be resolved.
        name: String,
        #[source]
        source: Box<LookupError>,
    },

    /// An authority record was neither NS nor SOA.
    ///
    /// Soft failure: the walk records it and moves to the next record.
    #[error("authority record is not an NS: {record}")]
    AuthorityNotNs {
        /// Display form of the offending record.
        record: String,
    },

    /// No glue A record could be found for a delegated name server.
    ///
    /// Soft failure: the walk records it and moves to the next record.
    #[error("no A records for NS {ns} ({} additional records scanned)", additionals.len())]
    NoGlueRecords {
        /// The name server that is missing glue.
        ns: String,
        /// Display forms of the additional records that were scanned.
        additionals: Vec<String>,
    },

    /// The session pool is resetting and refuses new acquisitions.
    #[error("session pool is reconnecting")]
    PoolReconnecting,

    /// A lookup finished without producing a response or an error.
    ///
    /// This breaches an internal invariant; it is logged and no reply is
    /// written for the request.
    #[error("{name}: lookup produced no response and no error")]
    MissingResponse {
        /// The queried name.
        name: String,
    },

    /// The delegation or CNAME chain exceeded the recursion bound.
    #[error("recursion limit reached while resolving {name}")]
    RecursionLimit {
        /// The name whose chain grew too deep.
        name: String,
    },

    /// Establishing or authenticating the tunnel session failed.
    #[error("ssh session error: {reason}")]
    Session {
        /// What went wrong.
        reason: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The remote host key failed verification.
    #[error("host key verification failed: {reason}")]
    HostKey {
        /// Why the key was rejected.
        reason: String,
    },

    /// Invalid command line or startup configuration.
    #[error("configuration error: {reason}")]
    Config {
        /// Description of the invalid setting.
        reason: String,
    },
}

impl LookupError {
    /// Wrap a dial failure.
    pub fn dial(source: impl Into<BoxError>) -> Self {
        Self::Dial {
            source: source.into(),
        }
    }

    /// Wrap a write failure.
    pub fn write(source: impl Into<BoxError>) -> Self {
        Self::WriteMessage {
            source: source.into(),
        }
    }

    /// Wrap a read failure.
    pub fn read(source: impl Into<BoxError>) -> Self {
        Self::ReadMessage {
            source: source.into(),
        }
    }

    /// Wrap a walk failure in domain-not-found context.
    #[must_use]
    pub fn domain_not_found(name: impl Into<String>, source: LookupError) -> Self {
        Self::DomainNotFound {
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Create a session error with a cause.
    pub fn session(reason: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Session {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    /// Create a session error without a cause.
    #[must_use]
    pub fn session_msg(reason: impl Into<String>) -> Self {
        Self::Session {
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a host-key rejection.
    #[must_use]
    pub fn host_key(reason: impl Into<String>) -> Self {
        Self::HostKey {
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether this error is a deadline expiry.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout)
    }

    /// Whether this error came from the pool refusing work mid-reset.
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        matches!(self, Self::PoolReconnecting)
    }

    /// Whether this error breaches an internal invariant.
    ///
    /// Such errors are logged and produce no reply instead of a SERVFAIL.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::MissingResponse { .. })
    }

    /// Whether a retry against another server could succeed.
    ///
    /// Transient network conditions and pool resets are recoverable; walk
    /// exhaustion and setup problems are not. Only recoverable failures
    /// feed the pool's health counter, and the proxy logs them at debug
    /// rather than warn.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout
                | Self::Dial { .. }
                | Self::WriteMessage { .. }
                | Self::ReadMessage { .. }
                | Self::PoolReconnecting
        )
    }

    /// Whether the delegation walk records this error and keeps iterating.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::AuthorityNotNs { .. } | Self::NoGlueRecords { .. })
    }
}

impl From<russh::Error> for LookupError {
    fn from(err: russh::Error) -> Self {
        Self::Session {
            reason: "ssh transport failure".to_string(),
            source: Some(Box::new(err)),
        }
    }
}
