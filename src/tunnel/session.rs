//! SSH tunnel sessions.
//!
//! A [`TunnelSession`] is a live authenticated session able to dial
//! arbitrary `host:port` stream endpoints on the remote side. The resolver
//! only sees this trait; the production implementation is [`SshTunnel`],
//! an SSH connection whose streams are direct-tcpip channels.
//!
//! Sessions are created by a [`SessionConnector`], the seam the pool uses
//! so tests can substitute scripted in-memory sessions.

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh_keys::key;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::known_hosts::HostKeyPolicy;
use crate::config::Config;
use crate::error::LookupError;

/// Object-safe alias for the byte streams a session hands out.
pub trait StreamIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> StreamIo for T {}

/// A boxed stream dialed through a tunnel session.
///
/// Dropping the stream closes it; closing twice is harmless.
pub type TunnelStream = Box<dyn StreamIo>;

/// A live authenticated session capable of dialing remote endpoints.
#[async_trait]
pub trait TunnelSession: Send + Sync {
    /// Open a stream to `target` on the remote side.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Dial`] when the channel cannot be opened.
    async fn open_stream(&self, target: SocketAddrV4) -> Result<TunnelStream, LookupError>;

    /// Whether the session is known to be dead.
    fn is_closed(&self) -> bool;

    /// Tear the session down. Idempotent.
    async fn close(&self);
}

/// Factory producing new sessions for the pool.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Establish and authenticate a fresh session.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Session`], [`LookupError::HostKey`] or
    /// [`LookupError::ConnectionTimeout`] depending on where the
    /// handshake fails.
    async fn connect(&self) -> Result<Box<dyn TunnelSession>, LookupError>;
}

/// Handshake handler enforcing the configured host key policy.
struct HostCheck {
    policy: HostKeyPolicy,
}

#[async_trait]
impl client::Handler for HostCheck {
    type Error = LookupError;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        self.policy.verify(server_public_key)?;
        Ok(true)
    }
}

/// An SSH session implementing [`TunnelSession`].
pub struct SshTunnel {
    handle: Mutex<client::Handle<HostCheck>>,
    remote: String,
    closed: AtomicBool,
}

impl std::fmt::Debug for SshTunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTunnel")
            .field("remote", &self.remote)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl TunnelSession for SshTunnel {
    async fn open_stream(&self, target: SocketAddrV4) -> Result<TunnelStream, LookupError> {
        let handle = self.handle.lock().await;
        let channel = handle
            .channel_open_direct_tcpip(
                target.ip().to_string(),
                u32::from(target.port()),
                "127.0.0.1",
                0,
            )
            .await
            .map_err(LookupError::dial)?;
        debug!(%target, "opened direct-tcpip channel");
        Ok(Box::new(channel.into_stream()))
    }

    fn is_closed(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return true;
        }
        // A held lock means another task is mid-dial, so the session is
        // alive enough to keep.
        match self.handle.try_lock() {
            Ok(handle) => handle.is_closed(),
            Err(_) => false,
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let handle = self.handle.lock().await;
        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
        debug!(remote = %self.remote, "ssh session closed");
    }
}

/// Connector dialing and authenticating SSH sessions per configuration.
pub struct SshConnector {
    remote_addr: String,
    user: String,
    key: Arc<key::KeyPair>,
    policy: HostKeyPolicy,
    connect_timeout: Duration,
}

impl SshConnector {
    /// Build a connector from the application configuration.
    ///
    /// Loads the identity file and the known-hosts entries up front so a
    /// bad setup fails at startup rather than on the first query.
    ///
    /// # Errors
    ///
    /// Fails when the identity cannot be loaded or no acceptable host key
    /// exists for the remote.
    pub fn from_config(config: &Config) -> Result<Self, LookupError> {
        let key = russh_keys::load_secret_key(&config.identity_file, None).map_err(|e| {
            LookupError::session(
                format!("cannot load identity {}", config.identity_file.display()),
                e,
            )
        })?;

        let policy = if config.insecure_skip_verify {
            HostKeyPolicy::insecure()
        } else {
            HostKeyPolicy::from_file(&config.known_hosts_file, &config.remote_addr)?
        };

        Ok(Self {
            remote_addr: config.remote_addr.clone(),
            user: config.remote_user.clone(),
            key: Arc::new(key),
            policy,
            connect_timeout: config.connect_timeout,
        })
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    async fn connect(&self) -> Result<Box<dyn TunnelSession>, LookupError> {
        let ssh_config = Arc::new(client::Config::default());
        let handler = HostCheck {
            policy: self.policy.clone(),
        };

        let mut handle = tokio::time::timeout(
            self.connect_timeout,
            client::connect(ssh_config, self.remote_addr.as_str(), handler),
        )
        .await
        .map_err(|_| LookupError::ConnectionTimeout)??;

        let authenticated = tokio::time::timeout(
            self.connect_timeout,
            handle.authenticate_publickey(self.user.clone(), self.key.clone()),
        )
        .await
        .map_err(|_| LookupError::ConnectionTimeout)??;

        if !authenticated {
            return Err(LookupError::session_msg(format!(
                "public key authentication rejected for {}@{}",
                self.user, self.remote_addr
            )));
        }

        info!(remote = %self.remote_addr, user = %self.user, "connected");
        Ok(Box::new(SshTunnel {
            handle: Mutex::new(handle),
            remote: self.remote_addr.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}
