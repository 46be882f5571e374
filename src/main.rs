//! sshdns entry point.
//!
//! Wires configuration, the session pool, the resolver and the UDP
//! front-end together, then serves until a termination signal arrives.
//!
//! # Signals
//!
//! - SIGINT / SIGQUIT / SIGTERM: graceful shutdown (stop accepting,
//!   drain in-flight lookups, close the pool)
//! - SIGUSR1: toggle debug logging
//! - SIGHUP: report the cache entry count
//!
//! # Exit codes
//!
//! - `0`: normal shutdown
//! - `1`: startup failure (bad flags, unreadable keys, unreachable host)
//! - `134`: the serve loop died after a successful startup

use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, Level};
use tracing_subscriber::prelude::*;

use sshdns::cache::DnsCache;
use sshdns::config::{self, Config, DEFAULT_CACHE_CAPACITY};
use sshdns::hints::RootHints;
use sshdns::proxy::Proxy;
use sshdns::resolver::LookupCoordinator;
use sshdns::tunnel::{SessionPool, SshConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args(std::env::args().skip(1))
        .context("invalid command line")?;

    init_logging();
    info!("starting sshdns v{}", sshdns::VERSION);

    let cache = Arc::new(if config.use_cache {
        DnsCache::new(DEFAULT_CACHE_CAPACITY)
    } else {
        DnsCache::disabled()
    });

    let connector = Arc::new(SshConnector::from_config(&config).context("ssh setup failed")?);
    let pool = Arc::new(
        SessionPool::connect(connector, config.workers, config.connect_timeout)
            .await
            .with_context(|| format!("cannot reach the ssh endpoint {}", config.remote_addr))?,
    );

    let coordinator = Arc::new(LookupCoordinator::new(
        Arc::clone(&cache),
        Arc::clone(&pool),
        &RootHints::load(),
        config.fallback_ns,
        config.recursive,
    ));

    let proxy = Proxy::bind(&config, coordinator, pool)
        .await
        .context("cannot bind the DNS listener")?;

    spawn_admin_signals(Arc::clone(&cache), config.use_cache)?;

    let mut serve = {
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move { proxy.listen_and_serve().await })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
        () = wait_for(SignalKind::terminate()) => info!("received SIGTERM, shutting down"),
        () = wait_for(SignalKind::quit()) => info!("received SIGQUIT, shutting down"),
        result = &mut serve => match result {
            Ok(Ok(())) => info!("listener stopped"),
            Ok(Err(err)) => fatal(&format!("serve loop failed: {err}")),
            Err(err) => fatal(&format!("serve task panicked: {err}")),
        },
    }

    proxy.shutdown().await;
    info!("bye!");
    Ok(())
}

/// Log filter: INFO always, DEBUG while the runtime flag is set.
///
/// The flag is a process global so the SIGUSR1 handler's single atomic
/// write is all it takes to flip verbosity.
fn init_logging() {
    let filter = tracing_subscriber::filter::filter_fn(|metadata| {
        let max = if config::debug_enabled() {
            Level::DEBUG
        } else {
            Level::INFO
        };
        *metadata.level() <= max
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(filter)
        .init();
}

/// Watch SIGUSR1 (debug toggle) and SIGHUP (cache report).
fn spawn_admin_signals(cache: Arc<DnsCache>, caching: bool) -> anyhow::Result<()> {
    let mut usr1 = signal(SignalKind::user_defined1()).context("cannot watch SIGUSR1")?;
    let mut hup = signal(SignalKind::hangup()).context("cannot watch SIGHUP")?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = usr1.recv() => {
                    if received.is_none() {
                        return;
                    }
                    let enabled = config::toggle_debug();
                    info!(debug = enabled, "debug logging toggled");
                }
                received = hup.recv() => {
                    if received.is_none() {
                        return;
                    }
                    if caching {
                        info!(entries = cache.entry_count(), "current DNS cache");
                    }
                }
            }
        }
    });

    Ok(())
}

async fn wait_for(kind: SignalKind) {
    match signal(kind) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(err) => {
            error!(error = %err, "cannot install signal handler");
            std::future::pending::<()>().await;
        }
    }
}

/// Abort after startup: log and exit with the fatal status.
fn fatal(msg: &str) -> ! {
    error!("{msg}");
    std::process::exit(134);
}
