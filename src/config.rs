//! Startup configuration.
//!
//! Configuration is an immutable value built once from the command line and
//! handed to each component's constructor. Nothing mutates it afterwards;
//! the only runtime-adjustable knob is the debug-logging flag, a process
//! global toggled from a signal handler and consulted by the log filter.
//!
//! # Flags
//!
//! | Flag | Default | Meaning |
//! |------|---------|---------|
//! | `-b` | `127.0.0.1:53` | bind address for the UDP listener |
//! | `-s` | `127.0.0.1:22` | remote SSH endpoint |
//! | `-u` | `$USER` | SSH user name |
//! | `-i` | `$HOME/.ssh/id_rsa` | identity (private key) file |
//! | `-h` | `$HOME/.ssh/known_hosts` | host-key file in known-hosts format |
//! | `-x` | off | skip remote host-key verification (insecure) |
//! | `-dns` | `8.8.8.8:53` | upstream resolver for forwarding and fallback |
//! | `-r` | off | resolve iteratively from the root servers |
//! | `-c` | off | enable answer caching |
//! | `-t` | `10` | tunnel connection timeout in seconds |
//! | `-w` | CPU count | SSH session pool size |
//!
//! `--help` and `--version` print and exit; `-h` is taken by the host-key
//! file for compatibility with the historical flag set.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::LookupError;

/// Default number of cache entries kept before eviction kicks in.
pub const DEFAULT_CACHE_CAPACITY: u64 = 4096;

static DEBUG: AtomicBool = AtomicBool::new(false);

/// Whether debug logging is currently enabled.
#[must_use]
pub fn debug_enabled() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

/// Flip the debug-logging flag, returning the new state.
///
/// Called from the SIGUSR1 handler; this write is the handler's only side
/// effect.
pub fn toggle_debug() -> bool {
    !DEBUG.fetch_xor(true, Ordering::Relaxed)
}

/// Set the debug-logging flag explicitly.
pub fn set_debug(enabled: bool) {
    DEBUG.store(enabled, Ordering::Relaxed);
}

/// Immutable application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address for the UDP listener.
    pub bind_addr: SocketAddr,
    /// Remote SSH endpoint as `host:port`.
    pub remote_addr: String,
    /// User name for SSH authentication.
    pub remote_user: String,
    /// Private key file used to authenticate.
    pub identity_file: PathBuf,
    /// Known-hosts file used to verify the remote host key.
    pub known_hosts_file: PathBuf,
    /// Skip host-key verification entirely.
    pub insecure_skip_verify: bool,
    /// Upstream resolver used in forwarding mode and as iterative fallback.
    pub fallback_ns: Ipv4Addr,
    /// Resolve iteratively from the root servers instead of forwarding.
    pub recursive: bool,
    /// Enable the answer cache.
    pub use_cache: bool,
    /// Timeout for establishing the SSH session.
    pub connect_timeout: Duration,
    /// Number of SSH sessions kept in the pool.
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_default();
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 53)),
            remote_addr: "127.0.0.1:22".to_string(),
            remote_user: std::env::var("USER").unwrap_or_default(),
            identity_file: PathBuf::from(format!("{home}/.ssh/id_rsa")),
            known_hosts_file: PathBuf::from(format!("{home}/.ssh/known_hosts")),
            insecure_skip_verify: false,
            fallback_ns: Ipv4Addr::new(8, 8, 8, 8),
            recursive: false,
            use_cache: false,
            connect_timeout: Duration::from_secs(10),
            workers: num_cpus::get(),
        }
    }
}

impl Config {
    /// Parse configuration from command line arguments.
    ///
    /// `--help` and `--version` print to stdout and exit the process.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::Config`] for unknown flags, missing values
    /// or unparsable addresses.
    pub fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self, LookupError> {
        let mut config = Self::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-b" => config.bind_addr = parse_socket_addr(&mut args, "-b")?,
                "-s" => config.remote_addr = take_value(&mut args, "-s")?,
                "-u" => config.remote_user = take_value(&mut args, "-u")?,
                "-i" => config.identity_file = PathBuf::from(take_value(&mut args, "-i")?),
                "-h" => config.known_hosts_file = PathBuf::from(take_value(&mut args, "-h")?),
                "-x" => config.insecure_skip_verify = true,
                "-dns" => config.fallback_ns = parse_resolver(&take_value(&mut args, "-dns")?)?,
                "-r" => config.recursive = true,
                "-c" => config.use_cache = true,
                "-t" => {
                    let secs: u64 = take_value(&mut args, "-t")?.parse().map_err(|_| {
                        LookupError::config("-t expects a number of seconds")
                    })?;
                    config.connect_timeout = Duration::from_secs(secs);
                }
                "-w" => {
                    let workers: usize = take_value(&mut args, "-w")?.parse().map_err(|_| {
                        LookupError::config("-w expects a worker count")
                    })?;
                    if workers == 0 {
                        return Err(LookupError::config("-w must be at least 1"));
                    }
                    config.workers = workers;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" => {
                    println!("sshdns v{}", crate::VERSION);
                    std::process::exit(0);
                }
                unknown => {
                    return Err(LookupError::config(format!("unknown flag: {unknown}")));
                }
            }
        }

        if config.remote_user.is_empty() {
            return Err(LookupError::config(
                "no ssh user: set -u or the USER environment variable",
            ));
        }

        Ok(config)
    }
}

fn take_value(
    args: &mut impl Iterator<Item = String>,
    flag: &str,
) -> Result<String, LookupError> {
    args.next()
        .ok_or_else(|| LookupError::config(format!("{flag} expects a value")))
}

fn parse_socket_addr(
    args: &mut impl Iterator<Item = String>,
    flag: &str,
) -> Result<SocketAddr, LookupError> {
    let value = take_value(args, flag)?;
    value
        .parse()
        .map_err(|_| LookupError::config(format!("{flag}: invalid address '{value}'")))
}

/// Parse the `-dns` value into the upstream resolver IPv4.
///
/// Accepts a bare address or `addr:port`; the lookup path always dials
/// port 53, so a supplied port only has to parse.
fn parse_resolver(value: &str) -> Result<Ipv4Addr, LookupError> {
    if let Ok(addr) = value.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    let sockaddr: SocketAddr = value
        .parse()
        .map_err(|_| LookupError::config(format!("-dns: invalid resolver '{value}'")))?;
    match sockaddr {
        SocketAddr::V4(v4) => Ok(*v4.ip()),
        SocketAddr::V6(_) => Err(LookupError::config(
            "-dns: the upstream resolver must be an IPv4 address",
        )),
    }
}

fn print_help() {
    println!(
        r"sshdns v{}

Relay DNS queries through an SSH tunnel.

USAGE:
    sshdns [OPTIONS]

OPTIONS:
    -b <addr>     Bind to this host and port (default 127.0.0.1:53)
    -s <addr>     Connect to this ssh server (default 127.0.0.1:22)
    -u <user>     Connect with this ssh user (default $USER)
    -i <file>     Identity file for ssh authentication (default ~/.ssh/id_rsa)
    -h <file>     Known-hosts file for host-key verification (default ~/.ssh/known_hosts)
    -x            Skip remote host-key verification (insecure)
    -dns <addr>   Upstream resolver for forwarding and fallback (default 8.8.8.8:53)
    -r            Resolve iteratively from the root servers
    -c            Enable answer caching
    -t <secs>     Tunnel connection timeout in seconds (default 10)
    -w <count>    SSH session pool size (default: number of CPUs)
    --help        Print this help
    --version     Print version",
        crate::VERSION
    );
}
