//! Host key verification against an OpenSSH known-hosts file.
//!
//! The file is read once at startup and reduced to the set of keys trusted
//! for the configured remote. Lines carry an optional `@marker`, a
//! comma-separated host list (optionally `[host]:port`), the key algorithm
//! and the base64 key blob. A `@revoked` marker for the remote rejects the
//! whole setup; `@cert-authority` and hashed (`|1|`) entries are skipped.
//!
//! Only the historically safe algorithms are accepted, preferred in this
//! order: ed25519, ecdsa p521/p384/p256, rsa.

use std::path::Path;

use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use tracing::{debug, info, warn};

use crate::error::LookupError;

/// Accepted host key algorithms, most preferred first.
pub const HOST_KEY_ALGORITHMS: [&str; 5] = [
    "ssh-ed25519",
    "ecdsa-sha2-nistp521",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp256",
    "ssh-rsa",
];

/// Markers understood in known-hosts lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// The key is revoked and must never be accepted.
    Revoked,
    /// The key signs host certificates; not used for plain key checks.
    CertAuthority,
}

/// One parsed known-hosts line.
#[derive(Debug, Clone)]
pub struct KnownHostEntry {
    /// Optional leading marker.
    pub marker: Option<Marker>,
    /// Host patterns the key applies to.
    pub hosts: Vec<String>,
    /// Key algorithm name, e.g. `ssh-ed25519`.
    pub algorithm: String,
    /// Base64 key blob as it appears in the file.
    pub key_base64: String,
}

impl KnownHostEntry {
    /// Parse one line; returns `None` for comments, blanks and hashed
    /// entries.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let mut fields = line.split_whitespace();
        let mut first = fields.next()?;

        let marker = match first {
            "@revoked" => {
                first = fields.next()?;
                Some(Marker::Revoked)
            }
            "@cert-authority" => {
                first = fields.next()?;
                Some(Marker::CertAuthority)
            }
            other if other.starts_with('@') => return None,
            _ => None,
        };

        if first.starts_with("|1|") {
            // Hashed host names cannot be matched without the salt secret.
            debug!("skipping hashed known-hosts entry");
            return None;
        }

        let algorithm = fields.next()?.to_string();
        let key_base64 = fields.next()?.to_string();

        Some(Self {
            marker,
            hosts: first.split(',').map(str::to_string).collect(),
            algorithm,
            key_base64,
        })
    }

    /// Whether any host pattern covers `remote_addr` (a `host:port` pair).
    ///
    /// A bare pattern matches its own name and the name on the default
    /// port 22; a bracketed `[host]:port` pattern matches that exact pair.
    #[must_use]
    pub fn matches(&self, remote_addr: &str) -> bool {
        self.hosts.iter().any(|pattern| {
            let pattern = pattern.replace(['[', ']'], "");
            pattern == remote_addr || format!("{pattern}:22") == remote_addr
        })
    }
}

/// A key trusted for the configured remote.
#[derive(Debug, Clone)]
pub struct TrustedKey {
    /// Key algorithm name.
    pub algorithm: String,
    /// Base64 key blob.
    pub key_base64: String,
}

/// How the connector validates the remote host key.
#[derive(Debug, Clone)]
pub enum HostKeyPolicy {
    /// Accept any key. Only selectable with the explicit insecure flag.
    Insecure,
    /// Accept exactly the keys found for the remote in the hosts file.
    Strict(Vec<TrustedKey>),
}

impl HostKeyPolicy {
    /// Build the insecure policy, warning loudly.
    #[must_use]
    pub fn insecure() -> Self {
        warn!("remote host verification is DISABLED, this might be harmful");
        Self::Insecure
    }

    /// Load the trusted keys for `remote_addr` from a known-hosts file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, when a matching entry is
    /// revoked, or when no acceptable key exists for the remote.
    pub fn from_file(path: &Path, remote_addr: &str) -> Result<Self, LookupError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            LookupError::host_key(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_known_hosts(&contents, remote_addr)
    }

    /// Load the trusted keys for `remote_addr` from known-hosts text.
    ///
    /// # Errors
    ///
    /// See [`Self::from_file`].
    pub fn from_known_hosts(contents: &str, remote_addr: &str) -> Result<Self, LookupError> {
        let mut trusted: Vec<TrustedKey> = Vec::new();

        for entry in contents.lines().filter_map(KnownHostEntry::parse) {
            if !entry.matches(remote_addr) {
                continue;
            }
            match entry.marker {
                Some(Marker::Revoked) => {
                    return Err(LookupError::host_key(format!(
                        "found a key for {remote_addr}, but the key has been revoked"
                    )));
                }
                Some(Marker::CertAuthority) => continue,
                None => {}
            }
            if !HOST_KEY_ALGORITHMS.contains(&entry.algorithm.as_str()) {
                debug!(algorithm = %entry.algorithm, "skipping unsupported host key algorithm");
                continue;
            }
            if russh_keys::parse_public_key_base64(&entry.key_base64).is_err() {
                debug!(host = remote_addr, "skipping unparsable host key");
                continue;
            }

            info!(
                algorithm = %entry.algorithm,
                host = remote_addr,
                "trusting host key from known-hosts file"
            );
            trusted.push(TrustedKey {
                algorithm: entry.algorithm,
                key_base64: entry.key_base64,
            });
        }

        if trusted.is_empty() {
            return Err(LookupError::host_key(format!(
                "no valid key found for host {remote_addr}"
            )));
        }

        // Preference order decides which key wins if the server could
        // present several.
        trusted.sort_by_key(|k| {
            HOST_KEY_ALGORITHMS
                .iter()
                .position(|a| *a == k.algorithm)
                .unwrap_or(HOST_KEY_ALGORITHMS.len())
        });

        Ok(Self::Strict(trusted))
    }

    /// Validate the key offered by the server during the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::HostKey`] when the offered key does not
    /// match any trusted key or uses a disallowed algorithm.
    pub fn verify(&self, offered: &PublicKey) -> Result<(), LookupError> {
        match self {
            Self::Insecure => Ok(()),
            Self::Strict(trusted) => {
                let name = offered.name();
                if !HOST_KEY_ALGORITHMS.contains(&name) {
                    return Err(LookupError::host_key(format!(
                        "server offered disallowed host key algorithm {name}"
                    )));
                }

                let offered_b64 = offered.public_key_base64();
                if trusted
                    .iter()
                    .any(|k| k.algorithm == name && k.key_base64 == offered_b64)
                {
                    Ok(())
                } else {
                    Err(LookupError::host_key(
                        "server host key does not match any known-hosts entry",
                    ))
                }
            }
        }
    }
}
