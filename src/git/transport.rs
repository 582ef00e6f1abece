use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use git2::{
    cert::Cert, AutotagOption, CertificateCheckStatus, Config, Cred, CredentialType, FetchOptions,
    RemoteCallbacks,
};
use home::home_dir;
use log::{trace, warn};
use ssh_key::{known_hosts::HostPatterns, KnownHosts};
use thiserror::Error;

use crate::{
    model::{ParseError, RemoteUrl, Scheme},
    path::expand_home,
};

const GLOBAL_KNOWN_HOSTS: &str = "/etc/ssh/ssh_known_hosts";
// libgit2 keeps asking for credentials for as long as the callback returns some
const MAX_CREDENTIAL_ATTEMPTS: usize = 3;

// Last value handed to libgit2, whose server timeouts are process-wide
static SERVER_TIMEOUT: Mutex<Option<Duration>> = Mutex::new(None);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Url(#[from] ParseError),
    #[error("SSH key {path} does not exist or is not a file")]
    MissingSshKey { path: String },
}

/// How clones and fetches authenticate against the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Whatever the user's git and ssh setup already provides.
    Ambient,
    /// Force this private key for the ssh connection.
    SshKey { key_path: PathBuf },
}

/// Point in time after which a running transfer is aborted.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    pub timeout: Duration,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Deadline {
        Deadline {
            at: Instant::now() + timeout,
            timeout,
        }
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    fn check(deadline: Option<Deadline>) -> Result<(), git2::Error> {
        match deadline {
            Some(deadline) if deadline.expired() => Err(git2::Error::from_str(&format!(
                "operation did not finish within {}s",
                deadline.timeout.as_secs()
            ))),
            _ => Ok(()),
        }
    }
}

/// Bounds connecting to a remote, and every read from or write to it, by `timeout`.
///
/// The progress callbacks only run while data flows, so a server that accepts
/// the connection and then stays silent is caught here.
pub fn apply_server_timeouts(timeout: Duration) -> Result<(), git2::Error> {
    let mut applied = SERVER_TIMEOUT
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if *applied == Some(timeout) {
        return Ok(());
    }
    let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
    trace!("Setting libgit2 server timeouts to {}ms", millis);
    // SAFETY: writers are serialised by the lock above
    unsafe {
        git2::opts::set_server_connect_timeout_in_milliseconds(millis)?;
        git2::opts::set_server_timeout_in_milliseconds(millis)?;
    }
    *applied = Some(timeout);
    Ok(())
}

impl Transport {
    pub fn prepare(url: &str, ssh_key_path: Option<&Path>) -> Result<Transport, TransportError> {
        let remote = RemoteUrl::parse(url)?;
        match (remote.scheme, ssh_key_path) {
            (Scheme::Ssh, Some(key_path)) => {
                let key_path = expand_home(key_path);
                if !key_path.is_file() {
                    return Err(TransportError::MissingSshKey {
                        path: key_path.to_string_lossy().to_string(),
                    });
                }
                trace!("Using ssh key {} for {}", key_path.display(), url);
                Ok(Transport::SshKey { key_path })
            }
            (Scheme::Https, Some(key_path)) => {
                warn!(
                    "Ignoring ssh key {} for {}, it is only used with git@ urls",
                    key_path.display(),
                    url
                );
                Ok(Transport::Ambient)
            }
            (_, None) => Ok(Transport::Ambient),
        }
    }

    pub fn fetch_options(
        &self,
        deadline: Option<Deadline>,
    ) -> Result<FetchOptions<'static>, git2::Error> {
        let git_config = Config::open_default()?;
        let key_path = match self {
            Transport::SshKey { key_path } => Some(key_path.clone()),
            Transport::Ambient => None,
        };

        let mut callbacks = RemoteCallbacks::new();
        let mut attempts = 0;
        callbacks.credentials(move |url, username, allowed_types| {
            trace!(
                "Requested credentials for {}, username {:?}, allowed types {:?}",
                url,
                username,
                allowed_types
            );
            Deadline::check(deadline)?;
            attempts += 1;
            if attempts > MAX_CREDENTIAL_ATTEMPTS {
                return Err(git2::Error::from_str(
                    "authentication failed, no more credentials to try",
                ));
            }
            // Asking for ssh username
            if allowed_types.contains(CredentialType::USERNAME) {
                return Cred::username("git");
            }
            // SSH auth
            if allowed_types.contains(CredentialType::SSH_KEY) {
                let username = username.unwrap_or("git");
                return match &key_path {
                    Some(key_path) => Cred::ssh_key(username, None, key_path, None),
                    None => Cred::ssh_key_from_agent(username),
                };
            }
            // HTTP auth
            if allowed_types.contains(CredentialType::USER_PASS_PLAINTEXT) {
                return Cred::credential_helper(&git_config, url, username);
            }
            Err(git2::Error::from_str("no valid authentication available"))
        });

        callbacks.certificate_check(move |certificate, host| {
            Deadline::check(deadline)?;
            check_certificate(certificate, host)
        });

        callbacks.sideband_progress(move |message| {
            trace!("Remote: {}", String::from_utf8_lossy(message).trim_end());
            within(deadline)
        });

        callbacks.transfer_progress(move |progress| {
            if !within(deadline) {
                return false;
            }
            trace!(
                "Received {}/{} objects",
                progress.received_objects(),
                progress.total_objects()
            );
            true
        });

        let mut fetch_options = FetchOptions::new();
        fetch_options
            .remote_callbacks(callbacks)
            .download_tags(AutotagOption::Auto);

        Ok(fetch_options)
    }
}

fn within(deadline: Option<Deadline>) -> bool {
    match Deadline::check(deadline) {
        Ok(()) => true,
        Err(error) => {
            warn!("Aborting transfer: {}", error);
            false
        }
    }
}

fn check_certificate(
    certificate: &Cert<'_>,
    host: &str,
) -> Result<CertificateCheckStatus, git2::Error> {
    if let Some(hostkey) = certificate.as_hostkey().and_then(|h| h.hostkey()) {
        for known_hosts in known_hosts_files() {
            trace!("Loading {}", known_hosts.display());
            match KnownHosts::read_file(&known_hosts) {
                Ok(entries) => {
                    for entry in entries {
                        if host_matches_patterns(host, entry.host_patterns()) {
                            trace!(
                                "Found known host entry for {} ({})",
                                host,
                                entry.public_key().algorithm()
                            );
                            if entry.public_key().to_bytes().as_deref() == Ok(hostkey) {
                                trace!("Known host entry matches the host key");
                                return Ok(CertificateCheckStatus::CertificateOk);
                            }
                        }
                    }
                }
                Err(error) => trace!("Could not load {}: {}", known_hosts.display(), error),
            }
        }
        trace!("No known host entry matched the host key");
    }
    Ok(CertificateCheckStatus::CertificatePassthrough)
}

fn known_hosts_files() -> Vec<PathBuf> {
    let mut files = vec![PathBuf::from(GLOBAL_KNOWN_HOSTS)];
    if let Some(home) = home_dir() {
        files.push(home.join(".ssh").join("known_hosts"));
    }
    files
}

fn host_matches_patterns(host: &str, patterns: &HostPatterns) -> bool {
    match patterns {
        HostPatterns::Patterns(patterns) => {
            let mut match_found = false;
            for pattern in patterns {
                let pattern = pattern.to_lowercase();
                // * and ? wildcards are not yet supported
                if let Some(pattern) = pattern.strip_prefix('!') {
                    if pattern == host {
                        return false;
                    }
                } else {
                    match_found |= pattern == host;
                }
            }
            match_found
        }
        // Not yet supported
        HostPatterns::HashedName { .. } => false,
    }
}
