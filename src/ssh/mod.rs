pub mod exec;
pub mod pool;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use openssh::{KnownHosts, Session, SessionBuilder};
use thiserror::Error;
use tracing::debug;

use crate::ctx::Ctx;
pub use exec::RunOptions;

/// Which stream a pipe error originated on, so callers can tell a broken write to a
/// remote stdin apart from a broken read of its stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fd {
    Stdin,
    Stdout,
    Stderr,
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fd::Stdin => write!(f, "stdin"),
            Fd::Stdout => write!(f, "stdout"),
            Fd::Stderr => write!(f, "stderr"),
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum ConnectError {
    #[error("failed to connect to {user}@{host}: {message}")]
    Dial {
        user: String,
        host: String,
        message: String,
    },
    #[error("no usable ssh key found for {user}@{host} (tried ssh-agent and default key files)")]
    NoAuth { user: String, host: String },
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to open session on {host}: {source}")]
    SessionOpen {
        host: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{fd} pipe error on {host}: {source}")]
    Pipe {
        host: String,
        fd: Fd,
        #[source]
        source: std::io::Error,
    },
    #[error("command not found on {host}: {command}")]
    CommandNotFound { host: String, command: String },
    #[error("command exited with status {status} on {host}: {command}")]
    RemoteExit {
        host: String,
        command: String,
        status: i32,
    },
}

/// Key filenames tried, in order, after ssh-agent, mirroring ssh(1)'s own default
/// identity file search order.
const WELL_KNOWN_KEYFILES: &[&str] = &["id_ed25519", "id_ecdsa", "id_rsa"];

fn well_known_keyfiles() -> Vec<PathBuf> {
    let Some(home) = std::env::var_os("HOME") else {
        return Vec::new();
    };
    WELL_KNOWN_KEYFILES
        .iter()
        .map(|name| Path::new(&home).join(".ssh").join(name))
        .filter(|path| path.exists())
        .collect()
}

fn looks_like_auth_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("permission denied") || lower.contains("too many authentication failures")
}

/// A single authenticated SSH connection to one host.
pub struct RemoteExecutor {
    session: Session,
    host: String,
    user: String,
    port: Option<u16>,
}

impl RemoteExecutor {
    async fn dial(
        user: &str,
        host: &str,
        port: Option<u16>,
        jump: Option<&str>,
        keyfile: Option<&Path>,
    ) -> Result<Session, String> {
        let mut builder = SessionBuilder::default();
        builder.known_hosts_check(KnownHosts::Strict);
        builder.user(user.to_string());

        if let Some(port) = port {
            builder.port(port);
        }
        if let Some(jump) = jump {
            builder.jump_hosts([jump]);
        }
        if let Some(keyfile) = keyfile {
            builder.keyfile(keyfile);
        }

        builder.connect(host).await.map_err(|e| e.to_string())
    }

    /// Tries ssh-agent first (ssh's own default, via `SSH_AUTH_SOCK`), then each
    /// well-known keyfile under `~/.ssh` that exists on disk, first one that
    /// authenticates wins. If every attempt fails on an auth error, the failure is
    /// reported as [`ConnectError::NoAuth`] rather than the generic [`ConnectError::Dial`].
    pub async fn connect(
        user: &str,
        host: &str,
        port: Option<u16>,
        jump: Option<&str>,
    ) -> Result<Self, ConnectError> {
        debug!("connecting to {}@{}", user, host);

        let mut last_error = None;
        let mut saw_auth_failure = false;

        match Self::dial(user, host, port, jump, None).await {
            Ok(session) => {
                return Ok(Self {
                    session,
                    host: host.to_string(),
                    user: user.to_string(),
                    port,
                })
            }
            Err(e) => {
                saw_auth_failure |= looks_like_auth_failure(&e);
                last_error = Some(e);
            }
        }

        for keyfile in well_known_keyfiles() {
            match Self::dial(user, host, port, jump, Some(&keyfile)).await {
                Ok(session) => {
                    return Ok(Self {
                        session,
                        host: host.to_string(),
                        user: user.to_string(),
                        port,
                    })
                }
                Err(e) => {
                    saw_auth_failure |= looks_like_auth_failure(&e);
                    last_error = Some(e);
                }
            }
        }

        if saw_auth_failure {
            return Err(ConnectError::NoAuth {
                user: user.to_string(),
                host: host.to_string(),
            });
        }
        Err(ConnectError::Dial {
            user: user.to_string(),
            host: host.to_string(),
            message: last_error.unwrap_or_default(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

/// Abstraction over "a thing that can run a command on one host", so the transaction
/// manager and the deployer can be tested against an in-memory fake instead of real SSH.
#[async_trait]
pub trait Executor: Send + Sync {
    fn host(&self) -> &str;
    async fn run(&self, ctx: &Ctx, cmd: &str, opts: RunOptions) -> Result<(), RemoteError>;
    async fn read_file(&self, ctx: &Ctx, path: &str) -> Result<Vec<u8>, RemoteError>;
    async fn write_file(&self, ctx: &Ctx, path: &str, data: &[u8]) -> Result<(), RemoteError>;
}
