// Error types for the server crate.
//
// Only `StartError` (and `ConfigError` via the binary) ever reach a caller.
// The rest are handled where they happen: per connection, per work item, or
// per shutdown step, and logged.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;
use tickrepl_protocol::DecodeError;

/// Why `ServerLifecycle::start` refused or failed. A failed start leaves no
/// threads, files or tick registrations behind.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("an nREPL server is already running on {addr}")]
    AlreadyRunning { addr: SocketAddr },
    #[error("invalid server config: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("could not write port file {}: {source}", .path.display())]
    PortFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not spawn the accept thread: {0}")]
    Spawn(#[source] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("host must be non-empty and must not contain '\"' (got {0:?})")]
    InvalidHost(String),
    #[error("tick interval must be a positive number of seconds (got {0})")]
    InvalidInterval(f64),
}

/// Ends one client connection; never affects other connections.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("protocol decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// The peer went away (as opposed to sending something we couldn't parse).
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::Decode(e) => e.is_disconnect(),
            ConnectionError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
        }
    }
}

/// One failed shutdown step. Logged; the remaining steps still run.
#[derive(Debug, Error)]
#[error("shutdown step `{step}` failed: {source}")]
pub struct ShutdownStepError {
    pub step: &'static str,
    #[source]
    pub source: io::Error,
}

/// Reply delivery to a connection that no longer wants it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("response sink abandoned by its connection")]
    Abandoned,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol decode error: {0}")]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("could not open log file {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("a global logger is already installed: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}
