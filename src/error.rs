/*!
 * Error types for the pubsub logger
 *
 * Each failure domain of the ingestion loop has its own error type so callers
 * can decide locally what is transient, what is discarded and what aborts a
 * single channel. Only `LoggerError` ever reaches the process boundary.
 */

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoggerError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FATAL: i32 = 2;

/// Top-level error surfaced by startup and the CLI
#[derive(Debug, Error)]
pub enum LoggerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Channel name could not be resolved
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Log shard could not be written
    #[error(transparent)]
    Write(#[from] WriteError),

    /// Transport daemon could not be located
    #[error(transparent)]
    Locate(#[from] LocateError),
}

impl LoggerError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        EXIT_FATAL
    }
}

/// Failure to find the running transport daemon.
///
/// Every variant is transient: supervisors sleep and look again.
#[derive(Debug, Error)]
pub enum LocateError {
    #[error("no running '{daemon}' process found in the process table")]
    NotFound { daemon: String },

    #[error("'{daemon}' matches several executables: {candidates:?}")]
    Ambiguous {
        daemon: String,
        candidates: Vec<PathBuf>,
    },

    #[error("configured transport executable {0} does not exist")]
    MissingExecutable(PathBuf),
}

impl LocateError {
    /// Transport absence is never fatal to a channel
    pub fn is_transient(&self) -> bool {
        true
    }
}

/// Envelope line that is not a pubsub payload.
///
/// Expected for transport status output; callers drop the line silently.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("envelope is not a JSON object: {0}")]
    InvalidJson(String),

    #[error("envelope has no string 'data' field")]
    MissingData,

    #[error("envelope data is not base64url: {0}")]
    InvalidBase64(String),
}

/// Failure to persist one record. Reported, never fatal.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to append to {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure to map a domain-style address to a channel identifier
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("no '{key}' text record for {domain}")]
    NotFound { domain: String, key: String },

    #[error("text record lookup for {domain} failed: {reason}")]
    Lookup { domain: String, reason: String },

    #[error("'{key}' record for {domain} is malformed: {value:?}")]
    Malformed {
        domain: String,
        key: String,
        value: String,
    },
}

/// Failure of an Ethereum JSON-RPC call
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("RPC request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC node returned error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("malformed RPC response: {0}")]
    Malformed(String),
}

/// Failure to launch a subscription subprocess
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("failed to spawn {executable}: {source}")]
    Spawn {
        executable: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("subscription process has no stdout handle")]
    MissingStdout,
}
